//! Configuração do FATE carregada a partir de `fate.toml`.
//!
//! A struct [`FateConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `FATE_STORE_PATH` tem precedência sobre o arquivo.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::fate::{DEFAULT_MAX_REPOS, FateInstanceType};

/// Arquivo de configuração procurado no diretório atual.
pub const DEFAULT_CONFIG_FILE: &str = "fate.toml";

/// Configuração de nível superior carregada de `fate.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct FateConfig {
    /// Profundidade máxima da pilha de passos de uma transação.
    #[serde(default = "default_max_repos")]
    pub max_repos: usize,

    /// Tipo de instância atribuído às transações criadas.
    #[serde(default = "default_instance_type")]
    pub instance_type: FateInstanceType,

    /// Caminho do snapshot JSON do store.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Filtro de log usado quando `RUST_LOG` não está definido.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

// Valor padrão para a profundidade da pilha: 100.
fn default_max_repos() -> usize {
    DEFAULT_MAX_REPOS
}

// Valor padrão para o tipo de instância: USER.
fn default_instance_type() -> FateInstanceType {
    FateInstanceType::User
}

// Valor padrão para o snapshot: "fate-store.json".
fn default_store_path() -> PathBuf {
    PathBuf::from("fate-store.json")
}

// Valor padrão para o filtro de log: "info".
fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for FateConfig {
    fn default() -> Self {
        Self {
            max_repos: default_max_repos(),
            instance_type: default_instance_type(),
            store_path: default_store_path(),
            log_filter: default_log_filter(),
        }
    }
}

impl FateConfig {
    /// Carrega a configuração de `path`, ou de `fate.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str::<FateConfig>(&contents)
                .with_context(|| format!("parsing {}", path.display()))?
        } else {
            Self::default()
        };

        // Variável de ambiente tem precedência sobre o arquivo de configuração.
        if let Ok(store_path) = std::env::var("FATE_STORE_PATH")
            && !store_path.is_empty()
        {
            config.store_path = PathBuf::from(store_path);
        }

        if config.max_repos == 0 {
            anyhow::bail!("max_repos must be at least 1");
        }

        Ok(config)
    }
}
