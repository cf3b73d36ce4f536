//! Interface de linha de comando do `fate` baseada em clap.
//!
//! O primeiro argumento posicional é a palavra-chave do comando; o resto é
//! repassado sem interpretação para o comando registrado.

use std::path::PathBuf;

use clap::Parser;

/// Ferramenta administrativa para transações FATE.
#[derive(Debug, Parser)]
#[command(name = "fate", version, about)]
pub struct Cli {
    /// Caminho do arquivo de configuração TOML.
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, default_value_t = false)]
    pub verbose: bool,

    /// Palavra-chave do comando. Sem ela, lista os comandos disponíveis.
    pub keyword: Option<String>,

    /// Argumentos repassados ao comando.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}
