//! Saída de terminal do `fate`: tabelas e mensagens coloridas.
//!
//! Usa a crate `console` para estilização. As cores só aparecem quando a
//! saída é um terminal; em pipes e testes o texto sai limpo.

use std::collections::BTreeMap;
use std::io::{self, Write};

use console::Style;

use crate::fate::{FateSummary, TStatus};
use crate::keyword::KeywordRegistry;

/// Estilo usado para exibir cada status.
pub fn status_style(status: TStatus) -> Style {
    match status {
        TStatus::Successful => Style::new().green().bold(),
        TStatus::Failed | TStatus::FailedInProgress => Style::new().red().bold(),
        TStatus::InProgress | TStatus::Submitted => Style::new().yellow(),
        TStatus::New => Style::new().cyan(),
        TStatus::Unknown => Style::new().magenta(),
    }
}

/// Imprime uma linha por transação.
pub fn print_transactions(out: &mut dyn Write, rows: &[FateSummary]) -> io::Result<()> {
    if rows.is_empty() {
        return writeln!(out, "No transactions found.");
    }
    let dim = Style::new().dim();
    for row in rows {
        let mut flags = Vec::new();
        if row.reserved {
            flags.push("reserved");
        }
        if row.deferred {
            flags.push("deferred");
        }
        writeln!(
            out,
            "{} {:<18} {} depth={} top={} name={} key={} {}",
            row.id,
            status_style(row.status).apply_to(row.status.to_string()),
            dim.apply_to(row.created.format("%Y-%m-%dT%H:%M:%SZ")),
            row.stack_depth,
            row.top.as_deref().unwrap_or("-"),
            row.tx_name.as_deref().unwrap_or("-"),
            row.key
                .as_ref()
                .map_or_else(|| "-".to_string(), ToString::to_string),
            flags.join(","),
        )?;
    }
    Ok(())
}

/// Imprime a contagem de transações por status.
pub fn print_counts(out: &mut dyn Write, counts: &BTreeMap<TStatus, usize>) -> io::Result<()> {
    let total: usize = counts.values().sum();
    for (status, count) in counts {
        writeln!(
            out,
            "{:<18} {count}",
            status_style(*status).apply_to(status.to_string())
        )?;
    }
    writeln!(out, "{:<18} {total}", "TOTAL")
}

/// Lista as palavras-chave registradas.
pub fn print_keywords(out: &mut dyn Write, registry: &KeywordRegistry) -> io::Result<()> {
    writeln!(out, "Available keywords:")?;
    for executable in registry.iter() {
        writeln!(
            out,
            "  {:<14} {}",
            Style::new().bold().apply_to(executable.keyword()),
            executable.description()
        )?;
    }
    Ok(())
}

/// Mensagem de sucesso com checkmark verde.
pub fn done(out: &mut dyn Write, message: &str) -> io::Result<()> {
    writeln!(out, "{} {message}", Style::new().green().bold().apply_to("✓"))
}
