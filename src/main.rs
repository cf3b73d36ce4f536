mod cli;

use std::io;

use anyhow::{Result, bail};
use clap::Parser;
use cli::Cli;
use fate::admin::{self, AdminContext};
use fate::config::FateConfig;
use fate::fate::{MemoryFateStore, StepFrame};
use fate::keyword::KeywordRegistry;
use fate::{logging, ui};
use tracing::debug;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = FateConfig::load(cli.config.as_deref())?;
    logging::init(&config.log_filter, cli.verbose);

    let registry = KeywordRegistry::from_executables(admin::executables())?;
    let stdout = io::stdout();
    let mut out = stdout.lock();

    let Some(keyword) = cli.keyword.as_deref() else {
        ui::print_keywords(&mut out, &registry)?;
        return Ok(());
    };
    let Some(executable) = registry.get(keyword) else {
        ui::print_keywords(&mut out, &registry)?;
        bail!("unknown keyword '{keyword}'");
    };

    let store = if config.store_path.exists() {
        debug!(path = %config.store_path.display(), "loading store");
        MemoryFateStore::<StepFrame>::load_from(&config.store_path, config.max_repos)?
    } else {
        MemoryFateStore::from_config(&config)
    };

    let mut ctx = AdminContext::new(store);
    executable.execute(&mut ctx, &cli.args, &mut out)?;

    if ctx.dirty {
        debug!(path = %config.store_path.display(), "saving store");
        ctx.store.save_to(&config.store_path)?;
    }
    Ok(())
}
