//! Administrative commands over a FATE store.
//!
//! Each command is a [`KeywordExecutable`]; [`executables`] is the fixed list
//! the binary registers at startup. Commands that need to mutate a transaction
//! reserve it first and give up at once if a worker holds it.

use std::collections::BTreeMap;
use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::json;

use crate::fate::{
    FateId, FateKey, FateTxStore, MemoryFateStore, MemoryTxStore, ReadOnlyFateTxStore, StepFrame,
    TStatus, TxInfo, WrappedTxStore,
};
use crate::keyword::KeywordExecutable;
use crate::ui;

/// State shared by all admin commands for one invocation.
pub struct AdminContext {
    pub store: MemoryFateStore<StepFrame>,
    /// Set by commands that changed the store and need it written back.
    pub dirty: bool,
}

impl AdminContext {
    pub fn new(store: MemoryFateStore<StepFrame>) -> Self {
        Self { store, dirty: false }
    }
}

/// Every admin command, in registration order.
pub fn executables() -> Vec<Box<dyn KeywordExecutable>> {
    vec![
        Box::new(Print),
        Box::new(Summary),
        Box::new(Seed),
        Box::new(Fail),
        Box::new(Delete),
        Box::new(ForceDelete),
    ]
}

fn parse_args<A: Parser>(keyword: &str, args: &[String]) -> Result<A> {
    let argv = std::iter::once(keyword.to_string()).chain(args.iter().cloned());
    Ok(A::try_parse_from(argv)?)
}

fn reserve_now(store: &MemoryFateStore<StepFrame>, id: FateId) -> Result<MemoryTxStore<StepFrame>> {
    match store.try_reserve(id)? {
        Some(tx) => Ok(tx),
        None => bail!("{id} is reserved or deferred by a worker; try again later"),
    }
}

#[derive(Debug, Parser)]
#[command(name = "print", about = "List transactions")]
struct PrintArgs {
    /// Only show transactions in these statuses.
    #[arg(long = "status")]
    statuses: Vec<TStatus>,
}

pub struct Print;

impl KeywordExecutable for Print {
    fn keyword(&self) -> &'static str {
        "print"
    }

    fn description(&self) -> &'static str {
        "List transactions, optionally filtered by status"
    }

    fn execute(&self, ctx: &mut AdminContext, args: &[String], out: &mut dyn Write) -> Result<()> {
        let args: PrintArgs = parse_args(self.keyword(), args)?;
        let rows: Vec<_> = ctx
            .store
            .list()
            .into_iter()
            .filter(|row| args.statuses.is_empty() || args.statuses.contains(&row.status))
            .collect();
        ui::print_transactions(out, &rows)?;
        Ok(())
    }
}

#[derive(Debug, Parser)]
#[command(name = "summary", about = "Count transactions per status")]
struct SummaryArgs {}

pub struct Summary;

impl KeywordExecutable for Summary {
    fn keyword(&self) -> &'static str {
        "summary"
    }

    fn description(&self) -> &'static str {
        "Count transactions per status"
    }

    fn execute(&self, ctx: &mut AdminContext, args: &[String], out: &mut dyn Write) -> Result<()> {
        let _: SummaryArgs = parse_args(self.keyword(), args)?;
        let mut counts: BTreeMap<TStatus, usize> = BTreeMap::new();
        for row in ctx.store.list() {
            *counts.entry(row.status).or_insert(0) += 1;
        }
        ui::print_counts(out, &counts)?;
        Ok(())
    }
}

#[derive(Debug, Parser)]
#[command(name = "seed", about = "Create a transaction")]
struct SeedArgs {
    /// Operation name recorded as TX_NAME.
    #[arg(long)]
    name: Option<String>,

    /// Correlation key, KIND:RESOURCE.
    #[arg(long)]
    key: Option<FateKey>,

    /// Steps to push, bottom first.
    #[arg(long = "step")]
    steps: Vec<String>,

    /// Status to leave the transaction in.
    #[arg(long, default_value = "NEW")]
    status: TStatus,
}

pub struct Seed;

impl KeywordExecutable for Seed {
    fn keyword(&self) -> &'static str {
        "seed"
    }

    fn description(&self) -> &'static str {
        "Create a transaction, e.g. to rehearse recovery"
    }

    fn execute(&self, ctx: &mut AdminContext, args: &[String], out: &mut dyn Write) -> Result<()> {
        let SeedArgs {
            name,
            key,
            steps,
            status,
        } = parse_args(self.keyword(), args)?;
        let max = ctx.store.max_repos();
        if steps.len() > max {
            bail!("{} steps requested but a transaction holds at most {max}", steps.len());
        }

        let id = match key {
            Some(key) => ctx.store.create_with_key(key)?,
            None => ctx.store.create(),
        };
        let tx = reserve_now(&ctx.store, id)?;
        if let Err(err) = populate(&tx, name, steps, status) {
            // Leave nothing half-built behind.
            tx.force_delete()?;
            return Err(err.into());
        }
        tx.unreserve(Duration::ZERO);
        ctx.dirty = true;

        ui::done(out, &format!("Created {id}"))?;
        Ok(())
    }
}

fn populate(
    tx: &MemoryTxStore<StepFrame>,
    name: Option<String>,
    steps: Vec<String>,
    status: TStatus,
) -> crate::error::Result<()> {
    if let Some(name) = name {
        tx.set_transaction_info(TxInfo::TxName, json!(name))?;
    }
    for step in steps {
        tx.push(StepFrame::new(step))?;
    }
    tx.set_status(status)
}

#[derive(Debug, Parser)]
struct TxArgs {
    /// Transaction id, FATE:<TYPE>:<uuid>.
    id: FateId,
}

pub struct Fail;

impl KeywordExecutable for Fail {
    fn keyword(&self) -> &'static str {
        "fail"
    }

    fn description(&self) -> &'static str {
        "Fail a transaction so the executor rolls it back"
    }

    fn execute(&self, ctx: &mut AdminContext, args: &[String], out: &mut dyn Write) -> Result<()> {
        let TxArgs { id } = parse_args(self.keyword(), args)?;
        let tx = reserve_now(&ctx.store, id)?;

        let status = tx.get_status();
        let next = match status {
            TStatus::New => TStatus::Failed,
            TStatus::Submitted | TStatus::InProgress => TStatus::FailedInProgress,
            other => bail!("{id} cannot be failed from status {other}"),
        };
        tx.set_status(next)?;
        tx.set_transaction_info(TxInfo::Exception, json!("failed by administrator"))?;
        tx.unreserve(Duration::ZERO);
        ctx.dirty = true;

        ui::done(out, &format!("{id}: {status} -> {next}"))?;
        Ok(())
    }
}

pub struct Delete;

impl KeywordExecutable for Delete {
    fn keyword(&self) -> &'static str {
        "delete"
    }

    fn description(&self) -> &'static str {
        "Delete a finished transaction"
    }

    fn execute(&self, ctx: &mut AdminContext, args: &[String], out: &mut dyn Write) -> Result<()> {
        let TxArgs { id } = parse_args(self.keyword(), args)?;
        let tx = WrappedTxStore::new(reserve_now(&ctx.store, id)?, false);
        tx.delete()
            .with_context(|| format!("{id} is not finished; use force-delete to remove it anyway"))?;
        tx.unreserve(Duration::ZERO);
        ctx.dirty = true;

        ui::done(out, &format!("Deleted {id}"))?;
        Ok(())
    }
}

pub struct ForceDelete;

impl KeywordExecutable for ForceDelete {
    fn keyword(&self) -> &'static str {
        "force-delete"
    }

    fn description(&self) -> &'static str {
        "Delete a transaction whatever its status"
    }

    fn execute(&self, ctx: &mut AdminContext, args: &[String], out: &mut dyn Write) -> Result<()> {
        let TxArgs { id } = parse_args(self.keyword(), args)?;
        let tx = WrappedTxStore::new(reserve_now(&ctx.store, id)?, true);
        let status = tx.get_status();
        tx.force_delete()?;
        tx.unreserve(Duration::ZERO);
        ctx.dirty = true;

        ui::done(out, &format!("Force deleted {id} (was {status})"))?;
        Ok(())
    }
}
