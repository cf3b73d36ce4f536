use std::time::Duration;

use chrono::{DateTime, Utc};

use super::id::{FateId, FateKey};
use super::info::TxInfo;
use super::status::TStatus;
use super::store::{FateTxStore, ReadOnlyFateTxStore};
use crate::error::{FateError, Result};

/// Pass-through handle that decides whether its holder may force-delete.
///
/// The backing store knows nothing about callers; privilege is whichever
/// wrapper the caller was handed. Workers get `allow_force_delete = false`,
/// recovery tooling gets `true`.
pub struct WrappedTxStore<S> {
    wrapped: S,
    allow_force_delete: bool,
}

impl<S> WrappedTxStore<S> {
    pub fn new(wrapped: S, allow_force_delete: bool) -> Self {
        Self {
            wrapped,
            allow_force_delete,
        }
    }

    pub fn allows_force_delete(&self) -> bool {
        self.allow_force_delete
    }

    pub fn into_inner(self) -> S {
        self.wrapped
    }
}

impl<S: ReadOnlyFateTxStore + Sync> ReadOnlyFateTxStore for WrappedTxStore<S> {
    type Step = S::Step;

    fn get_id(&self) -> FateId {
        self.wrapped.get_id()
    }

    fn get_key(&self) -> Option<FateKey> {
        self.wrapped.get_key()
    }

    fn time_created(&self) -> DateTime<Utc> {
        self.wrapped.time_created()
    }

    fn get_status(&self) -> TStatus {
        self.wrapped.get_status()
    }

    fn top(&self) -> Option<S::Step> {
        self.wrapped.top()
    }

    fn get_stack(&self) -> Vec<S::Step> {
        self.wrapped.get_stack()
    }

    fn get_transaction_info(&self, key: TxInfo) -> Option<serde_json::Value> {
        self.wrapped.get_transaction_info(key)
    }

    async fn wait_for_status_change(&self, expected: &[TStatus]) -> TStatus {
        self.wrapped.wait_for_status_change(expected).await
    }
}

impl<S: FateTxStore + Sync> FateTxStore for WrappedTxStore<S> {
    fn push(&self, repo: S::Step) -> Result<()> {
        self.wrapped.push(repo)
    }

    fn pop(&self) -> Result<()> {
        self.wrapped.pop()
    }

    fn set_status(&self, status: TStatus) -> Result<()> {
        self.wrapped.set_status(status)
    }

    fn set_transaction_info(&self, key: TxInfo, value: serde_json::Value) -> Result<()> {
        self.wrapped.set_transaction_info(key, value)
    }

    fn delete(&self) -> Result<()> {
        self.wrapped.delete()
    }

    fn force_delete(&self) -> Result<()> {
        if !self.allow_force_delete {
            return Err(FateError::precondition(
                self.wrapped.get_id(),
                "force delete is not allowed",
            ));
        }
        self.wrapped.force_delete()
    }

    fn unreserve(self, defer_time: Duration) {
        self.wrapped.unreserve(defer_time);
    }
}
