use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::id::{FateId, FateKey};
use super::info::TxInfo;
use super::repo::Repo;
use super::status::TStatus;
use crate::error::Result;

/// Read access to one transaction. Never requires a reservation.
pub trait ReadOnlyFateTxStore {
    /// Step type kept on the stack.
    type Step: Repo;

    fn get_id(&self) -> FateId;

    fn get_key(&self) -> Option<FateKey>;

    fn time_created(&self) -> DateTime<Utc>;

    /// Current status. `TStatus::Unknown` when it cannot be determined.
    fn get_status(&self) -> TStatus;

    /// The next step to run, if any.
    fn top(&self) -> Option<Self::Step>;

    /// All steps, bottom to top.
    fn get_stack(&self) -> Vec<Self::Step>;

    fn get_transaction_info(&self, key: TxInfo) -> Option<serde_json::Value>;

    /// Suspend until the status is one of `expected`, then return it.
    ///
    /// Every waiter is released by the write that satisfies it. Resolves to
    /// `TStatus::Unknown` if the transaction disappears while waiting.
    fn wait_for_status_change(&self, expected: &[TStatus]) -> impl Future<Output = TStatus> + Send;
}

/// Mutating access to one transaction, held by the current reservation owner.
pub trait FateTxStore: ReadOnlyFateTxStore {
    /// Fails with `StackOverflow` when the stack is full; the stack is left as it was.
    fn push(&self, repo: Self::Step) -> Result<()>;

    /// Fails with a precondition error when the stack is empty.
    fn pop(&self) -> Result<()>;

    /// Persist `status` as given. Transition legality is the executor's concern.
    fn set_status(&self, status: TStatus) -> Result<()>;

    fn set_transaction_info(&self, key: TxInfo, value: serde_json::Value) -> Result<()>;

    /// Remove the transaction. Requires a terminal status and an empty stack.
    fn delete(&self) -> Result<()>;

    /// Remove the transaction whatever its status or stack.
    fn force_delete(&self) -> Result<()>;

    /// Release the reservation. The transaction is not offered for
    /// reservation again until `defer_time` has elapsed.
    fn unreserve(self, defer_time: Duration);
}
