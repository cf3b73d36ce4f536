//! In-process FATE store.
//!
//! [`MemoryFateStore`] keeps every transaction in a shared table guarded by a
//! single mutex. Reservations are tokens handed out by [`MemoryFateStore::try_reserve`]
//! and [`MemoryFateStore::reserve`]; the resulting [`MemoryTxStore`] is the only
//! handle allowed to mutate the transaction until it is unreserved or dropped.
//! Status waiters subscribe to a per-transaction `watch` channel, so waiting never
//! holds the table lock.
//!
//! The whole table can be written to and read back from a JSON snapshot.
//! Reservations and deferrals are transient and are not part of a snapshot.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::id::{FateId, FateInstanceType, FateKey};
use super::info::TxInfo;
use super::repo::Repo;
use super::status::TStatus;
use super::store::{FateTxStore, ReadOnlyFateTxStore};
use crate::config::FateConfig;
use crate::error::{FateError, Result};

/// Default bound on the number of steps a transaction may stack up.
pub const DEFAULT_MAX_REPOS: usize = 100;

// Stand-in deadline for deferrals too long to represent.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn deferral_deadline(now: Instant, defer_time: Duration) -> Instant {
    now.checked_add(defer_time).unwrap_or_else(|| now + FAR_FUTURE)
}

struct TxEntry<T> {
    status: watch::Sender<TStatus>,
    key: Option<FateKey>,
    created: DateTime<Utc>,
    stack: Vec<T>,
    info: BTreeMap<TxInfo, serde_json::Value>,
    reservation: Option<Uuid>,
    deferred_until: Option<Instant>,
}

impl<T: Repo> TxEntry<T> {
    fn new(key: Option<FateKey>) -> Self {
        Self::from_record(TxRecord {
            status: TStatus::New,
            key,
            created: Utc::now(),
            stack: Vec::new(),
            info: BTreeMap::new(),
        })
    }

    fn from_record(record: TxRecord<T>) -> Self {
        let (status, _) = watch::channel(record.status);
        Self {
            status,
            key: record.key,
            created: record.created,
            stack: record.stack,
            info: record.info,
            reservation: None,
            deferred_until: None,
        }
    }

    fn status(&self) -> TStatus {
        *self.status.borrow()
    }

    fn to_record(&self) -> TxRecord<T> {
        TxRecord {
            status: self.status(),
            key: self.key.clone(),
            created: self.created,
            stack: self.stack.clone(),
            info: self.info.clone(),
        }
    }

    fn is_deferred(&self, now: Instant) -> bool {
        self.deferred_until.is_some_and(|until| now < until)
    }
}

/// Persisted form of one transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxRecord<T> {
    pub status: TStatus,
    #[serde(default)]
    pub key: Option<FateKey>,
    pub created: DateTime<Utc>,
    #[serde(default = "Vec::new")]
    pub stack: Vec<T>,
    #[serde(default)]
    pub info: BTreeMap<TxInfo, serde_json::Value>,
}

/// Persisted form of a whole store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshot<T> {
    pub instance_type: FateInstanceType,
    pub transactions: BTreeMap<FateId, TxRecord<T>>,
}

/// One line of a store listing.
#[derive(Debug, Clone, Serialize)]
pub struct FateSummary {
    pub id: FateId,
    pub status: TStatus,
    pub key: Option<FateKey>,
    pub created: DateTime<Utc>,
    pub tx_name: Option<String>,
    pub stack_depth: usize,
    pub top: Option<String>,
    pub reserved: bool,
    pub deferred: bool,
}

struct Shared<T> {
    instance_type: FateInstanceType,
    max_repos: usize,
    txs: Mutex<HashMap<FateId, TxEntry<T>>>,
    // Signalled whenever a reservation is released or a transaction disappears.
    released: Notify,
}

enum Attempt<T: Repo> {
    Acquired(MemoryTxStore<T>),
    Busy { deferred_until: Option<Instant> },
}

/// Shared, cloneable handle to an in-process transaction table.
pub struct MemoryFateStore<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for MemoryFateStore<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Repo> Default for MemoryFateStore<T> {
    fn default() -> Self {
        Self::new(FateInstanceType::User, DEFAULT_MAX_REPOS)
    }
}

impl<T: Repo> MemoryFateStore<T> {
    pub fn new(instance_type: FateInstanceType, max_repos: usize) -> Self {
        Self::with_entries(instance_type, max_repos, HashMap::new())
    }

    pub fn from_config(config: &FateConfig) -> Self {
        Self::new(config.instance_type, config.max_repos)
    }

    fn with_entries(
        instance_type: FateInstanceType,
        max_repos: usize,
        entries: HashMap<FateId, TxEntry<T>>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                instance_type,
                max_repos,
                txs: Mutex::new(entries),
                released: Notify::new(),
            }),
        }
    }

    pub fn instance_type(&self) -> FateInstanceType {
        self.shared.instance_type
    }

    pub fn max_repos(&self) -> usize {
        self.shared.max_repos
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<FateId, TxEntry<T>>> {
        self.shared.txs.lock()
    }

    /// Create a transaction in status `NEW` with an empty stack.
    pub fn create(&self) -> FateId {
        let id = FateId::new(self.shared.instance_type);
        self.lock().insert(id, TxEntry::new(None));
        info!(fate_id = %id, "created transaction");
        id
    }

    /// Create a transaction correlated with `key`.
    ///
    /// Fails with `KeyInUse` while another transaction holds the same key.
    pub fn create_with_key(&self, key: FateKey) -> Result<FateId> {
        let mut txs = self.lock();
        if let Some((existing, _)) = txs.iter().find(|(_, e)| e.key.as_ref() == Some(&key)) {
            return Err(FateError::KeyInUse {
                key,
                existing: *existing,
            });
        }
        let id = FateId::new(self.shared.instance_type);
        info!(fate_id = %id, key = %key, "created transaction");
        txs.insert(id, TxEntry::new(Some(key)));
        Ok(id)
    }

    /// Reserve `id` if nobody holds it and its deferral has passed.
    ///
    /// Returns `Ok(None)` when the transaction exists but is not reservable right now.
    pub fn try_reserve(&self, id: FateId) -> Result<Option<MemoryTxStore<T>>> {
        match self.attempt_reserve(id)? {
            Attempt::Acquired(handle) => Ok(Some(handle)),
            Attempt::Busy { .. } => Ok(None),
        }
    }

    /// Wait until `id` can be reserved, then reserve it.
    ///
    /// Woken by unreserve calls and by deferral expiry; never polls.
    pub async fn reserve(&self, id: FateId) -> Result<MemoryTxStore<T>> {
        loop {
            let released = self.shared.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            match self.attempt_reserve(id)? {
                Attempt::Acquired(handle) => return Ok(handle),
                Attempt::Busy {
                    deferred_until: Some(until),
                } => {
                    tokio::select! {
                        _ = &mut released => {}
                        _ = tokio::time::sleep_until(until) => {}
                    }
                }
                Attempt::Busy {
                    deferred_until: None,
                } => released.await,
            }
        }
    }

    fn attempt_reserve(&self, id: FateId) -> Result<Attempt<T>> {
        let mut txs = self.lock();
        let entry = txs.get_mut(&id).ok_or(FateError::NotFound(id))?;

        if entry.reservation.is_some() {
            return Ok(Attempt::Busy {
                deferred_until: None,
            });
        }
        let now = Instant::now();
        if entry.is_deferred(now) {
            return Ok(Attempt::Busy {
                deferred_until: entry.deferred_until,
            });
        }

        let token = Uuid::new_v4();
        entry.reservation = Some(token);
        entry.deferred_until = None;
        debug!(fate_id = %id, "reserved transaction");

        let view = ReadOnlyTx {
            store: self.clone(),
            id,
            key: entry.key.clone(),
            created: entry.created,
        };
        Ok(Attempt::Acquired(MemoryTxStore { view, token }))
    }

    /// Unreserved view of `id`. Reads through it stay live.
    pub fn read(&self, id: FateId) -> Result<ReadOnlyTx<T>> {
        let txs = self.lock();
        let entry = txs.get(&id).ok_or(FateError::NotFound(id))?;
        Ok(ReadOnlyTx {
            store: self.clone(),
            id,
            key: entry.key.clone(),
            created: entry.created,
        })
    }

    /// Every transaction, oldest first.
    pub fn list(&self) -> Vec<FateSummary> {
        let now = Instant::now();
        let txs = self.lock();
        let mut summaries: Vec<FateSummary> = txs
            .iter()
            .map(|(id, entry)| FateSummary {
                id: *id,
                status: entry.status(),
                key: entry.key.clone(),
                created: entry.created,
                tx_name: entry
                    .info
                    .get(&TxInfo::TxName)
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                stack_depth: entry.stack.len(),
                top: entry.stack.last().map(|repo| repo.name().to_string()),
                reserved: entry.reservation.is_some(),
                deferred: entry.is_deferred(now),
            })
            .collect();
        summaries.sort_by(|a, b| a.created.cmp(&b.created).then(a.id.cmp(&b.id)));
        summaries
    }

    pub fn snapshot(&self) -> StoreSnapshot<T> {
        let txs = self.lock();
        StoreSnapshot {
            instance_type: self.shared.instance_type,
            transactions: txs.iter().map(|(id, e)| (*id, e.to_record())).collect(),
        }
    }

    /// Rebuild a store from a snapshot. Every transaction comes back unreserved.
    pub fn restore(snapshot: StoreSnapshot<T>, max_repos: usize) -> Self {
        let entries = snapshot
            .transactions
            .into_iter()
            .map(|(id, record)| (id, TxEntry::from_record(record)))
            .collect();
        Self::with_entries(snapshot.instance_type, max_repos, entries)
    }

    /// Write the snapshot as pretty JSON, replacing `path` atomically.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.snapshot())?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        debug!(path = %path.display(), "saved store snapshot");
        Ok(())
    }

    pub fn load_from(path: &Path, max_repos: usize) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let snapshot: StoreSnapshot<T> = serde_json::from_str(&contents)?;
        debug!(
            path = %path.display(),
            transactions = snapshot.transactions.len(),
            "loaded store snapshot"
        );
        Ok(Self::restore(snapshot, max_repos))
    }
}

/// Live, unreserved view of one transaction.
pub struct ReadOnlyTx<T> {
    store: MemoryFateStore<T>,
    id: FateId,
    key: Option<FateKey>,
    created: DateTime<Utc>,
}

impl<T> Clone for ReadOnlyTx<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            id: self.id,
            key: self.key.clone(),
            created: self.created,
        }
    }
}

impl<T: Repo> ReadOnlyTx<T> {
    fn read_entry<R>(&self, f: impl FnOnce(&TxEntry<T>) -> R) -> Option<R> {
        self.store.lock().get(&self.id).map(f)
    }
}

impl<T: Repo> ReadOnlyFateTxStore for ReadOnlyTx<T> {
    type Step = T;

    fn get_id(&self) -> FateId {
        self.id
    }

    fn get_key(&self) -> Option<FateKey> {
        self.key.clone()
    }

    fn time_created(&self) -> DateTime<Utc> {
        self.created
    }

    fn get_status(&self) -> TStatus {
        self.read_entry(TxEntry::status).unwrap_or(TStatus::Unknown)
    }

    fn top(&self) -> Option<T> {
        self.read_entry(|e| e.stack.last().cloned()).flatten()
    }

    fn get_stack(&self) -> Vec<T> {
        self.read_entry(|e| e.stack.clone()).unwrap_or_default()
    }

    fn get_transaction_info(&self, key: TxInfo) -> Option<serde_json::Value> {
        self.read_entry(|e| e.info.get(&key).cloned()).flatten()
    }

    async fn wait_for_status_change(&self, expected: &[TStatus]) -> TStatus {
        let mut status_rx = match self.read_entry(|e| e.status.subscribe()) {
            Some(rx) => rx,
            None => return TStatus::Unknown,
        };
        match status_rx.wait_for(|status| expected.contains(status)).await {
            Ok(status) => *status,
            // Sender dropped: the transaction was deleted.
            Err(_) => TStatus::Unknown,
        }
    }
}

/// Reserved handle to one transaction of a [`MemoryFateStore`].
///
/// Dropping the handle releases the reservation without deferral.
pub struct MemoryTxStore<T: Repo> {
    view: ReadOnlyTx<T>,
    token: Uuid,
}

impl<T: Repo> MemoryTxStore<T> {
    /// Run `f` on the entry if this handle still owns the reservation.
    fn mutate<R>(&self, f: impl FnOnce(&mut TxEntry<T>) -> Result<R>) -> Result<R> {
        let id = self.view.id;
        let mut txs = self.view.store.lock();
        let entry = txs.get_mut(&id).ok_or(FateError::NotFound(id))?;
        if entry.reservation != Some(self.token) {
            return Err(FateError::NotReserved(id));
        }
        f(entry)
    }

    fn remove(&self, check: impl FnOnce(&TxEntry<T>) -> Result<()>) -> Result<()> {
        let id = self.view.id;
        {
            let mut txs = self.view.store.lock();
            match txs.get(&id) {
                None => return Err(FateError::NotFound(id)),
                Some(entry) if entry.reservation != Some(self.token) => {
                    return Err(FateError::NotReserved(id));
                }
                Some(entry) => check(entry)?,
            }
            txs.remove(&id);
        }
        self.view.store.shared.released.notify_waiters();
        Ok(())
    }

    fn release(&self, defer_time: Duration) {
        let id = self.view.id;
        let deferred_until =
            (!defer_time.is_zero()).then(|| deferral_deadline(Instant::now(), defer_time));
        {
            let mut txs = self.view.store.lock();
            let Some(entry) = txs.get_mut(&id) else {
                return;
            };
            if entry.reservation != Some(self.token) {
                return;
            }
            entry.reservation = None;
            entry.deferred_until = deferred_until;
        }
        debug!(fate_id = %id, defer = ?defer_time, "unreserved transaction");
        self.view.store.shared.released.notify_waiters();
    }
}

impl<T: Repo> Drop for MemoryTxStore<T> {
    fn drop(&mut self) {
        self.release(Duration::ZERO);
    }
}

impl<T: Repo> ReadOnlyFateTxStore for MemoryTxStore<T> {
    type Step = T;

    fn get_id(&self) -> FateId {
        self.view.get_id()
    }

    fn get_key(&self) -> Option<FateKey> {
        self.view.get_key()
    }

    fn time_created(&self) -> DateTime<Utc> {
        self.view.time_created()
    }

    fn get_status(&self) -> TStatus {
        self.view.get_status()
    }

    fn top(&self) -> Option<T> {
        self.view.top()
    }

    fn get_stack(&self) -> Vec<T> {
        self.view.get_stack()
    }

    fn get_transaction_info(&self, key: TxInfo) -> Option<serde_json::Value> {
        self.view.get_transaction_info(key)
    }

    async fn wait_for_status_change(&self, expected: &[TStatus]) -> TStatus {
        self.view.wait_for_status_change(expected).await
    }
}

impl<T: Repo> FateTxStore for MemoryTxStore<T> {
    fn push(&self, repo: T) -> Result<()> {
        let max = self.view.store.shared.max_repos;
        self.mutate(|entry| {
            if entry.stack.len() >= max {
                return Err(FateError::StackOverflow {
                    id: self.view.id,
                    max,
                });
            }
            debug!(fate_id = %self.view.id, step = repo.name(), depth = entry.stack.len() + 1, "pushed step");
            entry.stack.push(repo);
            Ok(())
        })
    }

    fn pop(&self) -> Result<()> {
        self.mutate(|entry| match entry.stack.pop() {
            Some(repo) => {
                debug!(fate_id = %self.view.id, step = repo.name(), "popped step");
                Ok(())
            }
            None => Err(FateError::precondition(
                self.view.id,
                "pop called on an empty stack",
            )),
        })
    }

    fn set_status(&self, status: TStatus) -> Result<()> {
        self.mutate(|entry| {
            let previous = entry.status.send_replace(status);
            debug!(fate_id = %self.view.id, from = %previous, to = %status, "status changed");
            Ok(())
        })
    }

    fn set_transaction_info(&self, key: TxInfo, value: serde_json::Value) -> Result<()> {
        self.mutate(|entry| {
            debug!(fate_id = %self.view.id, info = %key, "set transaction info");
            entry.info.insert(key, value);
            Ok(())
        })
    }

    fn delete(&self) -> Result<()> {
        let id = self.view.id;
        self.remove(|entry| {
            let status = entry.status();
            if !status.is_terminal() {
                return Err(FateError::precondition(
                    id,
                    format!("cannot delete a transaction in status {status}"),
                ));
            }
            if !entry.stack.is_empty() {
                return Err(FateError::precondition(
                    id,
                    format!(
                        "cannot delete a transaction with {} step(s) on its stack",
                        entry.stack.len()
                    ),
                ));
            }
            Ok(())
        })?;
        info!(fate_id = %id, "deleted transaction");
        Ok(())
    }

    fn force_delete(&self) -> Result<()> {
        let id = self.view.id;
        let mut status = TStatus::Unknown;
        let mut depth = 0;
        self.remove(|entry| {
            status = entry.status();
            depth = entry.stack.len();
            Ok(())
        })?;
        warn!(fate_id = %id, status = %status, stack_depth = depth, "force deleted transaction");
        Ok(())
    }

    fn unreserve(self, defer_time: Duration) {
        self.release(defer_time);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::fate::StepFrame;

    type Store = MemoryFateStore<StepFrame>;

    fn step(name: &str) -> StepFrame {
        StepFrame::new(name)
    }

    fn names(stack: &[StepFrame]) -> Vec<&str> {
        stack.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn new_transaction_defaults() {
        let store = Store::default();
        let id = store.create();
        let tx = store.read(id).unwrap();

        assert_eq!(tx.get_id(), id);
        assert_eq!(tx.get_status(), TStatus::New);
        assert!(tx.get_key().is_none());
        assert!(tx.top().is_none());
        assert!(tx.get_stack().is_empty());
        assert!(tx.time_created() <= Utc::now());
        assert_eq!(id.instance_type(), FateInstanceType::User);
    }

    #[test]
    fn push_pop_then_delete() {
        let store = Store::default();
        let id = store.create();
        let tx = store.try_reserve(id).unwrap().unwrap();

        tx.push(step("A")).unwrap();
        tx.push(step("B")).unwrap();
        assert_eq!(tx.top().unwrap().name, "B");
        assert_eq!(names(&tx.get_stack()), vec!["A", "B"]);

        tx.pop().unwrap();
        assert_eq!(tx.top().unwrap().name, "A");
        tx.pop().unwrap();
        assert!(tx.top().is_none());

        tx.set_status(TStatus::Successful).unwrap();
        tx.delete().unwrap();

        assert!(matches!(store.read(id), Err(FateError::NotFound(missing)) if missing == id));
        assert_eq!(tx.get_status(), TStatus::Unknown);
    }

    #[test]
    fn delete_requires_terminal_status() {
        let store = Store::default();
        let id = store.create();
        let tx = store.try_reserve(id).unwrap().unwrap();

        for status in [
            TStatus::New,
            TStatus::Submitted,
            TStatus::InProgress,
            TStatus::FailedInProgress,
            TStatus::Unknown,
        ] {
            tx.set_status(status).unwrap();
            let err = tx.delete().unwrap_err();
            assert!(err.is_precondition(), "{status}: {err}");
        }

        tx.set_status(TStatus::Failed).unwrap();
        tx.delete().unwrap();
    }

    #[test]
    fn delete_requires_empty_stack() {
        let store = Store::default();
        let id = store.create();
        let tx = store.try_reserve(id).unwrap().unwrap();
        tx.push(step("A")).unwrap();
        tx.set_status(TStatus::Successful).unwrap();

        let err = tx.delete().unwrap_err();
        assert!(matches!(err, FateError::Precondition { .. }));
        assert_eq!(names(&tx.get_stack()), vec!["A"]);
        assert!(store.read(id).is_ok());
    }

    #[test]
    fn force_delete_ignores_status_and_stack() {
        let store = Store::default();
        let id = store.create();
        let tx = store.try_reserve(id).unwrap().unwrap();
        tx.set_status(TStatus::InProgress).unwrap();
        tx.push(step("A")).unwrap();

        tx.force_delete().unwrap();
        assert!(matches!(store.read(id), Err(FateError::NotFound(_))));
    }

    #[test]
    fn mutations_after_delete_report_not_found() {
        let store = Store::default();
        let id = store.create();
        let tx = store.try_reserve(id).unwrap().unwrap();
        tx.force_delete().unwrap();

        assert!(matches!(tx.push(step("A")), Err(FateError::NotFound(_))));
        assert!(matches!(tx.set_status(TStatus::Failed), Err(FateError::NotFound(_))));
        assert!(matches!(tx.force_delete(), Err(FateError::NotFound(_))));
        tx.unreserve(Duration::ZERO);
    }

    #[test]
    fn push_beyond_limit_overflows_and_keeps_stack() {
        let store = Store::new(FateInstanceType::Meta, 3);
        let id = store.create();
        let tx = store.try_reserve(id).unwrap().unwrap();
        for name in ["A", "B", "C"] {
            tx.push(step(name)).unwrap();
        }

        let err = tx.push(step("D")).unwrap_err();
        assert!(matches!(err, FateError::StackOverflow { max: 3, .. }));
        assert_eq!(names(&tx.get_stack()), vec!["A", "B", "C"]);
        assert_eq!(tx.top().unwrap().name, "C");
    }

    #[test]
    fn pop_on_empty_stack_is_a_precondition_error() {
        let store = Store::default();
        let id = store.create();
        let tx = store.try_reserve(id).unwrap().unwrap();

        let err = tx.pop().unwrap_err();
        assert!(matches!(err, FateError::Precondition { .. }));
    }

    #[test]
    fn push_then_pop_restores_prior_stack() {
        let store = Store::new(FateInstanceType::User, 10);
        let id = store.create();
        let tx = store.try_reserve(id).unwrap().unwrap();
        tx.push(step("base")).unwrap();
        let before = tx.get_stack();

        for i in 0..9 {
            let s = step(&format!("s{i}"));
            tx.push(s.clone()).unwrap();
            assert_eq!(tx.top().unwrap(), s);
        }
        for _ in 0..9 {
            tx.pop().unwrap();
        }
        assert_eq!(tx.get_stack(), before);
    }

    #[test]
    fn stack_snapshot_is_detached() {
        let store = Store::default();
        let id = store.create();
        let tx = store.try_reserve(id).unwrap().unwrap();
        tx.push(step("A")).unwrap();

        let mut snapshot = tx.get_stack();
        snapshot.push(step("B"));
        snapshot[0].name = "changed".into();

        assert_eq!(names(&tx.get_stack()), vec!["A"]);
    }

    #[test]
    fn transaction_info_returns_latest_write() {
        let store = Store::default();
        let id = store.create();
        let tx = store.try_reserve(id).unwrap().unwrap();

        assert!(tx.get_transaction_info(TxInfo::ReturnValue).is_none());
        tx.set_transaction_info(TxInfo::TxName, json!("CreateTable")).unwrap();
        tx.set_transaction_info(TxInfo::ReturnValue, json!(1)).unwrap();
        tx.set_transaction_info(TxInfo::ReturnValue, json!(2)).unwrap();

        assert_eq!(tx.get_transaction_info(TxInfo::TxName), Some(json!("CreateTable")));
        assert_eq!(tx.get_transaction_info(TxInfo::ReturnValue), Some(json!(2)));
        assert!(tx.get_transaction_info(TxInfo::Exception).is_none());

        let view = store.read(id).unwrap();
        assert_eq!(view.get_transaction_info(TxInfo::ReturnValue), Some(json!(2)));
    }

    #[test]
    fn only_one_reservation_at_a_time() {
        let store = Store::default();
        let id = store.create();

        let first = store.try_reserve(id).unwrap().unwrap();
        assert!(store.try_reserve(id).unwrap().is_none());

        drop(first);
        assert!(store.try_reserve(id).unwrap().is_some());
    }

    #[test]
    fn reserving_a_missing_transaction_fails() {
        let store = Store::default();
        let id = FateId::new(FateInstanceType::User);
        assert!(matches!(store.try_reserve(id), Err(FateError::NotFound(_))));
    }

    #[test]
    fn lost_reservation_blocks_mutation() {
        let store = Store::default();
        let id = store.create();
        let tx = store.try_reserve(id).unwrap().unwrap();

        store.lock().get_mut(&id).unwrap().reservation = Some(Uuid::new_v4());

        assert!(matches!(tx.push(step("A")), Err(FateError::NotReserved(_))));
        assert!(matches!(tx.set_status(TStatus::InProgress), Err(FateError::NotReserved(_))));
        assert!(matches!(tx.force_delete(), Err(FateError::NotReserved(_))));
        assert_eq!(tx.get_status(), TStatus::New);
    }

    #[tokio::test]
    async fn unreserve_with_defer_blocks_reservation_until_elapsed() {
        let store = Store::default();
        let id = store.create();
        let tx = store.try_reserve(id).unwrap().unwrap();

        tx.unreserve(Duration::from_millis(300));
        assert!(store.try_reserve(id).unwrap().is_none());
        assert!(store.list()[0].deferred);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(store.try_reserve(id).unwrap().is_some());
    }

    #[tokio::test]
    async fn unreserve_with_huge_defer_keeps_transaction_deferred() {
        let store = Store::default();
        let id = store.create();
        let tx = store.try_reserve(id).unwrap().unwrap();

        tx.unreserve(Duration::MAX);
        assert!(store.try_reserve(id).unwrap().is_none());
        let row = &store.list()[0];
        assert!(row.deferred);
        assert!(!row.reserved);
    }

    #[test]
    fn deferral_deadline_saturates() {
        let now = Instant::now();
        assert_eq!(deferral_deadline(now, Duration::from_secs(5)), now + Duration::from_secs(5));
        assert_eq!(deferral_deadline(now, Duration::MAX), now + FAR_FUTURE);
    }

    #[tokio::test]
    async fn reads_are_allowed_while_deferred() {
        let store = Store::default();
        let id = store.create();
        let tx = store.try_reserve(id).unwrap().unwrap();
        tx.push(step("A")).unwrap();
        tx.unreserve(Duration::from_secs(60));

        let view = store.read(id).unwrap();
        assert_eq!(view.get_status(), TStatus::New);
        assert_eq!(view.top().unwrap().name, "A");
    }

    #[tokio::test]
    async fn reserve_waits_for_unreserve() {
        let store = Store::default();
        let id = store.create();
        let held = store.try_reserve(id).unwrap().unwrap();

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.reserve(id).await.map(|h| h.get_id()) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        held.unreserve(Duration::ZERO);
        let reserved = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(reserved, id);
    }

    #[tokio::test]
    async fn reserve_honors_deferral() {
        let store = Store::default();
        let id = store.create();
        let tx = store.try_reserve(id).unwrap().unwrap();

        let start = Instant::now();
        tx.unreserve(Duration::from_millis(200));
        let handle = tokio::time::timeout(Duration::from_secs(5), store.reserve(id))
            .await
            .unwrap()
            .unwrap();

        assert!(start.elapsed() >= Duration::from_millis(200));
        assert_eq!(handle.get_id(), id);
    }

    #[tokio::test]
    async fn wait_returns_at_once_when_status_already_matches() {
        let store = Store::default();
        let id = store.create();
        let view = store.read(id).unwrap();

        let status = tokio::time::timeout(
            Duration::from_secs(1),
            view.wait_for_status_change(&[TStatus::New, TStatus::Submitted]),
        )
        .await
        .unwrap();
        assert_eq!(status, TStatus::New);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn all_waiters_released_by_matching_status() {
        let store = Store::default();
        let id = store.create();
        let tx = store.try_reserve(id).unwrap().unwrap();

        let waiters: Vec<_> = (0..5)
            .map(|_| {
                let view = store.read(id).unwrap();
                tokio::spawn(async move {
                    view.wait_for_status_change(&[TStatus::Successful]).await
                })
            })
            .collect();

        tx.set_status(TStatus::Submitted).unwrap();
        tx.set_status(TStatus::InProgress).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(waiters.iter().all(|w| !w.is_finished()));

        tx.set_status(TStatus::Successful).unwrap();
        for waiter in waiters {
            let status = tokio::time::timeout(Duration::from_secs(5), waiter)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(status, TStatus::Successful);
        }
    }

    #[tokio::test]
    async fn waiting_does_not_block_status_writes() {
        let store = Store::default();
        let id = store.create();
        let tx = store.try_reserve(id).unwrap().unwrap();
        let view = store.read(id).unwrap();

        let waiter = tokio::spawn(async move {
            view.wait_for_status_change(&[TStatus::Failed]).await
        });
        tokio::task::yield_now().await;

        tx.set_status(TStatus::FailedInProgress).unwrap();
        assert_eq!(tx.get_status(), TStatus::FailedInProgress);
        tx.set_status(TStatus::Failed).unwrap();

        let status = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status, TStatus::Failed);
    }

    #[tokio::test]
    async fn waiter_sees_unknown_when_transaction_is_deleted() {
        let store = Store::default();
        let id = store.create();
        let tx = store.try_reserve(id).unwrap().unwrap();
        let view = store.read(id).unwrap();

        let waiter = tokio::spawn(async move {
            view.wait_for_status_change(&[TStatus::Successful]).await
        });
        tokio::task::yield_now().await;

        tx.force_delete().unwrap();
        let status = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status, TStatus::Unknown);
    }

    #[test]
    fn duplicate_key_is_rejected_while_live() {
        let store = Store::default();
        let key = FateKey::new("split", "t1;m");
        let first = store.create_with_key(key.clone()).unwrap();

        let err = store.create_with_key(key.clone()).unwrap_err();
        assert!(matches!(err, FateError::KeyInUse { existing, .. } if existing == first));

        let tx = store.try_reserve(first).unwrap().unwrap();
        assert_eq!(tx.get_key(), Some(key.clone()));
        tx.force_delete().unwrap();
        drop(tx);

        let second = store.create_with_key(key).unwrap();
        assert_ne!(second, first);
    }

    #[test]
    fn list_reports_reservation_and_top() {
        let store = Store::default();
        let a = store.create();
        let b = store.create();
        let tx = store.try_reserve(b).unwrap().unwrap();
        tx.push(step("Compact")).unwrap();
        tx.set_transaction_info(TxInfo::TxName, json!("compact")).unwrap();

        let list = store.list();
        assert_eq!(list.len(), 2);
        let a_row = list.iter().find(|s| s.id == a).unwrap();
        let b_row = list.iter().find(|s| s.id == b).unwrap();
        assert!(!a_row.reserved);
        assert!(b_row.reserved);
        assert_eq!(b_row.stack_depth, 1);
        assert_eq!(b_row.top.as_deref(), Some("Compact"));
        assert_eq!(b_row.tx_name.as_deref(), Some("compact"));
    }

    #[test]
    fn snapshot_file_round_trip_drops_reservations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fate-store.json");

        let store = Store::new(FateInstanceType::Meta, 10);
        let id = store
            .create_with_key(FateKey::new("merge", "t2"))
            .unwrap();
        let tx = store.try_reserve(id).unwrap().unwrap();
        tx.push(StepFrame::with_payload("Merge", json!({"range": "a-m"}))).unwrap();
        tx.set_status(TStatus::InProgress).unwrap();
        tx.set_transaction_info(TxInfo::AutoClean, json!(true)).unwrap();
        let created = tx.time_created();
        store.save_to(&path).unwrap();

        let restored = Store::load_from(&path, 10).unwrap();
        assert_eq!(restored.instance_type(), FateInstanceType::Meta);
        let view = restored.read(id).unwrap();
        assert_eq!(view.get_status(), TStatus::InProgress);
        assert_eq!(view.get_key(), Some(FateKey::new("merge", "t2")));
        assert_eq!(view.time_created(), created);
        assert_eq!(view.top().unwrap().payload["range"], "a-m");
        assert_eq!(view.get_transaction_info(TxInfo::AutoClean), Some(json!(true)));

        // Still held in the first store, free in the reloaded one.
        assert!(restored.try_reserve(id).unwrap().is_some());
    }

    #[test]
    fn record_without_optional_fields_deserializes() {
        let record: TxRecord<StepFrame> = serde_json::from_value(json!({
            "status": "SUBMITTED",
            "created": "2024-01-02T03:04:05Z",
        }))
        .unwrap();
        assert_eq!(record.status, TStatus::Submitted);
        assert!(record.stack.is_empty());
        assert!(record.key.is_none());
        assert!(record.info.is_empty());
    }

    #[test]
    fn load_from_missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Store::load_from(&dir.path().join("absent.json"), 10);
        assert!(matches!(result, Err(FateError::Io(_))));
    }
}
