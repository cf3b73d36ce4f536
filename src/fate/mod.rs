mod id;
mod info;
mod memory;
mod repo;
mod status;
mod store;
mod wrapped;

pub use id::{FateId, FateInstanceType, FateKey};
pub use info::TxInfo;
pub use memory::{
    DEFAULT_MAX_REPOS, FateSummary, MemoryFateStore, MemoryTxStore, ReadOnlyTx, StoreSnapshot,
    TxRecord,
};
pub use repo::{Repo, StepFrame};
pub use status::TStatus;
pub use store::{FateTxStore, ReadOnlyFateTxStore};
pub use wrapped::WrappedTxStore;
