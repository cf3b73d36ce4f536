use thiserror::Error;

use crate::fate::{FateId, FateKey};

pub type Result<T, E = FateError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum FateError {
    #[error("Transaction not found: {0}")]
    NotFound(FateId),

    /// Pushing would grow the step stack past the configured bound.
    #[error("Repo stack size too large for {id}: limit is {max} steps")]
    StackOverflow { id: FateId, max: usize },

    /// The caller broke a documented precondition of the operation.
    #[error("Precondition violated for {id}: {reason}")]
    Precondition { id: FateId, reason: String },

    #[error("Transaction {0} is not reserved by this handle")]
    NotReserved(FateId),

    #[error("Key {key} is already in use by {existing}")]
    KeyInUse { key: FateKey, existing: FateId },

    #[error("Invalid transaction id: {0}")]
    InvalidId(String),

    #[error("Invalid transaction status: {0}")]
    InvalidStatus(String),

    #[error("Duplicate keywords: {}", .0.join(", "))]
    DuplicateKeywords(Vec<String>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FateError {
    pub(crate) fn precondition(id: FateId, reason: impl Into<String>) -> Self {
        FateError::Precondition {
            id,
            reason: reason.into(),
        }
    }

    /// True for errors that signal a caller logic error rather than a store fault.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            FateError::Precondition { .. } | FateError::NotReserved(_)
        )
    }
}
