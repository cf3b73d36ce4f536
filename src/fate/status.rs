use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FateError;

/// Lifecycle status of a FATE transaction.
///
/// A transaction flows through: NEW → SUBMITTED → IN_PROGRESS → SUCCESSFUL,
/// or IN_PROGRESS → FAILED_IN_PROGRESS → FAILED when its steps are rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TStatus {
    /// Created, not yet handed to the executor.
    New,
    /// Queued for execution.
    Submitted,
    /// Steps are being executed.
    InProgress,
    /// A step failed; compensating steps are still running.
    FailedInProgress,
    /// Rolled back. Terminal.
    Failed,
    /// All steps completed. Terminal.
    Successful,
    /// The status could not be read (store fault or missing transaction).
    /// Never a business outcome.
    Unknown,
}

impl TStatus {
    pub const ALL: [TStatus; 7] = [
        TStatus::New,
        TStatus::Submitted,
        TStatus::InProgress,
        TStatus::FailedInProgress,
        TStatus::Failed,
        TStatus::Successful,
        TStatus::Unknown,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, TStatus::Successful | TStatus::Failed)
    }

    pub fn is_failed(self) -> bool {
        matches!(self, TStatus::FailedInProgress | TStatus::Failed)
    }

    /// Whether moving from `self` to `next` follows the executor's lifecycle.
    ///
    /// Advisory only: stores persist any status they are given.
    pub fn can_transition_to(self, next: TStatus) -> bool {
        match (self, next) {
            (TStatus::New, TStatus::Submitted | TStatus::Failed) => true,
            (TStatus::Submitted, TStatus::InProgress | TStatus::FailedInProgress) => true,
            (
                TStatus::InProgress,
                TStatus::Successful | TStatus::FailedInProgress,
            ) => true,
            (TStatus::FailedInProgress, TStatus::Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TStatus::New => write!(f, "NEW"),
            TStatus::Submitted => write!(f, "SUBMITTED"),
            TStatus::InProgress => write!(f, "IN_PROGRESS"),
            TStatus::FailedInProgress => write!(f, "FAILED_IN_PROGRESS"),
            TStatus::Failed => write!(f, "FAILED"),
            TStatus::Successful => write!(f, "SUCCESSFUL"),
            TStatus::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl FromStr for TStatus {
    type Err = FateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        TStatus::ALL
            .into_iter()
            .find(|status| status.to_string() == normalized)
            .ok_or_else(|| FateError::InvalidStatus(s.to_string()))
    }
}
