use std::fmt;

use serde::{Deserialize, Serialize};

/// Metadata slots attached to a transaction.
///
/// Each slot is owned by one writer by convention, so writes never need a
/// read-modify-write cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxInfo {
    /// Display name of the operation.
    TxName,
    /// Whether the transaction is deleted automatically once terminal.
    AutoClean,
    /// Failure detail recorded when a step errors.
    Exception,
    /// Value returned by the final step.
    ReturnValue,
    /// How long a finished transaction is kept before age-off.
    TxAgeOff,
}

impl fmt::Display for TxInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxInfo::TxName => write!(f, "TX_NAME"),
            TxInfo::AutoClean => write!(f, "AUTO_CLEAN"),
            TxInfo::Exception => write!(f, "EXCEPTION"),
            TxInfo::ReturnValue => write!(f, "RETURN_VALUE"),
            TxInfo::TxAgeOff => write!(f, "TX_AGEOFF"),
        }
    }
}
