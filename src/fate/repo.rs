use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// One resumable unit of operation logic, stored as a frame on a transaction's stack.
///
/// The store only moves steps around; what a step does when executed is up to
/// the operation that defines it.
pub trait Repo: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Short human-readable name, used in logs and admin output.
    fn name(&self) -> &str;
}

/// A step whose payload is opaque to this process.
///
/// Used by tooling that must read and move stacks written by other processes
/// without knowing the concrete operation types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFrame {
    pub name: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl StepFrame {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

impl Repo for StepFrame {
    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_without_payload_deserializes() {
        let frame: StepFrame = serde_json::from_str(r#"{"name":"PopulateMetadata"}"#).unwrap();
        assert_eq!(frame.name(), "PopulateMetadata");
        assert!(frame.payload.is_null());
    }

    #[test]
    fn frame_keeps_payload() {
        let frame = StepFrame::with_payload("CreateDir", serde_json::json!({"path": "/t/1"}));
        assert_eq!(frame.payload["path"], "/t/1");
    }
}
