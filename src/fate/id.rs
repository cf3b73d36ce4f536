use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::FateError;

const PREFIX: &str = "FATE";

/// Which store a transaction lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FateInstanceType {
    /// Operations on the system's own metadata.
    Meta,
    /// Operations requested by users.
    User,
}

impl fmt::Display for FateInstanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FateInstanceType::Meta => write!(f, "META"),
            FateInstanceType::User => write!(f, "USER"),
        }
    }
}

impl FromStr for FateInstanceType {
    type Err = FateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "META" => Ok(FateInstanceType::Meta),
            "USER" => Ok(FateInstanceType::User),
            _ => Err(FateError::InvalidId(format!("unknown instance type '{s}'"))),
        }
    }
}

/// Globally unique transaction identifier, rendered as `FATE:<TYPE>:<uuid>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FateId {
    instance_type: FateInstanceType,
    tx_uuid: Uuid,
}

impl FateId {
    /// Allocate a fresh id.
    pub fn new(instance_type: FateInstanceType) -> Self {
        Self::from_uuid(instance_type, Uuid::new_v4())
    }

    pub fn from_uuid(instance_type: FateInstanceType, tx_uuid: Uuid) -> Self {
        Self {
            instance_type,
            tx_uuid,
        }
    }

    pub fn instance_type(&self) -> FateInstanceType {
        self.instance_type
    }

    pub fn tx_uuid(&self) -> Uuid {
        self.tx_uuid
    }
}

impl fmt::Display for FateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}:{}:{}", self.instance_type, self.tx_uuid)
    }
}

impl FromStr for FateId {
    type Err = FateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (Some(PREFIX), Some(kind), Some(uuid)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(FateError::InvalidId(s.to_string()));
        };
        let instance_type = kind.parse()?;
        let tx_uuid = Uuid::parse_str(uuid).map_err(|_| FateError::InvalidId(s.to_string()))?;
        let id = Self::from_uuid(instance_type, tx_uuid);
        // Only the canonical rendering is accepted.
        if id.to_string() != s {
            return Err(FateError::InvalidId(s.to_string()));
        }
        Ok(id)
    }
}

// Ids are map keys in snapshots, so they travel as their canonical string.
impl Serialize for FateId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FateId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Correlates a transaction with the external resource it operates on,
/// e.g. `split` of a given range. At most one live transaction may hold a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FateKey {
    kind: String,
    resource: String,
}

impl FateKey {
    pub fn new(kind: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            resource: resource.into(),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }
}

impl fmt::Display for FateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.resource)
    }
}

impl FromStr for FateKey {
    type Err = FateError;

    /// Parses `KIND:RESOURCE`; the resource may itself contain colons.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((kind, resource)) if !kind.is_empty() && !resource.is_empty() => {
                Ok(Self::new(kind, resource))
            }
            _ => Err(FateError::InvalidId(format!(
                "key '{s}' must look like KIND:RESOURCE"
            ))),
        }
    }
}
