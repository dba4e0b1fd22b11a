//! Strongly-typed identifiers for snapsched

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Name of a filesystem whose schedules are managed independently
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FsName(String);

impl FsName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FsName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for FsName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for FsName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for a connected IPC client
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_name_equality() {
        assert_eq!(FsName::new("cephfs"), FsName::from("cephfs"));
        assert_ne!(FsName::new("cephfs"), FsName::new("backup"));
    }

    #[test]
    fn client_id_uniqueness() {
        assert_ne!(ClientId::new(), ClientId::new());
    }

    #[test]
    fn fs_name_serializes_as_plain_string() {
        let json = serde_json::to_string(&FsName::new("cephfs")).unwrap();
        assert_eq!(json, "\"cephfs\"");
        let parsed: FsName = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.as_str(), "cephfs");
    }
}
