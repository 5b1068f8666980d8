//! Session identifiers.
//!
//! A session id is either a caller-supplied client key or a generated,
//! time-ordered token. Both are plain strings on the wire and in storage.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

const GENERATED_PREFIX: &str = "sess";

/// Stable identifier used for every session lookup.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh unique token (`sess_<uuid v7>`).
    pub fn generate() -> Self {
        Self(format!("{GENERATED_PREFIX}_{}", Uuid::now_v7()))
    }

    /// Wrap an existing identifier (client key or stored id) without validation.
    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the owned string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_id_has_prefix() {
        let id = SessionId::generate();
        assert!(id.as_str().starts_with("sess_"), "got: {id}");
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn generated_ids_sort_by_creation() {
        let a = SessionId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = SessionId::generate();
        assert!(a < b);
    }

    #[test]
    fn from_raw_preserves_client_key() {
        let id = SessionId::from_raw("12345");
        assert_eq!(id.as_str(), "12345");
        assert_eq!(id.to_string(), "12345");
    }

    #[test]
    fn serde_is_transparent() {
        let id = SessionId::from_raw("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
        let parsed: SessionId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(parsed, id);
    }
}
