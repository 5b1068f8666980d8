//! Settings schema.
//!
//! Every section uses `#[serde(default)]` so a partial settings file only
//! needs to name the keys it overrides.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Seconds without a heartbeat before a session is swept (24 hours).
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 86_400;

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BusSettings {
    /// Persistent store.
    pub storage: StorageSettings,
    /// Event log query limits.
    pub events: EventSettings,
    /// Logging.
    pub logging: LoggingSettings,
}

/// Persistent store settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// SQLite database file.
    pub db_path: PathBuf,
    /// Older locations moved to `db_path` on first open.
    pub legacy_db_paths: Vec<PathBuf>,
    /// Heartbeat age after which a session is soft-deleted.
    pub session_timeout_secs: u64,
    /// SQLite busy timeout.
    pub busy_timeout_ms: u32,
}

impl Default for StorageSettings {
    fn default() -> Self {
        let claude = home_dir().join(".claude");
        Self {
            db_path: data_dir().join("data.db"),
            legacy_db_paths: vec![
                claude.join("contrib").join("event-bus").join("data.db"),
                claude.join("event-bus.db"),
            ],
            session_timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
            busy_timeout_ms: 5000,
        }
    }
}

/// Event log query settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventSettings {
    /// Batch size when the caller gives none.
    pub default_limit: u32,
    /// Upper bound on any batch.
    pub max_limit: u32,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            default_limit: 50,
            max_limit: 1000,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace`..`error`). `RUST_LOG` wins when set.
    pub level: String,
    /// Per-module overrides, e.g. `{"evbus_store": "debug"}`.
    pub module_levels: BTreeMap<String, String>,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Write to this file instead of stderr.
    pub log_file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            module_levels: BTreeMap::new(),
            json: false,
            log_file: None,
        }
    }
}

/// `$HOME`, or `/tmp` when unset.
pub fn home_dir() -> PathBuf {
    std::env::var("HOME").map_or_else(|_| PathBuf::from("/tmp"), PathBuf::from)
}

/// Directory holding the database and settings file.
pub fn data_dir() -> PathBuf {
    home_dir()
        .join(".claude")
        .join("contrib")
        .join("agent-event-bus")
}
