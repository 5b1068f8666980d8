//! Error types for the store.
//!
//! Only genuine storage faults surface as [`StoreError`]. Lookups that find
//! nothing, malformed cursors, and liveness probe failures are ordinary
//! return values (`Option`, `bool`, empty `Vec`).

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Filesystem error (creating the data directory, relocating a legacy file).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Schema migration failed. The store was not opened.
    #[error("migration v{version} failed: {message}")]
    Migration {
        /// Version being applied when the failure occurred.
        version: u32,
        /// What went wrong.
        message: String,
    },

    /// A stored row could not be decoded.
    #[error("corrupt row in {table}.{column}: {detail}")]
    CorruptRow {
        /// Table name.
        table: &'static str,
        /// Column name.
        column: &'static str,
        /// Decoder message.
        detail: String,
    },
}

/// Convenience type alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
