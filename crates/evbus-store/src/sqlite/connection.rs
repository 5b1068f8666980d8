//! Shared `SQLite` connection with WAL mode and a configurable busy timeout.
//!
//! A single connection is guarded by a `parking_lot::Mutex` and shared through
//! `Arc`, so cloning a [`Database`] is cheap. Schema migrations run inside one
//! `BEGIN IMMEDIATE` transaction when the database is opened.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{Connection, TransactionBehavior};
use tracing::info;

use crate::errors::Result;
use crate::sqlite::migrations;

/// Connection settings.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Busy timeout in milliseconds (default: 5000).
    pub busy_timeout_ms: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5000,
        }
    }
}

/// Thread-safe `SQLite` connection wrapper.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl Database {
    /// Open or create a database file, applying pending migrations.
    pub fn open(path: &Path, config: &ConnectionConfig) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let db = Self::init(conn, config, path.to_owned())?;
        info!(path = %path.display(), "database opened");
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, &ConnectionConfig::default(), PathBuf::from(":memory:"))
    }

    fn init(mut conn: Connection, config: &ConnectionConfig, path: PathBuf) -> Result<Self> {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL;\
             PRAGMA busy_timeout = {};\
             PRAGMA synchronous = NORMAL;",
            config.busy_timeout_ms
        ))?;

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let _ = migrations::run_migrations(&tx)?;
        tx.commit()?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Execute a closure with the database connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Execute a closure inside a `BEGIN IMMEDIATE` transaction.
    ///
    /// Commits when the closure returns `Ok`, rolls back otherwise.
    pub fn with_tx<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Database file path (`:memory:` for in-memory databases).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current schema version.
    pub fn schema_version(&self) -> Result<u32> {
        self.with_conn(migrations::current_version)
    }
}

/// Pragma state for verification.
#[derive(Debug)]
pub struct PragmaState {
    /// Journal mode (`wal` for files, `memory` for in-memory databases).
    pub journal_mode: String,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
}

/// Read back the pragmas applied at open.
pub fn verify_pragmas(conn: &Connection) -> Result<PragmaState> {
    let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    let busy_timeout_ms: u32 = conn.query_row("PRAGMA busy_timeout", [], |row| row.get(0))?;
    Ok(PragmaState {
        journal_mode,
        busy_timeout_ms,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
