//! Schema migration runner.
//!
//! Migrations are plain functions registered in version order. The runner
//! reads the single-row `schema_version` table (taking `MAX(version)` so that
//! stores written by an older multi-row scheme still load), applies every
//! migration above the current version, then replaces the stored version with
//! the latest one. The caller supplies the transaction: a failure anywhere
//! leaves the store exactly as it was.
//!
//! A fresh store runs every migration exactly once and ends up with the same
//! schema as a store upgraded one version at a time.

use std::collections::HashSet;

use evbus_core::SessionId;
use rusqlite::{Connection, params};
use tracing::{debug, info, warn};

use crate::errors::{Result, StoreError};
use crate::sqlite::row_helpers::normalize_timestamp;

type MigrationFn = fn(&Connection) -> Result<()>;

/// A single migration with a version number and the function that applies it.
struct Migration {
    version: u32,
    description: &'static str,
    apply: MigrationFn,
}

/// All migrations in version order.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "base_schema",
        apply: base_schema,
    },
    Migration {
        version: 2,
        description: "stable_session_ids_and_soft_delete",
        apply: stable_session_ids_and_soft_delete,
    },
    Migration {
        version: 3,
        description: "event_filter_indexes",
        apply: event_filter_indexes,
    },
];

/// Run all pending migrations on the given connection.
///
/// Returns the number of migrations applied. A store whose version is newer
/// than [`latest_version`] is left untouched.
pub fn run_migrations(conn: &Connection) -> Result<u32> {
    ensure_version_table(conn)?;
    let current = current_version(conn)?;
    let target = latest_version();

    if current > target {
        warn!(
            current,
            target, "store schema is newer than this build, leaving it untouched"
        );
        return Ok(0);
    }

    let mut applied = 0;
    for migration in MIGRATIONS {
        if migration.version <= current {
            debug!(
                version = migration.version,
                description = migration.description,
                "migration already applied, skipping"
            );
            continue;
        }

        info!(
            version = migration.version,
            description = migration.description,
            "applying migration"
        );
        (migration.apply)(conn).map_err(|e| StoreError::Migration {
            version: migration.version,
            message: format!("{}: {e}", migration.description),
        })?;
        applied += 1;
    }

    if applied > 0 {
        write_version(conn, target)?;
        info!(applied, version = target, "migrations complete");
    }

    Ok(applied)
}

/// Return the stored schema version, or 0 if none.
pub fn current_version(conn: &Connection) -> Result<u32> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'schema_version'",
        [],
        |row| row.get(0),
    )?;
    if !exists {
        return Ok(0);
    }
    let version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Return the latest migration version defined in code.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal
// ─────────────────────────────────────────────────────────────────────────────

fn ensure_version_table(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY);")?;
    Ok(())
}

fn write_version(conn: &Connection, version: u32) -> Result<()> {
    let _ = conn.execute("DELETE FROM schema_version", [])?;
    let _ = conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        params![version],
    )?;
    Ok(())
}

fn table_columns(conn: &Connection, table: &str) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<HashSet<_>, _>>()?;
    Ok(columns)
}

fn add_column_if_missing(conn: &Connection, table: &str, column: &str, decl: &str) -> Result<()> {
    if !table_columns(conn, table)?.contains(column) {
        debug!(table, column, "adding missing column");
        conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"))?;
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Migrations
// ─────────────────────────────────────────────────────────────────────────────

/// v1: the first versioned schema, reached from nothing or from any unversioned store.
fn base_schema(conn: &Connection) -> Result<()> {
    let columns = table_columns(conn, "sessions")?;
    if columns.contains("pid") && !columns.contains("client_id") {
        warn!("dropping pid-keyed sessions table");
        conn.execute_batch("DROP TABLE sessions")?;
    }

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sessions (
           id             TEXT PRIMARY KEY,
           name           TEXT NOT NULL,
           machine        TEXT NOT NULL,
           cwd            TEXT NOT NULL,
           repo           TEXT NOT NULL,
           registered_at  TEXT NOT NULL,
           last_heartbeat TEXT NOT NULL,
           client_id      TEXT
         );
         CREATE TABLE IF NOT EXISTS events (
           id         INTEGER PRIMARY KEY AUTOINCREMENT,
           event_type TEXT NOT NULL,
           payload    TEXT NOT NULL,
           session_id TEXT NOT NULL,
           timestamp  TEXT NOT NULL
         );",
    )?;
    add_column_if_missing(conn, "sessions", "last_cursor", "TEXT")?;
    add_column_if_missing(conn, "events", "channel", "TEXT NOT NULL DEFAULT 'all'")?;
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_sessions_heartbeat ON sessions(last_heartbeat);",
    )?;
    Ok(())
}

struct PriorSessionRow {
    id: String,
    display_id: Option<String>,
    name: String,
    machine: String,
    cwd: String,
    repo: String,
    registered_at: String,
    last_heartbeat: String,
    client_id: Option<String>,
    last_cursor: Option<String>,
    deleted_at: Option<String>,
}

/// v2: separate the stable id from the display label and add soft delete.
///
/// Rows without a `display_id` keep their old id as the label and are
/// re-keyed to their `client_id`, or to a fresh token when there is none or
/// it is already taken. Rows that have a `display_id` keep their id.
fn stable_session_ids_and_soft_delete(conn: &Connection) -> Result<()> {
    let columns = table_columns(conn, "sessions")?;
    let display_expr = if columns.contains("display_id") { "display_id" } else { "NULL" };
    let deleted_expr = if columns.contains("deleted_at") { "deleted_at" } else { "NULL" };

    let rows = {
        let mut stmt = conn.prepare(&format!(
            "SELECT id, {display_expr}, name, machine, cwd, repo, registered_at, last_heartbeat,
                    client_id, last_cursor, {deleted_expr}
             FROM sessions ORDER BY registered_at ASC"
        ))?;
        stmt.query_map([], |row| {
            Ok(PriorSessionRow {
                id: row.get(0)?,
                display_id: row.get::<_, Option<String>>(1)?.filter(|d| !d.is_empty()),
                name: row.get(2)?,
                machine: row.get(3)?,
                cwd: row.get(4)?,
                repo: row.get(5)?,
                registered_at: row.get(6)?,
                last_heartbeat: row.get(7)?,
                client_id: row.get(8)?,
                last_cursor: row.get(9)?,
                deleted_at: row.get(10)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?
    };

    conn.execute_batch(
        "CREATE TABLE sessions_v2 (
           id             TEXT PRIMARY KEY,
           display_id     TEXT NOT NULL,
           name           TEXT NOT NULL,
           machine        TEXT NOT NULL,
           cwd            TEXT NOT NULL,
           repo           TEXT NOT NULL,
           registered_at  TEXT NOT NULL,
           last_heartbeat TEXT NOT NULL,
           client_id      TEXT,
           last_cursor    TEXT,
           deleted_at     TEXT
         );",
    )?;

    let mut taken: HashSet<String> = rows
        .iter()
        .filter(|r| r.display_id.is_some())
        .map(|r| r.id.clone())
        .collect();
    let mut rekeyed = 0_u32;

    for row in rows {
        let (id, display_id) = match row.display_id {
            Some(display_id) => (row.id, display_id),
            None => {
                let id = match row.client_id.as_deref() {
                    Some(key) if !key.is_empty() && !taken.contains(key) => key.to_string(),
                    _ => SessionId::generate().into_inner(),
                };
                rekeyed += 1;
                (id, row.id)
            }
        };
        let _ = taken.insert(id.clone());

        let _ = conn.execute(
            "INSERT INTO sessions_v2
               (id, display_id, name, machine, cwd, repo, registered_at, last_heartbeat,
                client_id, last_cursor, deleted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                id,
                display_id,
                row.name,
                row.machine,
                row.cwd,
                row.repo,
                normalize_timestamp(&row.registered_at),
                normalize_timestamp(&row.last_heartbeat),
                row.client_id,
                row.last_cursor,
                row.deleted_at.as_deref().map(normalize_timestamp),
            ],
        )?;
    }

    conn.execute_batch(
        "DROP TABLE sessions;
         ALTER TABLE sessions_v2 RENAME TO sessions;
         CREATE INDEX IF NOT EXISTS idx_sessions_heartbeat ON sessions(last_heartbeat);
         CREATE INDEX IF NOT EXISTS idx_sessions_dedup ON sessions(machine, client_id);",
    )?;

    if rekeyed > 0 {
        info!(rekeyed, "re-keyed legacy sessions");
    }
    Ok(())
}

/// v3: indexes for filtered pagination.
fn event_filter_indexes(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_events_channel ON events(channel, id);
         CREATE INDEX IF NOT EXISTS idx_events_type ON events(event_type, id);",
    )?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
