//! Session repository: registry rows with soft delete.
//!
//! Reads only ever see active rows (`deleted_at IS NULL`), except
//! [`SessionRepo::get_including_deleted`], which exists for audit.

use chrono::{DateTime, Duration, Utc};
use evbus_core::{Session, SessionId, decode_cursor, encode_cursor};
use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::Result;
use crate::sqlite::row_helpers::{self, format_timestamp, parse_timestamp, parse_timestamp_opt};

const TABLE: &str = "sessions";

const COLUMNS: &str = "id, display_id, name, machine, cwd, repo, registered_at, last_heartbeat,
                       client_id, last_cursor, deleted_at";

/// Session repository. Stateless; every method takes `&Connection`.
pub struct SessionRepo;

impl SessionRepo {
    /// Insert or replace a session keyed by id.
    ///
    /// A soft-deleted row with the same id is overwritten, so re-registering
    /// an unregistered or swept client key drops that row's audit record.
    pub fn upsert(conn: &Connection, session: &Session) -> Result<()> {
        let _ = conn.execute(
            "INSERT OR REPLACE INTO sessions
               (id, display_id, name, machine, cwd, repo, registered_at, last_heartbeat,
                client_id, last_cursor, deleted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                session.id.as_str(),
                session.display_name,
                session.name,
                session.machine,
                session.cwd,
                session.repo,
                format_timestamp(session.registered_at),
                format_timestamp(session.last_heartbeat),
                session.client_key,
                session.last_cursor,
                session.deleted_at.map(format_timestamp),
            ],
        )?;
        Ok(())
    }

    /// Active session by id.
    pub fn get(conn: &Connection, id: &str) -> Result<Option<Session>> {
        Self::fetch_one(
            conn,
            &format!("SELECT {COLUMNS} FROM sessions WHERE id = ?1 AND deleted_at IS NULL"),
            params![id],
        )
    }

    /// Session by id, soft-deleted or not.
    pub fn get_including_deleted(conn: &Connection, id: &str) -> Result<Option<Session>> {
        Self::fetch_one(
            conn,
            &format!("SELECT {COLUMNS} FROM sessions WHERE id = ?1"),
            params![id],
        )
    }

    /// Active session for a `(machine, client_key)` pair, most recent heartbeat first.
    pub fn find_by_dedup_key(
        conn: &Connection,
        machine: &str,
        client_key: &str,
    ) -> Result<Option<Session>> {
        Self::fetch_one(
            conn,
            &format!(
                "SELECT {COLUMNS} FROM sessions
                 WHERE machine = ?1 AND client_id = ?2 AND deleted_at IS NULL
                 ORDER BY last_heartbeat DESC LIMIT 1"
            ),
            params![machine, client_key],
        )
    }

    /// Soft-delete. Returns whether an active row existed.
    pub fn delete(conn: &Connection, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE sessions SET deleted_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
            params![id, format_timestamp(now)],
        )?;
        Ok(changed > 0)
    }

    /// Refresh the heartbeat. Returns false when no active session matches.
    pub fn touch_heartbeat(conn: &Connection, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE sessions SET last_heartbeat = ?2 WHERE id = ?1 AND deleted_at IS NULL",
            params![id, format_timestamp(now)],
        )?;
        Ok(changed > 0)
    }

    /// Overwrite the bookmark. Returns false when no active session matches.
    pub fn update_cursor(conn: &Connection, id: &str, cursor: &str) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE sessions SET last_cursor = ?2 WHERE id = ?1 AND deleted_at IS NULL",
            params![id, cursor],
        )?;
        Ok(changed > 0)
    }

    /// Bookmark of an active session.
    pub fn last_cursor(conn: &Connection, id: &str) -> Result<Option<String>> {
        let cursor: Option<Option<String>> = conn
            .query_row(
                "SELECT last_cursor FROM sessions WHERE id = ?1 AND deleted_at IS NULL",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(cursor.flatten())
    }

    /// Move the bookmark to `event_id` only if that is ahead of the stored one.
    ///
    /// An unparsable stored bookmark counts as behind.
    pub fn advance_cursor(conn: &Connection, id: &str, event_id: i64) -> Result<bool> {
        let Some(session) = Self::get(conn, id)? else {
            return Ok(false);
        };
        let current = session.last_cursor.as_deref().and_then(decode_cursor);
        if current.is_some_and(|c| c >= event_id) {
            return Ok(false);
        }
        Self::update_cursor(conn, id, &encode_cursor(event_id))
    }

    /// Active sessions, most recent heartbeat first.
    pub fn list_active(conn: &Connection) -> Result<Vec<Session>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM sessions WHERE deleted_at IS NULL ORDER BY last_heartbeat DESC"
        ))?;
        let mut rows = stmt.query([])?;
        let mut sessions = Vec::new();
        while let Some(row) = rows.next()? {
            sessions.push(Self::map_row(row)?);
        }
        Ok(sessions)
    }

    /// Soft-delete every active session whose heartbeat is older than `timeout_secs`.
    pub fn sweep_stale(conn: &Connection, timeout_secs: u64, now: DateTime<Utc>) -> Result<usize> {
        let timeout = i64::try_from(timeout_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        let cutoff = now.checked_sub_signed(timeout).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let swept = conn.execute(
            "UPDATE sessions SET deleted_at = ?1
             WHERE deleted_at IS NULL AND last_heartbeat < ?2",
            params![format_timestamp(now), format_timestamp(cutoff)],
        )?;
        Ok(swept)
    }

    /// Number of active sessions.
    pub fn count(conn: &Connection) -> Result<i64> {
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM sessions WHERE deleted_at IS NULL",
            [],
            |row| row.get(0),
        )?)
    }

    fn fetch_one(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Option<Session>> {
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(params)?;
        let session = rows.next()?.map(Self::map_row).transpose()?;
        Ok(session)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> Result<Session> {
        let registered_at: String = row_helpers::get(row, 6, TABLE, "registered_at")?;
        let last_heartbeat: String = row_helpers::get(row, 7, TABLE, "last_heartbeat")?;
        let deleted_at: Option<String> = row_helpers::get_opt(row, 10, TABLE, "deleted_at")?;
        Ok(Session {
            id: SessionId::from_raw(row_helpers::get::<String>(row, 0, TABLE, "id")?),
            display_name: row_helpers::get(row, 1, TABLE, "display_id")?,
            name: row_helpers::get(row, 2, TABLE, "name")?,
            machine: row_helpers::get(row, 3, TABLE, "machine")?,
            cwd: row_helpers::get(row, 4, TABLE, "cwd")?,
            repo: row_helpers::get(row, 5, TABLE, "repo")?,
            registered_at: parse_timestamp(&registered_at, TABLE, "registered_at")?,
            last_heartbeat: parse_timestamp(&last_heartbeat, TABLE, "last_heartbeat")?,
            client_key: row_helpers::get_opt(row, 8, TABLE, "client_id")?,
            last_cursor: row_helpers::get_opt(row, 9, TABLE, "last_cursor")?,
            deleted_at: parse_timestamp_opt(deleted_at.as_deref(), TABLE, "deleted_at")?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use crate::errors::StoreError;
    use crate::sqlite::migrations::run_migrations;
    use assert_matches::assert_matches;
    use chrono::SubsecRound;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn session(id: &str, machine: &str, client_key: Option<&str>, heartbeat: DateTime<Utc>) -> Session {
        Session {
            id: SessionId::from_raw(id),
            display_name: format!("label-{id}"),
            name: "worker".into(),
            machine: machine.into(),
            cwd: "/code/bus".into(),
            repo: "bus".into(),
            registered_at: heartbeat,
            last_heartbeat: heartbeat,
            client_key: client_key.map(str::to_string),
            last_cursor: None,
            deleted_at: None,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc::now().trunc_subsecs(6)
    }

    #[test]
    fn upsert_and_get() {
        let conn = setup();
        let s = session("4242", "laptop", Some("4242"), now());
        SessionRepo::upsert(&conn, &s).unwrap();
        assert_eq!(SessionRepo::get(&conn, "4242").unwrap(), Some(s));
        assert_eq!(SessionRepo::get(&conn, "nope").unwrap(), None);
    }

    #[test]
    fn upsert_replaces_in_place() {
        let conn = setup();
        let mut s = session("a", "laptop", None, now());
        SessionRepo::upsert(&conn, &s).unwrap();
        s.name = "renamed".into();
        SessionRepo::upsert(&conn, &s).unwrap();
        assert_eq!(SessionRepo::count(&conn).unwrap(), 1);
        assert_eq!(SessionRepo::get(&conn, "a").unwrap().unwrap().name, "renamed");
    }

    #[test]
    fn upsert_overwrites_soft_deleted_row() {
        let conn = setup();
        SessionRepo::upsert(&conn, &session("a", "laptop", None, now())).unwrap();
        assert!(SessionRepo::delete(&conn, "a", now()).unwrap());

        let mut fresh = session("a", "laptop", None, now());
        fresh.display_name = "second-life".into();
        SessionRepo::upsert(&conn, &fresh).unwrap();

        let row = SessionRepo::get_including_deleted(&conn, "a").unwrap().unwrap();
        assert_eq!(row.display_name, "second-life");
        assert!(row.deleted_at.is_none());
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM sessions WHERE id = 'a'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn dedup_lookup_is_machine_scoped_and_active_only() {
        let conn = setup();
        SessionRepo::upsert(&conn, &session("4242", "laptop", Some("4242"), now())).unwrap();
        SessionRepo::upsert(&conn, &session("sess_x", "desktop", Some("4242"), now())).unwrap();

        let found = SessionRepo::find_by_dedup_key(&conn, "laptop", "4242").unwrap().unwrap();
        assert_eq!(found.id.as_str(), "4242");
        let found = SessionRepo::find_by_dedup_key(&conn, "desktop", "4242").unwrap().unwrap();
        assert_eq!(found.id.as_str(), "sess_x");
        assert!(SessionRepo::find_by_dedup_key(&conn, "server", "4242").unwrap().is_none());

        SessionRepo::delete(&conn, "4242", now()).unwrap();
        assert!(SessionRepo::find_by_dedup_key(&conn, "laptop", "4242").unwrap().is_none());
    }

    #[test]
    fn soft_delete_hides_but_keeps_row() {
        let conn = setup();
        SessionRepo::upsert(&conn, &session("a", "laptop", None, now())).unwrap();

        assert!(SessionRepo::delete(&conn, "a", now()).unwrap());
        assert!(!SessionRepo::delete(&conn, "a", now()).unwrap());
        assert!(SessionRepo::get(&conn, "a").unwrap().is_none());
        assert!(SessionRepo::list_active(&conn).unwrap().is_empty());
        assert_eq!(SessionRepo::count(&conn).unwrap(), 0);

        let row = SessionRepo::get_including_deleted(&conn, "a").unwrap().unwrap();
        assert!(row.deleted_at.is_some());
    }

    #[test]
    fn heartbeat_and_cursor_updates_ignore_inactive_rows() {
        let conn = setup();
        let t0 = now() - Duration::seconds(60);
        SessionRepo::upsert(&conn, &session("a", "laptop", None, t0)).unwrap();

        let t1 = now();
        assert!(SessionRepo::touch_heartbeat(&conn, "a", t1).unwrap());
        assert!(SessionRepo::update_cursor(&conn, "a", "12").unwrap());
        let s = SessionRepo::get(&conn, "a").unwrap().unwrap();
        assert_eq!(s.last_heartbeat, t1);
        assert_eq!(s.last_cursor.as_deref(), Some("12"));
        assert_eq!(SessionRepo::last_cursor(&conn, "a").unwrap().as_deref(), Some("12"));

        assert!(!SessionRepo::touch_heartbeat(&conn, "ghost", t1).unwrap());
        assert!(!SessionRepo::update_cursor(&conn, "ghost", "1").unwrap());

        SessionRepo::delete(&conn, "a", t1).unwrap();
        assert!(!SessionRepo::touch_heartbeat(&conn, "a", t1).unwrap());
        assert!(!SessionRepo::update_cursor(&conn, "a", "99").unwrap());
        assert_eq!(SessionRepo::last_cursor(&conn, "a").unwrap(), None);
    }

    #[test]
    fn advance_cursor_never_moves_backwards() {
        let conn = setup();
        SessionRepo::upsert(&conn, &session("a", "laptop", None, now())).unwrap();

        assert!(SessionRepo::advance_cursor(&conn, "a", 5).unwrap());
        assert!(!SessionRepo::advance_cursor(&conn, "a", 3).unwrap());
        assert!(!SessionRepo::advance_cursor(&conn, "a", 5).unwrap());
        assert!(SessionRepo::advance_cursor(&conn, "a", 9).unwrap());
        assert_eq!(SessionRepo::last_cursor(&conn, "a").unwrap().as_deref(), Some("9"));

        SessionRepo::update_cursor(&conn, "a", "junk").unwrap();
        assert!(SessionRepo::advance_cursor(&conn, "a", 1).unwrap());
        assert!(!SessionRepo::advance_cursor(&conn, "ghost", 1).unwrap());
    }

    #[test]
    fn list_active_orders_by_heartbeat_desc() {
        let conn = setup();
        let base = now();
        SessionRepo::upsert(&conn, &session("old", "m", None, base - Duration::seconds(30))).unwrap();
        SessionRepo::upsert(&conn, &session("new", "m", None, base)).unwrap();
        SessionRepo::upsert(&conn, &session("mid", "m", None, base - Duration::seconds(10))).unwrap();

        let ids: Vec<String> = SessionRepo::list_active(&conn)
            .unwrap()
            .into_iter()
            .map(|s| s.id.into_inner())
            .collect();
        assert_eq!(ids, ["new", "mid", "old"]);
    }

    #[test]
    fn sweep_soft_deletes_only_stale_sessions() {
        let conn = setup();
        let base = now();
        SessionRepo::upsert(&conn, &session("stale", "m", None, base - Duration::seconds(120))).unwrap();
        SessionRepo::upsert(&conn, &session("fresh", "m", None, base - Duration::seconds(10))).unwrap();

        assert_eq!(SessionRepo::count(&conn).unwrap(), 2);
        assert_eq!(SessionRepo::sweep_stale(&conn, 60, base).unwrap(), 1);
        assert!(SessionRepo::get(&conn, "stale").unwrap().is_none());
        assert!(SessionRepo::get(&conn, "fresh").unwrap().is_some());
        assert!(
            SessionRepo::get_including_deleted(&conn, "stale")
                .unwrap()
                .unwrap()
                .deleted_at
                .is_some()
        );
        assert_eq!(SessionRepo::sweep_stale(&conn, 60, base).unwrap(), 0);
    }

    #[test]
    fn sweep_handles_huge_timeouts() {
        let conn = setup();
        SessionRepo::upsert(&conn, &session("a", "m", None, now())).unwrap();
        assert_eq!(SessionRepo::sweep_stale(&conn, u64::MAX, now()).unwrap(), 0);
    }

    #[test]
    fn corrupt_timestamp_surfaces_as_error() {
        let conn = setup();
        conn.execute(
            "INSERT INTO sessions (id, display_id, name, machine, cwd, repo, registered_at, last_heartbeat)
             VALUES ('bad', 'x', 'n', 'm', '/c', 'r', 'not a time', 'not a time')",
            [],
        )
        .unwrap();
        let err = SessionRepo::get(&conn, "bad").unwrap_err();
        assert_matches!(err, StoreError::CorruptRow { table: "sessions", column: "registered_at", .. });
    }
}
