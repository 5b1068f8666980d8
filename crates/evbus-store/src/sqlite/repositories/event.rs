//! Event repository: the append-only log.
//!
//! Events are never updated or deleted. Pagination uses event-id watermarks,
//! so pages stay stable while other writers append.

use chrono::{SubsecRound, Utc};
use evbus_core::{Event, EventPage, EventQuery, Order, decode_cursor, encode_cursor};
use rusqlite::types::Value;
use rusqlite::{Connection, params, params_from_iter};
use tracing::{debug, warn};

use crate::errors::Result;
use crate::sqlite::row_helpers::{self, format_timestamp, parse_timestamp};

const TABLE: &str = "events";

/// Event repository. Stateless; every method takes `&Connection`.
pub struct EventRepo;

impl EventRepo {
    /// Insert one event and return it with its assigned id and timestamp.
    ///
    /// Attribution defaults are the caller's concern.
    pub fn append(
        conn: &Connection,
        event_type: &str,
        payload: &str,
        origin_session_id: &str,
        channel: &str,
    ) -> Result<Event> {
        let timestamp = Utc::now().trunc_subsecs(6);
        let _ = conn.execute(
            "INSERT INTO events (event_type, payload, session_id, timestamp, channel)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event_type,
                payload,
                origin_session_id,
                format_timestamp(timestamp),
                channel
            ],
        )?;
        Ok(Event {
            id: conn.last_insert_rowid(),
            event_type: event_type.to_string(),
            payload: payload.to_string(),
            origin_session_id: origin_session_id.to_string(),
            timestamp,
            channel: channel.to_string(),
        })
    }

    /// Read one page of events.
    ///
    /// A missing or malformed cursor starts from the beginning of history in
    /// the requested direction. `desc` continues below the cursor, `asc`
    /// above it. An empty page hands the input cursor back unchanged.
    pub fn query(conn: &Connection, query: &EventQuery) -> Result<EventPage> {
        let mut sql = String::from(
            "SELECT id, event_type, payload, session_id, timestamp, channel FROM events WHERE 1 = 1",
        );
        let mut args: Vec<Value> = Vec::new();

        let bound = query.cursor.as_deref().and_then(|raw| {
            let decoded = decode_cursor(raw);
            if decoded.is_none() {
                warn!(cursor = raw, "malformed cursor, reading from start of history");
            }
            decoded
        });
        if let Some(id) = bound {
            sql.push_str(match query.order {
                Order::Desc => " AND id < ?",
                Order::Asc => " AND id > ?",
            });
            args.push(Value::Integer(id));
        }

        push_in_filter(&mut sql, &mut args, "channel", query.channels.as_deref());
        push_in_filter(&mut sql, &mut args, "event_type", query.types.as_deref());

        sql.push_str(" ORDER BY id ");
        sql.push_str(query.order.as_sql());
        sql.push_str(" LIMIT ?");
        args.push(Value::Integer(i64::from(query.limit)));

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(args))?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            events.push(Self::map_row(row)?);
        }

        let next_cursor = match query.order {
            Order::Desc => events.iter().map(|e| e.id).min(),
            Order::Asc => events.iter().map(|e| e.id).max(),
        }
        .map_or_else(|| query.cursor.clone(), |id| Some(encode_cursor(id)));

        debug!(
            count = events.len(),
            order = %query.order,
            next_cursor = next_cursor.as_deref().unwrap_or(""),
            "queried events"
        );
        Ok(EventPage {
            events,
            next_cursor,
        })
    }

    /// Cursor at the newest event, or `None` when the log is empty.
    pub fn latest_cursor(conn: &Connection) -> Result<Option<String>> {
        let max: Option<i64> = conn.query_row("SELECT MAX(id) FROM events", [], |row| row.get(0))?;
        Ok(max.map(encode_cursor))
    }

    /// Total number of events.
    pub fn count(conn: &Connection) -> Result<i64> {
        Ok(conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> Result<Event> {
        let raw_ts: String = row_helpers::get(row, 4, TABLE, "timestamp")?;
        Ok(Event {
            id: row_helpers::get(row, 0, TABLE, "id")?,
            event_type: row_helpers::get(row, 1, TABLE, "event_type")?,
            payload: row_helpers::get(row, 2, TABLE, "payload")?,
            origin_session_id: row_helpers::get(row, 3, TABLE, "session_id")?,
            timestamp: parse_timestamp(&raw_ts, TABLE, "timestamp")?,
            channel: row_helpers::get(row, 5, TABLE, "channel")?,
        })
    }
}

/// Append `AND column IN (?, ...)` for a non-empty value set.
fn push_in_filter(sql: &mut String, args: &mut Vec<Value>, column: &str, values: Option<&[String]>) {
    let Some(values) = values.filter(|v| !v.is_empty()) else {
        return;
    };
    let placeholders = vec!["?"; values.len()].join(", ");
    sql.push_str(&format!(" AND {column} IN ({placeholders})"));
    args.extend(values.iter().cloned().map(Value::Text));
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
