//! The storage facade consumed by the RPC layer.
//!
//! [`Storage`] owns the database handle, the liveness probe, and the limits
//! from settings. Every public operation runs under the connection lock, and
//! everything that writes runs in its own `BEGIN IMMEDIATE` transaction, so
//! the registration lookup-then-insert cannot race another registration.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use evbus_core::channel::ALL;
use evbus_core::{
    ANONYMOUS_ORIGIN, Channel, Event, EventPage, EventQuery, Order, Session, SessionId,
    encode_cursor, extract_repo_from_cwd, generate_display_name,
};
use evbus_settings::{BusSettings, DEFAULT_SESSION_TIMEOUT_SECS};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::errors::Result;
use crate::liveness::{LivenessProbe, ProcessProbe, local_machine};
use crate::sqlite::{ConnectionConfig, Database, EventRepo, SessionRepo};

/// Event type appended when a new session registers.
pub const SESSION_REGISTERED: &str = "session_registered";
/// Event type appended when a session unregisters.
pub const SESSION_UNREGISTERED: &str = "session_unregistered";

/// Limits and timeouts applied by [`Storage`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageConfig {
    /// Heartbeat age after which a session is swept.
    pub session_timeout_secs: u64,
    /// Poll batch size when the caller gives none.
    pub default_limit: u32,
    /// Upper bound on a poll batch.
    pub max_limit: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
            default_limit: 50,
            max_limit: 1000,
        }
    }
}

impl From<&BusSettings> for StorageConfig {
    fn from(settings: &BusSettings) -> Self {
        Self {
            session_timeout_secs: settings.storage.session_timeout_secs,
            default_limit: settings.events.default_limit,
            max_limit: settings.events.max_limit,
        }
    }
}

/// Result of [`Storage::register_or_resume`].
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationOutcome {
    /// The new or resumed session.
    pub session: Session,
    /// Whether an existing session was resumed.
    pub resumed: bool,
    /// Where the caller should start polling. A forward position: read past
    /// it with `resume` or `Order::Asc`; a `desc` read below it returns history.
    pub cursor: Option<String>,
    /// Active sessions after registration.
    pub active_sessions: i64,
}

/// Input to [`Storage::publish`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    /// Caller-defined category.
    pub event_type: String,
    /// Opaque content.
    pub payload: String,
    /// Publisher; heartbeat-refreshed when given.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Routing label, `all` when absent.
    #[serde(default)]
    pub channel: Option<String>,
}

/// Input to [`Storage::poll`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollRequest {
    /// Position from registration or a previous poll.
    pub cursor: Option<String>,
    /// Batch size, clamped to `[1, max_limit]`.
    pub limit: Option<u32>,
    /// Poller; heartbeat-refreshed and bookmarked when given.
    pub session_id: Option<String>,
    /// Direction.
    pub order: Order,
    /// Only events on this channel.
    pub channel: Option<String>,
    /// Start from the session's bookmark when no cursor is given.
    pub resume: bool,
    /// Only events of these types.
    pub types: Option<Vec<String>>,
}

/// A channel and how many live sessions are implicitly on it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChannelInfo {
    /// Channel label.
    pub channel: String,
    /// Live sessions addressed by it.
    pub subscribers: usize,
}

/// Persistence engine: event log plus session registry.
#[derive(Clone)]
pub struct Storage {
    db: Database,
    config: StorageConfig,
    probe: Arc<dyn LivenessProbe>,
    local_machine: String,
}

impl Storage {
    /// Build a storage facade from its parts.
    pub fn new(
        db: Database,
        config: StorageConfig,
        probe: Arc<dyn LivenessProbe>,
        local_machine: impl Into<String>,
    ) -> Self {
        Self {
            db,
            config,
            probe,
            local_machine: local_machine.into(),
        }
    }

    /// Open the database named by settings with the OS process probe.
    pub fn open(settings: &BusSettings) -> Result<Self> {
        let db = Database::open(
            &settings.storage.db_path,
            &ConnectionConfig {
                busy_timeout_ms: settings.storage.busy_timeout_ms,
            },
        )?;
        Ok(Self::new(
            db,
            StorageConfig::from(settings),
            Arc::new(ProcessProbe),
            local_machine(),
        ))
    }

    /// Underlying database handle.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Limits in effect.
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Host name sessions are compared against for liveness checks.
    pub fn local_machine(&self) -> &str {
        &self.local_machine
    }

    // ─────────────────────────────────────────────────────────────────────
    // Event log
    // ─────────────────────────────────────────────────────────────────────

    /// Append one event. Attribution defaults are the caller's concern.
    #[instrument(skip(self, payload))]
    pub fn append(
        &self,
        event_type: &str,
        payload: &str,
        origin_session_id: &str,
        channel: &str,
    ) -> Result<Event> {
        self.db
            .with_tx(|conn| EventRepo::append(conn, event_type, payload, origin_session_id, channel))
    }

    /// Read one page of events.
    #[instrument(skip(self, query), fields(cursor = ?query.cursor, limit = query.limit, order = %query.order))]
    pub fn query(&self, query: &EventQuery) -> Result<EventPage> {
        self.db.with_conn(|conn| EventRepo::query(conn, query))
    }

    /// Cursor at the newest event, or `None` when the log is empty.
    pub fn latest_cursor(&self) -> Result<Option<String>> {
        self.db.with_conn(EventRepo::latest_cursor)
    }

    /// Publish an event on behalf of a caller.
    ///
    /// Refreshes the sender's heartbeat, attributes anonymous publishes to
    /// `anonymous`, and defaults the channel to `all`. Malformed channels are
    /// accepted with a warning.
    #[instrument(skip(self, request), fields(event_type = %request.event_type, session_id = ?request.session_id))]
    pub fn publish(&self, request: &PublishRequest) -> Result<Event> {
        let origin = request
            .session_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .unwrap_or(ANONYMOUS_ORIGIN);
        let channel = request
            .channel
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or(ALL);
        if let Err(e) = Channel::validate(channel) {
            warn!(error = %e, "publishing to malformed channel");
        }

        let now = now();
        let event = self.db.with_tx(|conn| {
            if origin != ANONYMOUS_ORIGIN {
                let _ = SessionRepo::touch_heartbeat(conn, origin, now)?;
            }
            EventRepo::append(conn, &request.event_type, &request.payload, origin, channel)
        })?;
        debug!(event_id = event.id, channel, "event published");
        Ok(event)
    }

    /// Poll for events on behalf of a caller.
    ///
    /// Refreshes the poller's heartbeat, sweeps stale sessions, then reads one
    /// page. Every session sees every event; only an explicit `channel`
    /// narrows the page. After a non-empty page the poller's bookmark moves up
    /// to the page's highest id.
    ///
    /// With `resume` and no explicit cursor, the page holds the oldest events
    /// above the poller's bookmark, listed in the requested order, and
    /// `next_cursor` is the new high-water mark whatever the order.
    #[instrument(skip(self, request), fields(session_id = ?request.session_id, order = %request.order))]
    pub fn poll(&self, request: &PollRequest) -> Result<EventPage> {
        let session_id = request
            .session_id
            .as_deref()
            .filter(|id| !id.is_empty() && *id != ANONYMOUS_ORIGIN);
        let limit = request
            .limit
            .unwrap_or(self.config.default_limit)
            .clamp(1, self.config.max_limit.max(1));
        let now = now();

        self.db.with_tx(|conn| {
            if let Some(id) = session_id {
                let _ = SessionRepo::touch_heartbeat(conn, id, now)?;
            }

            let bookmark = match (request.resume, &request.cursor, session_id) {
                (true, None, Some(id)) => SessionRepo::last_cursor(conn, id)?,
                _ => None,
            };

            let _ = self.sweep_in(conn, now)?;

            let query = EventQuery {
                cursor: bookmark.clone().or_else(|| request.cursor.clone()),
                limit,
                channels: request
                    .channel
                    .clone()
                    .filter(|c| !c.is_empty())
                    .map(|c| vec![c]),
                types: request.types.clone(),
                order: if bookmark.is_some() {
                    Order::Asc
                } else {
                    request.order
                },
            };
            let mut page = EventRepo::query(conn, &query)?;
            if bookmark.is_some() && request.order == Order::Desc {
                page.events.reverse();
            }

            if let (Some(id), Some(high_water)) = (session_id, page.high_water_mark()) {
                let _ = SessionRepo::advance_cursor(conn, id, high_water)?;
            }
            Ok(page)
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Session registry
    // ─────────────────────────────────────────────────────────────────────

    /// Register a session, or resume the active one with the same
    /// `(machine, client_key)`.
    ///
    /// A resumed session keeps its id and gets its bookmark (or the log head)
    /// as the starting cursor. A new session takes the client key as its id
    /// when that id is free, announces itself with a `session_registered`
    /// event, and is bookmarked at that event. Either way the session's
    /// bookmark equals the returned cursor, so `poll` with `resume` sees only
    /// newer events in any order.
    #[instrument(skip(self))]
    pub fn register_or_resume(
        &self,
        name: &str,
        machine: &str,
        cwd: &str,
        client_key: Option<&str>,
    ) -> Result<RegistrationOutcome> {
        let key = client_key.filter(|k| !k.is_empty());
        let now = now();

        let outcome = self.db.with_tx(|conn| {
            let _ = self.sweep_in(conn, now)?;

            if let Some(key) = key {
                if let Some(mut existing) = SessionRepo::find_by_dedup_key(conn, machine, key)? {
                    existing.name = name.to_string();
                    existing.last_heartbeat = now;
                    if existing.last_cursor.is_none() {
                        existing.last_cursor = EventRepo::latest_cursor(conn)?;
                    }
                    SessionRepo::upsert(conn, &existing)?;
                    let cursor = existing.last_cursor.clone();
                    return Ok(RegistrationOutcome {
                        session: existing,
                        resumed: true,
                        cursor,
                        active_sessions: SessionRepo::count(conn)?,
                    });
                }
            }

            let id = match key {
                Some(key) => {
                    if SessionRepo::get(conn, key)?.is_some() {
                        warn!(client_key = key, "client key names an active session elsewhere, generating id");
                        SessionId::generate()
                    } else {
                        SessionId::from_raw(key)
                    }
                }
                None => SessionId::generate(),
            };
            let mut session = Session {
                id,
                display_name: generate_display_name(),
                name: name.to_string(),
                machine: machine.to_string(),
                cwd: cwd.to_string(),
                repo: extract_repo_from_cwd(cwd),
                registered_at: now,
                last_heartbeat: now,
                client_key: key.map(str::to_string),
                last_cursor: None,
                deleted_at: None,
            };
            let announcement = EventRepo::append(
                conn,
                SESSION_REGISTERED,
                &format!("{name} started on {machine} in {cwd}"),
                session.id.as_str(),
                ALL,
            )?;
            session.last_cursor = Some(encode_cursor(announcement.id));
            SessionRepo::upsert(conn, &session)?;

            Ok(RegistrationOutcome {
                cursor: session.last_cursor.clone(),
                session,
                resumed: false,
                active_sessions: SessionRepo::count(conn)?,
            })
        })?;

        if outcome.resumed {
            info!(session_id = %outcome.session.id, display_name = %outcome.session.display_name, "session resumed");
        } else {
            info!(session_id = %outcome.session.id, display_name = %outcome.session.display_name, "session registered");
        }
        Ok(outcome)
    }

    /// Active sessions, most recent heartbeat first.
    ///
    /// Sweeps stale sessions, then soft-deletes any local session whose
    /// process the liveness probe reports as gone.
    #[instrument(skip(self))]
    pub fn list_active_sessions(&self) -> Result<Vec<Session>> {
        let now = now();
        self.db.with_tx(|conn| {
            let _ = self.sweep_in(conn, now)?;
            let mut live = Vec::new();
            for session in SessionRepo::list_active(conn)? {
                let is_local = session.machine == self.local_machine;
                if self.probe.is_alive(session.client_key.as_deref(), is_local) {
                    live.push(session);
                } else {
                    let _ = SessionRepo::delete(conn, session.id.as_str(), now)?;
                    info!(session_id = %session.id, "evicted session whose process is gone");
                }
            }
            Ok(live)
        })
    }

    /// Active session by id.
    pub fn get_session(&self, id: &str) -> Result<Option<Session>> {
        self.db.with_conn(|conn| SessionRepo::get(conn, id))
    }

    /// Active session by dedup key.
    pub fn find_session_by_client_key(
        &self,
        machine: &str,
        client_key: &str,
    ) -> Result<Option<Session>> {
        self.db
            .with_conn(|conn| SessionRepo::find_by_dedup_key(conn, machine, client_key))
    }

    /// Soft-delete a session and announce it. Returns the session, or `None`
    /// if no active session has this id.
    #[instrument(skip(self))]
    pub fn unregister(&self, id: &str) -> Result<Option<Session>> {
        let now = now();
        self.db.with_tx(|conn| {
            let Some(session) = SessionRepo::get(conn, id)? else {
                return Ok(None);
            };
            Self::unregister_in(conn, session, now).map(Some)
        })
    }

    /// Unregister the active session with this client key on the local machine.
    #[instrument(skip(self))]
    pub fn unregister_by_client_key(&self, client_key: &str) -> Result<Option<Session>> {
        let now = now();
        self.db.with_tx(|conn| {
            let Some(session) =
                SessionRepo::find_by_dedup_key(conn, &self.local_machine, client_key)?
            else {
                return Ok(None);
            };
            Self::unregister_in(conn, session, now).map(Some)
        })
    }

    /// Refresh a session's heartbeat. `false` when no active session matches.
    pub fn touch_heartbeat(&self, id: &str) -> Result<bool> {
        let now = now();
        self.db.with_conn(|conn| SessionRepo::touch_heartbeat(conn, id, now))
    }

    /// Overwrite a session's bookmark. `false` when no active session matches.
    pub fn update_cursor(&self, id: &str, cursor: &str) -> Result<bool> {
        self.db.with_conn(|conn| SessionRepo::update_cursor(conn, id, cursor))
    }

    /// Soft-delete sessions past the heartbeat timeout.
    pub fn sweep_stale_sessions(&self) -> Result<usize> {
        let now = now();
        self.db.with_tx(|conn| self.sweep_in(conn, now))
    }

    /// Number of active sessions.
    pub fn session_count(&self) -> Result<i64> {
        self.db.with_conn(SessionRepo::count)
    }

    /// Channels addressed by live sessions, with subscriber counts, sorted by name.
    pub fn list_channels(&self) -> Result<Vec<ChannelInfo>> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for session in self.list_active_sessions()? {
            for channel in session.implicit_channels() {
                *counts.entry(channel.to_string()).or_default() += 1;
            }
        }
        Ok(counts
            .into_iter()
            .map(|(channel, subscribers)| ChannelInfo {
                channel,
                subscribers,
            })
            .collect())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internal
    // ─────────────────────────────────────────────────────────────────────

    fn sweep_in(&self, conn: &Connection, now: DateTime<Utc>) -> Result<usize> {
        let swept = SessionRepo::sweep_stale(conn, self.config.session_timeout_secs, now)?;
        if swept > 0 {
            info!(swept, timeout_secs = self.config.session_timeout_secs, "swept stale sessions");
        }
        Ok(swept)
    }

    fn unregister_in(conn: &Connection, mut session: Session, now: DateTime<Utc>) -> Result<Session> {
        let _ = SessionRepo::delete(conn, session.id.as_str(), now)?;
        let _ = EventRepo::append(
            conn,
            SESSION_UNREGISTERED,
            &format!("{} ended on {}", session.name, session.machine),
            session.id.as_str(),
            ALL,
        )?;
        session.deleted_at = Some(now);
        info!(session_id = %session.id, display_name = %session.display_name, "session unregistered");
        Ok(session)
    }
}

/// Current time at storage precision.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
