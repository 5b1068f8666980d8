//! Session records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channel::Channel;
use crate::ids::SessionId;
use crate::naming::sanitize_label;

/// A client's registered presence on the bus.
///
/// Rows are updated in place (heartbeat, bookmark, re-registration) and
/// soft-deleted via `deleted_at`; they are never physically removed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Stable identifier: the client key when one was given, else a generated token.
    pub id: SessionId,
    /// Human-friendly label, never used for addressing.
    pub display_name: String,
    /// Caller-chosen label, replaced on re-registration.
    pub name: String,
    /// Host the client runs on.
    pub machine: String,
    /// Working directory at registration.
    pub cwd: String,
    /// Repo name derived from `cwd`, sanitized at write time.
    pub repo: String,
    /// First registration time.
    pub registered_at: DateTime<Utc>,
    /// Last sign of life; drives the stale sweep.
    pub last_heartbeat: DateTime<Utc>,
    /// External identifier; with `machine` forms the dedup key.
    pub client_key: Option<String>,
    /// Last event-log position this session observed.
    pub last_cursor: Option<String>,
    /// Soft-delete marker. `None` means active.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Project label: the stored repo, else the basename of `cwd`.
    pub fn project_name(&self) -> String {
        if !self.repo.is_empty() {
            return self.repo.clone();
        }
        let basename = self.cwd.trim_end_matches('/').rsplit('/').next().unwrap_or("");
        if basename.is_empty() {
            "unknown".to_string()
        } else {
            sanitize_label(basename)
        }
    }

    /// Channels this session is implicitly addressed by.
    pub fn implicit_channels(&self) -> Vec<Channel> {
        vec![
            Channel::All,
            Channel::session(self.id.as_str()),
            Channel::repo(&self.repo),
            Channel::machine(&self.machine),
        ]
    }
}
