//! Channel labels.
//!
//! Channels are advisory routing hints. Every session can read every event;
//! filtering by channel is something a reader opts into.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Broadcast channel name.
pub const ALL: &str = "all";

/// A parsed channel label.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Broadcast to everyone.
    #[default]
    All,
    /// Direct message to one session (`session:<id>`).
    Session(String),
    /// Everyone working in a repo (`repo:<name>`).
    Repo(String),
    /// Everyone on a host (`machine:<name>`).
    Machine(String),
    /// Any other label, stored verbatim.
    Custom(String),
}

/// A channel that uses a known prefix but has no value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// `session:`, `repo:` or `machine:` with nothing after the colon.
    #[error("invalid {kind} channel '{raw}': expected '{kind}:<value>'")]
    EmptyValue {
        /// The prefix that was used.
        kind: &'static str,
        /// The raw label.
        raw: String,
    },
}

impl Channel {
    /// Direct-message channel for a session.
    pub fn session(id: impl Into<String>) -> Self {
        Self::Session(id.into())
    }

    /// Repo channel.
    pub fn repo(name: impl Into<String>) -> Self {
        Self::Repo(name.into())
    }

    /// Machine channel.
    pub fn machine(name: impl Into<String>) -> Self {
        Self::Machine(name.into())
    }

    /// Check that a known prefix carries a value.
    pub fn validate(raw: &str) -> Result<Self, ChannelError> {
        let channel = Self::from(raw);
        let (kind, value) = match &channel {
            Self::Session(v) => ("session", v),
            Self::Repo(v) => ("repo", v),
            Self::Machine(v) => ("machine", v),
            Self::All | Self::Custom(_) => return Ok(channel),
        };
        if value.is_empty() {
            return Err(ChannelError::EmptyValue {
                kind,
                raw: raw.to_string(),
            });
        }
        Ok(channel)
    }
}

impl From<&str> for Channel {
    fn from(raw: &str) -> Self {
        if raw == ALL {
            return Self::All;
        }
        match raw.split_once(':') {
            Some(("session", v)) => Self::Session(v.to_string()),
            Some(("repo", v)) => Self::Repo(v.to_string()),
            Some(("machine", v)) => Self::Machine(v.to_string()),
            _ => Self::Custom(raw.to_string()),
        }
    }
}

impl FromStr for Channel {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str(ALL),
            Self::Session(v) => write!(f, "session:{v}"),
            Self::Repo(v) => write!(f, "repo:{v}"),
            Self::Machine(v) => write!(f, "machine:{v}"),
            Self::Custom(v) => f.write_str(v),
        }
    }
}
