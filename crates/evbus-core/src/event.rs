//! Event log entries and query shapes.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Attribution used when a publisher gives no session id.
pub const ANONYMOUS_ORIGIN: &str = "anonymous";

/// An immutable fact in the append-only log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Strictly increasing, assigned at insert. Sole ordering key.
    pub id: i64,
    /// Caller-defined category.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Opaque content.
    pub payload: String,
    /// Publisher attribution, `"anonymous"` when unknown.
    pub origin_session_id: String,
    /// Insertion time.
    pub timestamp: DateTime<Utc>,
    /// Advisory routing label.
    pub channel: String,
}

/// Pagination direction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    /// Oldest first; continuations move toward newer events.
    Asc,
    /// Newest first; continuations move toward older events.
    #[default]
    Desc,
}

impl Order {
    /// SQL keyword for `ORDER BY id`.
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Asc => f.write_str("asc"),
            Self::Desc => f.write_str("desc"),
        }
    }
}

impl FromStr for Order {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(format!("unknown order: {other}")),
        }
    }
}

/// Parameters for a page of events.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventQuery {
    /// Opaque position from a previous page. `None` or garbage means start of history.
    pub cursor: Option<String>,
    /// Maximum batch size.
    pub limit: u32,
    /// Keep only events whose channel is in this set.
    pub channels: Option<Vec<String>>,
    /// Keep only events whose type is in this set.
    pub types: Option<Vec<String>>,
    /// Direction.
    pub order: Order,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            cursor: None,
            limit: 50,
            channels: None,
            types: None,
            order: Order::Desc,
        }
    }
}

impl EventQuery {
    /// Query starting at `cursor`.
    #[must_use]
    pub fn after(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    /// Set the batch size.
    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Set the direction.
    #[must_use]
    pub fn order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    /// Restrict to channels.
    #[must_use]
    pub fn channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channels = Some(channels.into_iter().map(Into::into).collect());
        self
    }

    /// Restrict to event types.
    #[must_use]
    pub fn types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types = Some(types.into_iter().map(Into::into).collect());
        self
    }
}

/// One page of events plus the continuation cursor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPage {
    /// Events in the requested order.
    pub events: Vec<Event>,
    /// Min id of the batch for `desc`, max id for `asc`; the input cursor when empty.
    pub next_cursor: Option<String>,
}

impl EventPage {
    /// Highest event id in the batch.
    pub fn high_water_mark(&self) -> Option<i64> {
        self.events.iter().map(|e| e.id).max()
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ALL;

    fn event(id: i64) -> Event {
        Event {
            id,
            event_type: "t".into(),
            payload: String::new(),
            origin_session_id: ANONYMOUS_ORIGIN.into(),
            timestamp: Utc::now(),
            channel: ALL.to_string(),
        }
    }

    #[test]
    fn order_parses_case_insensitively() {
        assert_eq!("ASC".parse::<Order>().unwrap(), Order::Asc);
        assert_eq!("desc".parse::<Order>().unwrap(), Order::Desc);
        assert!("sideways".parse::<Order>().is_err());
    }

    #[test]
    fn order_defaults_to_desc() {
        assert_eq!(Order::default(), Order::Desc);
        assert_eq!(EventQuery::default().order, Order::Desc);
    }

    #[test]
    fn order_sql_keyword() {
        assert_eq!(Order::Asc.as_sql(), "ASC");
        assert_eq!(Order::Desc.as_sql(), "DESC");
    }

    #[test]
    fn query_builder() {
        let q = EventQuery::default()
            .after("7")
            .limit(10)
            .order(Order::Asc)
            .channels(["repo:x"])
            .types(["task_completed", "help_needed"]);
        assert_eq!(q.cursor.as_deref(), Some("7"));
        assert_eq!(q.limit, 10);
        assert_eq!(q.channels.unwrap(), ["repo:x"]);
        assert_eq!(q.types.unwrap().len(), 2);
    }

    #[test]
    fn high_water_mark_is_max_regardless_of_order() {
        let page = EventPage {
            events: vec![event(9), event(4), event(7)],
            next_cursor: Some("4".into()),
        };
        assert_eq!(page.high_water_mark(), Some(9));

        let empty = EventPage {
            events: vec![],
            next_cursor: None,
        };
        assert_eq!(empty.high_water_mark(), None);
        assert!(empty.is_empty());
    }

    #[test]
    fn event_serializes_type_field() {
        let json = serde_json::to_value(event(1)).unwrap();
        assert_eq!(json["type"], "t");
        assert_eq!(json["originSessionId"], "anonymous");
        assert_eq!(json["channel"], "all");
    }
}
