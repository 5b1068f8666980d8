//! # evbus-core
//!
//! Domain types shared by every layer of the agent event bus.
//!
//! - [`Session`]: a client's registered presence (dedup key, bookmark, soft-delete marker)
//! - [`Event`]: an immutable entry in the append-only log
//! - [`Channel`]: advisory routing label attached to events
//! - cursor codec: event-id watermarks used for resumable pagination
//!
//! This crate does no I/O. Persistence lives in `evbus-store`.

#![deny(unsafe_code)]

pub mod channel;
pub mod cursor;
pub mod event;
pub mod ids;
pub mod naming;
pub mod session;

pub use channel::{Channel, ChannelError};
pub use cursor::{decode_cursor, encode_cursor};
pub use event::{ANONYMOUS_ORIGIN, Event, EventPage, EventQuery, Order};
pub use ids::SessionId;
pub use naming::{extract_repo_from_cwd, generate_display_name, sanitize_label};
pub use session::Session;
