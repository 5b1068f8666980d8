//! # evbus-store
//!
//! Persistence and session lifecycle for the agent event bus.
//!
//! - **Event log**: append-only, id-ordered, paged by event-id cursors in
//!   either direction, filterable by channel and type.
//! - **Session registry**: dedup by `(machine, client_key)`, soft delete,
//!   lazy stale sweep, resumable poll bookmarks.
//! - **Migrations**: ordered, transactional, applied when the store opens.
//! - **Liveness**: local sessions whose process has exited are evicted on listing.
//!
//! [`Storage`] is the handle the RPC layer holds. It is passed explicitly;
//! there is no global instance.

#![deny(unsafe_code)]

pub mod errors;
pub mod liveness;
pub mod sqlite;
pub mod storage;

pub use errors::{Result, StoreError};
pub use liveness::{LivenessProbe, ProcessProbe, local_machine};
pub use sqlite::{ConnectionConfig, Database};
pub use storage::{
    ChannelInfo, PollRequest, PublishRequest, RegistrationOutcome, SESSION_REGISTERED,
    SESSION_UNREGISTERED, Storage, StorageConfig,
};
