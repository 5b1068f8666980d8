//! `SQLite` backend for the event bus.
//!
//! - **[`connection`]**: the shared connection, pragmas, and transaction helper.
//! - **[`migrations`]**: version-tracked schema evolution, applied at open.
//! - **[`repositories`]**: stateless repositories for events and sessions.
//! - **[`row_helpers`]**: column decoding and timestamp formatting.

pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod row_helpers;

pub use connection::{ConnectionConfig, Database, PragmaState, verify_pragmas};
pub use migrations::{current_version, latest_version, run_migrations};
pub use repositories::{EventRepo, SessionRepo};
