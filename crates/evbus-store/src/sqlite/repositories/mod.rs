//! Repository implementations for `SQLite` database operations.
//!
//! Each repository is a stateless struct whose methods take a `&Connection`,
//! so the same calls work on a plain connection or inside a transaction.

pub mod event;
pub mod session;

pub use event::EventRepo;
pub use session::SessionRepo;
