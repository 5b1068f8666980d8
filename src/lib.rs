//! # agent-event-bus
//!
//! Session registry and append-only event log shared by concurrent agent
//! processes on one or more machines.
//!
//! [`EventBus::open`] resolves the database location (adopting a database
//! left at a legacy path), runs pending migrations and hands back the
//! [`Storage`] the RPC layer works against. Logging is installed separately
//! with [`init_logging`].

#![deny(unsafe_code)]

pub mod bootstrap;

pub use bootstrap::{BootstrapError, EventBus, init_logging, relocate_legacy_db};
pub use evbus_core as core;
pub use evbus_settings::{BusSettings, load_settings};
pub use evbus_store::{
    ChannelInfo, LivenessProbe, PollRequest, PublishRequest, RegistrationOutcome, Storage,
    StoreError,
};
