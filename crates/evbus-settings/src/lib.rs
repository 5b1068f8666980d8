//! # evbus-settings
//!
//! Configuration for the agent event bus, loaded from three layers (in
//! priority order):
//! 1. **Compiled defaults** — [`BusSettings::default()`]
//! 2. **User file** — `~/.claude/contrib/agent-event-bus/settings.json`
//! 3. **Environment variables** — `EVENT_BUS_*` overrides
//!
//! Settings are handed to the store explicitly; there is no global instance.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, load_settings_with, settings_path};
pub use types::*;
