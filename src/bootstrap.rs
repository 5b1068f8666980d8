//! Process startup: settings, legacy database relocation, logging, storage.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use evbus_settings::{BusSettings, LoggingSettings, SettingsError, StorageSettings};
use evbus_store::{Storage, StoreError};
use evbus_telemetry::{TelemetryConfig, TelemetryError, TelemetryGuard};
use thiserror::Error;
use tracing::{info, warn};

/// SQLite sidecar files that travel with a relocated database.
const SIDECAR_SUFFIXES: [&str; 2] = ["-wal", "-shm"];

/// Errors raised while bringing the bus up.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Settings could not be loaded.
    #[error(transparent)]
    Settings(#[from] SettingsError),
    /// The store could not be opened or migrated.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Logging could not be installed.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    /// A legacy database could not be moved into place.
    #[error("failed to relocate {from} to {to}: {source}")]
    Relocate {
        /// Legacy location.
        from: PathBuf,
        /// Configured location.
        to: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
}

/// The bus as the RPC layer sees it: resolved settings plus an open store.
#[derive(Clone)]
pub struct EventBus {
    settings: BusSettings,
    storage: Storage,
}

impl EventBus {
    /// Relocate any legacy database, then open the store named by `settings`.
    pub fn open(settings: BusSettings) -> Result<Self, BootstrapError> {
        let _ = relocate_legacy_db(&settings.storage)?;
        let storage = Storage::open(&settings)?;
        let schema_version = storage.database().schema_version()?;
        info!(
            db_path = %settings.storage.db_path.display(),
            schema_version,
            "event bus ready"
        );
        Ok(Self { settings, storage })
    }

    /// Load settings from the user file and environment, then [`open`](Self::open).
    pub fn from_env() -> Result<Self, BootstrapError> {
        Self::open(evbus_settings::load_settings()?)
    }

    /// Settings the bus was opened with.
    pub fn settings(&self) -> &BusSettings {
        &self.settings
    }

    /// The persistence engine.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }
}

/// Install the global subscriber described by the logging settings.
pub fn init_logging(settings: &LoggingSettings) -> Result<TelemetryGuard, BootstrapError> {
    let config = TelemetryConfig::try_from(settings)?;
    Ok(evbus_telemetry::try_init_telemetry(config)?)
}

/// Move the first existing legacy database to `db_path` when nothing is there yet.
///
/// Returns the legacy path that was adopted, if any.
pub fn relocate_legacy_db(storage: &StorageSettings) -> Result<Option<PathBuf>, BootstrapError> {
    let target = &storage.db_path;
    if target.exists() {
        return Ok(None);
    }
    let Some(legacy) = storage
        .legacy_db_paths
        .iter()
        .find(|p| p.as_path() != target.as_path() && p.is_file())
    else {
        return Ok(None);
    };

    let relocate_err = |source| BootstrapError::Relocate {
        from: legacy.clone(),
        to: target.clone(),
        source,
    };
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(relocate_err)?;
    }
    move_file(legacy, target).map_err(relocate_err)?;

    for suffix in SIDECAR_SUFFIXES {
        let from = with_suffix(legacy, suffix);
        if !from.exists() {
            continue;
        }
        let to = with_suffix(target, suffix);
        if let Err(e) = move_file(&from, &to) {
            warn!(from = %from.display(), error = %e, "failed to move database sidecar");
        }
    }

    info!(
        from = %legacy.display(),
        to = %target.display(),
        "relocated legacy database"
    );
    Ok(Some(legacy.clone()))
}

/// Rename, falling back to copy and remove across filesystems.
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    let _ = fs::copy(from, to)?;
    fs::remove_file(from)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_owned();
    raw.push(suffix);
    PathBuf::from(raw)
}
