//! # evbus-telemetry
//!
//! Installs the process-wide `tracing` subscriber: an [`EnvFilter`] built from
//! the configured level plus per-module overrides (`RUST_LOG` wins when set),
//! and a `fmt` layer writing human-readable or JSON lines to stderr or a file.
//!
//! Module levels can be changed at runtime through [`TelemetryGuard`].

#![deny(unsafe_code)]

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use evbus_settings::LoggingSettings;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, reload};

type FilteredRegistry = Layered<reload::Layer<EnvFilter, Registry>, Registry>;

/// Errors raised while configuring telemetry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A configured level name is not a tracing level.
    #[error("invalid log level '{0}'")]
    InvalidLevel(String),
    /// The log file could not be opened.
    #[error("failed to open log file {path}: {source}")]
    LogFile {
        /// Log file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// A global subscriber is already installed.
    #[error("failed to install subscriber: {0}")]
    Init(String),
    /// The filter could not be swapped at runtime.
    #[error("failed to reload filter: {0}")]
    Reload(String),
}

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by `RUST_LOG`.
    pub log_level: Level,
    /// Per-module level overrides (e.g. `evbus_store` => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines.
    pub json: bool,
    /// Append to this file instead of writing to stderr.
    pub log_file: Option<PathBuf>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
            log_file: None,
        }
    }
}

impl TryFrom<&LoggingSettings> for TelemetryConfig {
    type Error = TelemetryError;

    fn try_from(settings: &LoggingSettings) -> Result<Self, Self::Error> {
        let log_level = parse_level(&settings.level)?;
        let module_levels = settings
            .module_levels
            .iter()
            .map(|(module, level)| Ok((module.clone(), parse_level(level)?)))
            .collect::<Result<Vec<_>, TelemetryError>>()?;
        Ok(Self {
            log_level,
            module_levels,
            json: settings.json,
            log_file: settings.log_file.clone(),
        })
    }
}

fn parse_level(raw: &str) -> Result<Level, TelemetryError> {
    Level::from_str(raw).map_err(|_| TelemetryError::InvalidLevel(raw.to_string()))
}

/// Render the filter directive string, e.g. `info,evbus_store=debug`.
pub fn filter_directives(log_level: Level, module_levels: &[(String, Level)]) -> String {
    let mut filter = log_level.to_string().to_lowercase();
    for (module, level) in module_levels {
        filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    filter
}

/// Handle kept alive for the life of the process.
#[derive(Debug)]
pub struct TelemetryGuard {
    log_level: Level,
    module_levels: Arc<RwLock<Vec<(String, Level)>>>,
    reload_handle: reload::Handle<EnvFilter, Registry>,
    log_file: Option<PathBuf>,
}

impl TelemetryGuard {
    /// Change the log level for a specific module at runtime.
    pub fn set_module_level(&self, module: &str, level: Level) -> Result<(), TelemetryError> {
        let directives = {
            let mut levels = self.module_levels.write();
            if let Some(entry) = levels.iter_mut().find(|(m, _)| m == module) {
                entry.1 = level;
            } else {
                levels.push((module.to_string(), level));
            }
            filter_directives(self.log_level, &levels)
        };
        self.reload_handle
            .reload(EnvFilter::new(directives))
            .map_err(|e| TelemetryError::Reload(e.to_string()))
    }

    /// Current per-module overrides.
    pub fn module_levels(&self) -> Vec<(String, Level)> {
        self.module_levels.read().clone()
    }

    /// File receiving log output, if any.
    pub fn log_file(&self) -> Option<&PathBuf> {
        self.log_file.as_ref()
    }
}

/// Install the global subscriber, reporting failure instead of panicking.
pub fn try_init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let directives = filter_directives(config.log_level, &config.module_levels);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives));
    let (filter_layer, reload_handle) = reload::Layer::new(env_filter);

    let writer = match &config.log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|source| TelemetryError::LogFile {
                    path: path.clone(),
                    source,
                })?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| TelemetryError::LogFile {
                    path: path.clone(),
                    source,
                })?;
            BoxMakeWriter::new(std::sync::Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer(&config, writer))
        .try_init()
        .map_err(|e| TelemetryError::Init(e.to_string()))?;

    Ok(TelemetryGuard {
        log_level: config.log_level,
        module_levels: Arc::new(RwLock::new(config.module_levels)),
        reload_handle,
        log_file: config.log_file,
    })
}

/// Install the global subscriber. Call once at startup.
///
/// Falls back to no subscriber (and a note on stderr) if installation fails.
pub fn init_telemetry(config: TelemetryConfig) -> Option<TelemetryGuard> {
    match try_init_telemetry(config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("evbus-telemetry: {e}");
            None
        }
    }
}

fn fmt_layer(
    config: &TelemetryConfig,
    writer: BoxMakeWriter,
) -> Box<dyn Layer<FilteredRegistry> + Send + Sync + 'static> {
    let base = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(writer);
    if config.json {
        base.json().with_span_list(true).boxed()
    } else {
        base.with_ansi(config.log_file.is_none()).boxed()
    }
}
