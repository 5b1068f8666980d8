//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`BusSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `EVENT_BUS_*` environment overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{BusSettings, data_dir};

/// Path to the settings file.
pub fn settings_path() -> PathBuf {
    data_dir().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<BusSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<BusSettings> {
    load_settings_with(path, |name| std::env::var(name).ok())
}

/// Load settings reading overrides through `env` instead of the process environment.
pub fn load_settings_with<F>(path: &Path, env: F) -> Result<BusSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = serde_json::to_value(BusSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: BusSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, env);
    validate(&settings)?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment overrides. Invalid values are ignored with a warning.
pub fn apply_env_overrides<F>(settings: &mut BusSettings, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read_string = |name: &str| env(name).filter(|v| !v.is_empty());

    // ── Storage ─────────────────────────────────────────────────────
    if let Some(v) = read_string("EVENT_BUS_DB") {
        // An explicit location never adopts files from the legacy locations.
        settings.storage.db_path = PathBuf::from(v);
        settings.storage.legacy_db_paths.clear();
    }
    if let Some(v) = read_string("EVENT_BUS_SESSION_TIMEOUT") {
        match parse_u64_range(&v, 1, 365 * 86_400) {
            Some(secs) => settings.storage.session_timeout_secs = secs,
            None => warn!(key = "EVENT_BUS_SESSION_TIMEOUT", value = %v, "invalid u64 env var, ignoring"),
        }
    }

    // ── Events ──────────────────────────────────────────────────────
    if let Some(v) = read_string("EVENT_BUS_DEFAULT_LIMIT") {
        match parse_u32_range(&v, 1, settings.events.max_limit) {
            Some(limit) => settings.events.default_limit = limit,
            None => warn!(key = "EVENT_BUS_DEFAULT_LIMIT", value = %v, "invalid u32 env var, ignoring"),
        }
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_string("EVENT_BUS_LOG_LEVEL") {
        if is_level(&v) {
            settings.logging.level = v.to_lowercase();
        } else {
            warn!(key = "EVENT_BUS_LOG_LEVEL", value = %v, "invalid log level env var, ignoring");
        }
    }
    if let Some(v) = read_string("EVENT_BUS_LOG_FILE") {
        settings.logging.log_file = Some(PathBuf::from(v));
    }
    if let Some(v) = read_string("EVENT_BUS_LOG_JSON") {
        match parse_bool(&v) {
            Some(json) => settings.logging.json = json,
            None => warn!(key = "EVENT_BUS_LOG_JSON", value = %v, "invalid boolean env var, ignoring"),
        }
    }
    if read_string("DEV_MODE").is_some() {
        settings.logging.level = "debug".to_string();
    }
}

fn validate(settings: &BusSettings) -> Result<()> {
    if settings.storage.session_timeout_secs == 0 {
        return Err(SettingsError::InvalidValue(
            "storage.sessionTimeoutSecs must be positive".into(),
        ));
    }
    if settings.events.default_limit == 0 {
        return Err(SettingsError::InvalidValue(
            "events.defaultLimit must be positive".into(),
        ));
    }
    if settings.events.default_limit > settings.events.max_limit {
        return Err(SettingsError::InvalidValue(format!(
            "events.defaultLimit ({}) exceeds events.maxLimit ({})",
            settings.events.default_limit, settings.events.max_limit
        )));
    }
    if !is_level(&settings.logging.level) {
        return Err(SettingsError::InvalidValue(format!(
            "logging.level '{}' is not a log level",
            settings.logging.level
        )));
    }
    Ok(())
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u32` within a range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn is_level(val: &str) -> bool {
    matches!(
        val.to_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"storage": {"a": 1, "b": 2}});
        let source = serde_json::json!({"storage": {"a": 10}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["storage"]["a"], 10);
        assert_eq!(merged["storage"]["b"], 2);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1});
        let source = serde_json::json!({"a": null});
        assert_eq!(deep_merge(target, source)["a"], 1);
    }

    // ── load_settings_with ──────────────────────────────────────────

    #[test]
    fn missing_file_returns_defaults() {
        let settings = load_settings_with(Path::new("/nonexistent/settings.json"), no_env).unwrap();
        assert_eq!(settings, BusSettings::default());
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"storage": {"dbPath": "/data/bus.db"}, "events": {"defaultLimit": 20}}"#,
        )
        .unwrap();

        let settings = load_settings_with(&path, no_env).unwrap();
        assert_eq!(settings.storage.db_path, PathBuf::from("/data/bus.db"));
        assert_eq!(settings.storage.session_timeout_secs, 86_400);
        assert_eq!(settings.events.default_limit, 20);
        assert_eq!(settings.events.max_limit, 1000);
    }

    #[test]
    fn invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_matches!(load_settings_with(&path, no_env), Err(SettingsError::Json(_)));
    }

    #[test]
    fn env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"storage": {"dbPath": "/from/file.db"}}"#).unwrap();

        let env = env_from(&[
            ("EVENT_BUS_DB", "/from/env.db"),
            ("EVENT_BUS_SESSION_TIMEOUT", "600"),
            ("EVENT_BUS_LOG_JSON", "yes"),
        ]);
        let settings = load_settings_with(&path, env).unwrap();
        assert_eq!(settings.storage.db_path, PathBuf::from("/from/env.db"));
        assert!(settings.storage.legacy_db_paths.is_empty());
        assert_eq!(settings.storage.session_timeout_secs, 600);
        assert!(settings.logging.json);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let env = env_from(&[
            ("EVENT_BUS_SESSION_TIMEOUT", "soon"),
            ("EVENT_BUS_DEFAULT_LIMIT", "0"),
            ("EVENT_BUS_LOG_LEVEL", "loud"),
            ("EVENT_BUS_LOG_JSON", "maybe"),
        ]);
        let settings = load_settings_with(Path::new("/nonexistent"), env).unwrap();
        assert_eq!(settings, BusSettings::default());
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let env = env_from(&[("EVENT_BUS_DB", "")]);
        let settings = load_settings_with(Path::new("/nonexistent"), env).unwrap();
        assert_eq!(settings.storage.db_path, BusSettings::default().storage.db_path);
    }

    #[test]
    fn dev_mode_forces_debug() {
        let env = env_from(&[("DEV_MODE", "1"), ("EVENT_BUS_LOG_LEVEL", "warn")]);
        let settings = load_settings_with(Path::new("/nonexistent"), env).unwrap();
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn zero_timeout_in_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"storage": {"sessionTimeoutSecs": 0}}"#).unwrap();
        assert_matches!(
            load_settings_with(&path, no_env),
            Err(SettingsError::InvalidValue(_))
        );
    }

    #[test]
    fn default_limit_above_max_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"events": {"defaultLimit": 500, "maxLimit": 100}}"#).unwrap();
        let err = load_settings_with(&path, no_env).unwrap_err();
        assert!(err.to_string().contains("exceeds events.maxLimit"));
    }

    // ── Parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for v in ["true", "1", "YES", "on"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["false", "0", "no", "OFF"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u64_range("10", 1, 100), Some(10));
        assert_eq!(parse_u64_range("0", 1, 100), None);
        assert_eq!(parse_u32_range("101", 1, 100), None);
        assert_eq!(parse_u32_range("-1", 0, 100), None);
    }
}
