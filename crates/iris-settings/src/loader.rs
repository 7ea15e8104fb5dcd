//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{IrisSettings, LogFormat};

/// Resolve the path to the settings file (`~/.iris/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".iris").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<IrisSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<IrisSettings> {
    let defaults =
        serde_json::to_value(IrisSettings::default()).map_err(|e| SettingsError::json(path, e))?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|e| SettingsError::io(path, e))?;
        let user: Value = serde_json::from_str(&content).map_err(|e| SettingsError::json(path, e))?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: IrisSettings =
        serde_json::from_value(merged).map_err(|e| SettingsError::json(path, e))?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
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

/// Apply `IRIS_*` environment overrides. Invalid values are ignored.
pub fn apply_env_overrides(settings: &mut IrisSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

fn apply_overrides_from(settings: &mut IrisSettings, lookup: impl Fn(&str) -> Option<String>) {
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = string("IRIS_BACKEND_URL") {
        settings.backend.base_url = v;
    }
    if let Some(v) = checked(&lookup, "IRIS_STREAM_BATCH_SIZE", |v| parse_usize_range(v, 1, 4096)) {
        settings.stream.batch_size = v;
    }
    if let Some(v) = checked(&lookup, "IRIS_CONNECT_TIMEOUT_MS", |v| {
        parse_u64_range(v, 100, 600_000)
    }) {
        settings.backend.connect_timeout_ms = v;
    }
    if let Some(v) = checked(&lookup, "IRIS_IDLE_TIMEOUT_MS", |v| {
        parse_u64_range(v, 100, 3_600_000)
    }) {
        settings.backend.idle_timeout_ms = v;
    }
    if let Some(v) = string("IRIS_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = checked(&lookup, "IRIS_PORT", |v| parse_u16_range(v, 1, 65535)) {
        settings.server.port = v;
    }
    if let Some(v) = string("IRIS_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = checked(&lookup, "IRIS_LOG_FORMAT", parse_log_format) {
        settings.logging.format = v;
    }
}

fn checked<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let val = lookup(name)?;
    let result = parse(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid env var, ignoring");
    }
    result
}

// ── Pure parsing functions ──────────────────────────────────────────────────

pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_log_format(val: &str) -> Option<LogFormat> {
    match val.to_lowercase().as_str() {
        "pretty" => Some(LogFormat::Pretty),
        "json" => Some(LogFormat::Json),
        _ => None,
    }
}
