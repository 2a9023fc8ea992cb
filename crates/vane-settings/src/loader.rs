//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`VaneSettings::default()`]
//! 2. If `~/.vane/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `VANE_*` environment variable overrides (highest priority)
//! 4. Validate the resulting server options
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::VaneSettings;

/// Resolve the path to the settings file (`~/.vane/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".vane").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<VaneSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or options that fail
/// validation are errors.
pub fn load_settings_from_path(path: &Path) -> Result<VaneSettings> {
    let mut settings = read_layered(path)?;
    apply_env_overrides(&mut settings);
    settings
        .server
        .validate()
        .map_err(|e| SettingsError::InvalidValue(e.to_string()))?;
    Ok(settings)
}

fn read_layered(path: &Path) -> Result<VaneSettings> {
    let defaults = serde_json::to_value(VaneSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
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

/// Apply `VANE_*` environment variable overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut VaneSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides using an arbitrary variable lookup.
///
/// Each variable has strict parsing rules:
/// - Integers must be valid and within the specified range
/// - Booleans accept: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`
/// - Invalid values are ignored with a warning (fall back to file/default)
pub fn apply_overrides_from(settings: &mut VaneSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("VANE_HOST") {
        settings.server.default_endpoint.host = v;
    }
    if let Some(v) = env.u16("VANE_PORT", 1, 65535) {
        settings.server.default_endpoint.port = v;
    }
    if let Some(v) = env.bool("VANE_TLS_ENABLED") {
        settings.server.tls_endpoint.enabled = v;
    }
    if let Some(v) = env.u16("VANE_TLS_PORT", 1, 65535) {
        settings.server.tls_endpoint.port = v;
    }
    if let Some(v) = env.string("VANE_TLS_CERT") {
        settings.server.tls_endpoint.certificate_path = Some(v);
    }
    if let Some(v) = env.u64("VANE_BACKLOG", 1, 10_000).and_then(|v| u32::try_from(v).ok()) {
        settings.server.connection_backlog = v;
    }
    if let Some(v) = env.u64("VANE_COMMUNICATION_TIMEOUT_MS", 100, 600_000) {
        settings.server.communication_timeout_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("VANE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("VANE_LOG_JSON") {
        settings.logging.json = v;
    }

    // ── Shutdown ────────────────────────────────────────────────────
    if let Some(v) = env.u64("VANE_DRAIN_TIMEOUT_MS", 0, 600_000) {
        settings.shutdown.drain_timeout_ms = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

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

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = (self.lookup)(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }
}
