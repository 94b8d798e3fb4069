//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`CrossbarSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `CROSSBAR_*` environment variable overrides (highest priority)
//! 4. Clamp inconsistent values with [`CrossbarSettings::validate`]
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::CrossbarSettings;

/// Resolve the default settings file (`~/.crossbar/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".crossbar").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<CrossbarSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<CrossbarSettings> {
    let mut settings = load_file_layers(path)?;
    apply_env_overrides(&mut settings);
    let _ = settings.validate();
    Ok(settings)
}

fn load_file_layers(path: &Path) -> Result<CrossbarSettings> {
    let defaults = serde_json::to_value(CrossbarSettings::default())?;

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

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning and the file/default value stays.
pub fn apply_env_overrides(settings: &mut CrossbarSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from any variable source.
///
/// [`apply_env_overrides`] passes the process environment; tests pass a map.
pub fn apply_overrides<F>(settings: &mut CrossbarSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvSource { lookup };

    // ── Server settings ─────────────────────────────────────────────
    if let Some(v) = env.string("CROSSBAR_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("CROSSBAR_GROUP_A_PORT", 1, 65535) {
        settings.server.group_a_port = v;
    }
    if let Some(v) = env.u16("CROSSBAR_GROUP_B_PORT", 1, 65535) {
        settings.server.group_b_port = v;
    }

    // ── Bridge settings ─────────────────────────────────────────────
    if let Some(v) = env.string("CROSSBAR_WORKER_ADDR") {
        settings.bridge.worker_addr = v;
    }
    if let Some(v) = env.string("CROSSBAR_BRIDGE_LISTEN_ADDR") {
        settings.bridge.listen_addr = v;
    }
    if let Some(v) = env.string("CROSSBAR_BRIDGE_MARKER") {
        settings.bridge.request_marker = v;
    }
    if let Some(v) = env.u64("CROSSBAR_BRIDGE_TIMEOUT_MS", 1, 60_000) {
        settings.bridge.send_timeout_ms = v;
    }

    // ── Reaper / logging ────────────────────────────────────────────
    if let Some(v) = env.u64("CROSSBAR_REAPER_INTERVAL_SECS", 1, 86_400) {
        settings.reaper.interval_secs = v;
    }
    if let Some(v) = env.string("CROSSBAR_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("CROSSBAR_LOG_JSON") {
        settings.logging.json = v;
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

// ── Variable readers ────────────────────────────────────────────────────────

struct EnvSource<F> {
    lookup: F,
}

impl<F> EnvSource<F>
where
    F: Fn(&str) -> Option<String>,
{
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
