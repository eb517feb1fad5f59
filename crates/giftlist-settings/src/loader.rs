//! Settings loading with deep merge and environment overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RealtimeSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `GIFTLIST_*` environment overrides
//!
//! Invalid environment values are ignored with a warning, leaving the
//! file/default value in place.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{LogFormat, RealtimeSettings};

/// Environment variable naming an explicit settings file.
pub const SETTINGS_PATH_ENV: &str = "GIFTLIST_SETTINGS";

/// Resolve the settings file path: `$GIFTLIST_SETTINGS`, else
/// `~/.giftlist/realtime.json`.
pub fn settings_path() -> PathBuf {
    if let Some(explicit) = std::env::var_os(SETTINGS_PATH_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(explicit);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".giftlist").join("realtime.json")
}

/// Load settings from the default path with environment overrides.
pub fn load_settings() -> Result<RealtimeSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path` with environment overrides.
///
/// A missing file yields defaults; an unreadable or malformed one is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RealtimeSettings> {
    let mut settings = read_layered(path)?;
    apply_overrides(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn read_layered(path: &Path) -> Result<RealtimeSettings> {
    let defaults = serde_json::to_value(RealtimeSettings::default())?;
    let merged = if path.exists() {
        debug!(?path, "loading settings file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "no settings file, using defaults");
        defaults
    };
    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// Objects merge per key, everything else is replaced by `source`, and
/// `null` in `source` keeps the `target` value.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `GIFTLIST_*` overrides read through `lookup`.
///
/// `lookup` is `std::env::var` in production and a map in tests.
pub fn apply_overrides(settings: &mut RealtimeSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = Env(lookup);

    if let Some(v) = env.string("GIFTLIST_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.ranged("GIFTLIST_PORT", 0u16, u16::MAX) {
        settings.server.port = v;
    }
    if let Some(v) = env.ranged("GIFTLIST_HEARTBEAT_INTERVAL_SECS", 1u64, 3_600) {
        settings.server.heartbeat_interval_secs = v;
    }
    if let Some(v) = env.ranged("GIFTLIST_HEARTBEAT_TIMEOUT_SECS", 1u64, 86_400) {
        settings.server.heartbeat_timeout_secs = v;
    }
    if let Some(v) = env.ranged("GIFTLIST_SEND_QUEUE_CAPACITY", 1usize, 65_536) {
        settings.server.send_queue_capacity = v;
    }

    if let Some(v) = env.string("GIFTLIST_JWT_SECRET") {
        settings.auth.jwt_secret = v;
    }
    if let Some(v) = env.string("GIFTLIST_JWT_ISSUER") {
        settings.auth.issuer = Some(v);
    }
    if let Some(v) = env.string("GIFTLIST_JWT_AUDIENCE") {
        settings.auth.audience = Some(v);
    }

    if let Some(v) = env.ranged("GIFTLIST_MAX_CONNECTIONS", 1usize, 1_000_000) {
        settings.limits.max_connections = v;
    }
    if let Some(v) = env.ranged("GIFTLIST_MAX_TOPICS_PER_CONNECTION", 1usize, 100_000) {
        settings.limits.max_topics_per_connection = v;
    }
    if let Some(v) = env.ranged("GIFTLIST_MAX_SUBSCRIBERS_PER_TOPIC", 1usize, 1_000_000) {
        settings.limits.max_subscribers_per_topic = v;
    }

    if let Some(v) = env.string("GIFTLIST_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.string("GIFTLIST_LOG_FORMAT") {
        match parse_log_format(&v) {
            Some(format) => settings.logging.format = format,
            None => warn!(key = "GIFTLIST_LOG_FORMAT", value = %v, "unknown log format, ignoring"),
        }
    }
}

/// Parse a log format name (case-insensitive).
pub fn parse_log_format(val: &str) -> Option<LogFormat> {
    match val.to_ascii_lowercase().as_str() {
        "pretty" | "text" => Some(LogFormat::Pretty),
        "json" => Some(LogFormat::Json),
        _ => None,
    }
}

/// Parse `val` as a number within `min..=max`.
pub fn parse_ranged<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let n: T = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.is_empty())
    }

    fn ranged<T>(&self, key: &str, min: T, max: T) -> Option<T>
    where
        T: std::str::FromStr + PartialOrd,
    {
        let raw = self.string(key)?;
        let parsed = parse_ranged(&raw, min, max);
        if parsed.is_none() {
            warn!(key, value = %raw, "out-of-range or non-numeric env var, ignoring");
        }
        parsed
    }
}
