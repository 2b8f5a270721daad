//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`Settings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{DatabaseKind, RunMode, Settings};

/// Env var naming an explicit settings file.
pub const CONFIG_ENV: &str = "RELAY_CONFIG";
/// File looked up in the working directory when nothing else is given.
pub const DEFAULT_FILE_NAME: &str = "relay.json";

/// An environment override whose value did not parse and was ignored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RejectedOverride {
    pub key: &'static str,
    pub value: String,
}

/// Loaded settings plus what happened while loading them.
///
/// Loading runs before the tracing subscriber exists, so the notes are kept
/// here and emitted by [`LoadedSettings::log`] afterwards.
#[derive(Debug)]
pub struct LoadedSettings {
    pub settings: Settings,
    /// The file that was merged, if one existed.
    pub source: Option<PathBuf>,
    pub rejected: Vec<RejectedOverride>,
}

impl LoadedSettings {
    pub fn log(&self) {
        match &self.source {
            Some(path) => debug!(?path, "loaded settings from file"),
            None => debug!("no settings file, using defaults"),
        }
        for rejected in &self.rejected {
            warn!(key = rejected.key, value = %rejected.value, "invalid env var, ignoring");
        }
    }
}

/// Pick the settings file: explicit path, then `RELAY_CONFIG`, then `./relay.json`.
pub fn resolve_settings_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Some(path) = read_env_string(CONFIG_ENV) {
        return PathBuf::from(path);
    }
    PathBuf::from(DEFAULT_FILE_NAME)
}

/// Load settings with env var overrides.
///
/// An explicitly requested file must exist; the implicit `./relay.json` is optional.
pub fn load_settings(explicit: Option<&Path>) -> Result<LoadedSettings> {
    let path = resolve_settings_path(explicit);
    if explicit.is_some() && !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} does not exist", path.display()),
        )
        .into());
    }
    load_settings_from_path(&path)
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<LoadedSettings> {
    let mut settings = merge_file(path)?;
    let rejected = apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(LoadedSettings {
        settings,
        source: path.exists().then(|| path.to_path_buf()),
        rejected,
    })
}

fn merge_file(path: &Path) -> Result<Settings> {
    let defaults = serde_json::to_value(Settings::default())?;

    let merged = if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
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
pub fn apply_env_overrides(settings: &mut Settings) -> Vec<RejectedOverride> {
    apply_overrides_from(settings, |name| std::env::var(name).ok())
}

/// Apply overrides read through `lookup`.
///
/// Invalid values leave the file/default in place and are returned.
pub fn apply_overrides_from(
    settings: &mut Settings,
    lookup: impl Fn(&str) -> Option<String>,
) -> Vec<RejectedOverride> {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let mut rejected = Vec::new();
    let mut reject = |key: &'static str, value: String| {
        rejected.push(RejectedOverride { key, value });
    };

    if let Some(v) = read("SERVER_PORT") {
        match parse_u16_range(&v, 0, 65535) {
            Some(port) => settings.server.port = port,
            None => reject("SERVER_PORT", v),
        }
    }
    if let Some(v) = read("SERVER_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("STATIC_DIR") {
        settings.server.static_dir = PathBuf::from(v);
    }
    if let Some(v) = read("RELAY_MODE") {
        match v.to_lowercase().as_str() {
            "debug" => settings.server.mode = RunMode::Debug,
            "release" => settings.server.mode = RunMode::Release,
            _ => reject("RELAY_MODE", v),
        }
    }
    if let Some(v) = read("DB_TYPE") {
        match v.parse::<DatabaseKind>() {
            Ok(kind) => settings.database.kind = kind,
            Err(_) => reject("DB_TYPE", v),
        }
    }
    if let Some(v) = read("DB_DSN") {
        settings.database.dsn = Some(v);
    }
    if let Some(v) = read("RELAY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("RELAY_LOG_JSON") {
        match parse_bool(&v) {
            Some(json) => settings.logging.json = json,
            None => reject("RELAY_LOG_JSON", v),
        }
    }
    rejected
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

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
