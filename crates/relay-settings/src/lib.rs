//! # relay-settings
//!
//! Configuration for the relay server, loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`Settings::default()`]
//! 2. **Settings file**: JSON, deep-merged over defaults
//! 3. **Environment variables**: `SERVER_PORT`, `STATIC_DIR`, `DB_TYPE`, ... (highest priority)
//!
//! The loaded [`Settings`] value is immutable and handed to the components that
//! need it; nothing reads configuration from globals.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    deep_merge, load_settings, load_settings_from_path, resolve_settings_path, LoadedSettings,
    RejectedOverride,
};
pub use types::*;
