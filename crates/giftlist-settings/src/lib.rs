//! # giftlist-settings
//!
//! Configuration for the realtime server, loaded from three layers (in
//! priority order):
//! 1. **Compiled defaults**: [`RealtimeSettings::default()`]
//! 2. **Settings file**: `~/.giftlist/realtime.json`, or the path in
//!    `GIFTLIST_SETTINGS` (deep-merged over defaults)
//! 3. **Environment variables**: `GIFTLIST_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_overrides, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
