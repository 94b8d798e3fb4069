//! # crossbar-settings
//!
//! Layered configuration for the crossbar relay.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`CrossbarSettings::default()`]
//! 2. **Settings file**: `~/.crossbar/settings.json` or `--config` (deep-merged)
//! 3. **Environment variables**: `CROSSBAR_*` overrides (highest priority)
//!
//! There is no global instance: the binary loads settings once and passes
//! them to the server.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_path_is_under_home() {
        let path = settings_path();
        assert!(path.ends_with(".crossbar/settings.json"));
    }
}
