//! # vane-settings
//!
//! Configuration management with layered sources for the vane broker.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`VaneSettings::default()`]
//! 2. **User file**: `~/.vane/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `VANE_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides_from, deep_merge, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::{LoggingSettings, ShutdownSettings, VaneSettings};

use std::sync::OnceLock;

/// Global settings singleton.
static SETTINGS: OnceLock<VaneSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// On first call, loads settings from `~/.vane/settings.json` with env var
/// overrides. If loading fails, logs the failure and returns compiled
/// defaults.
pub fn get_settings() -> &'static VaneSettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            VaneSettings::default()
        })
    })
}

/// Initialize the global settings with a specific value.
///
/// Returns the settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: VaneSettings) -> std::result::Result<(), VaneSettings> {
    SETTINGS.set(settings)
}
