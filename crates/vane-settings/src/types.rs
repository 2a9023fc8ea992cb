//! Settings types with compiled defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use vane_core::ServerOptions;

/// Root settings document (`~/.vane/settings.json`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VaneSettings {
    /// Options passed to the transport adapter.
    pub server: ServerOptions,
    /// Log output.
    pub logging: LoggingSettings,
    /// Shutdown behaviour.
    pub shutdown: ShutdownSettings,
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

/// Shutdown settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ShutdownSettings {
    /// How long a draining shutdown waits for sessions to finish.
    pub drain_timeout_ms: u64,
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            drain_timeout_ms: 5_000,
        }
    }
}

impl ShutdownSettings {
    /// The drain timeout as a [`Duration`].
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}
