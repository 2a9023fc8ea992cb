//! # vane-logging
//!
//! Structured logging with `tracing`.
//!
//! - [`init_subscriber`] for human-readable stderr output
//! - [`init_json_subscriber`] for one-JSON-object-per-line output
//! - [`capture_logs`] for asserting on events in tests
//!
//! Operational state changes (started, stopped, client connected) are
//! reported through these subscribers on a best-effort basis.

#![deny(unsafe_code)]

pub mod test_utils;

pub use test_utils::{CapturedEvent, CapturedLogs, capture_logs};

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber with compact stderr output.
///
/// Call once at application startup. Subsequent calls are no-ops.
/// `RUST_LOG` overrides `level` when set.
pub fn init_subscriber(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    // try_init fails if a global subscriber is already set; that is fine
    let _ = subscriber.try_init();
}

/// Initialize the global tracing subscriber with JSON output on stdout.
///
/// Same idempotence and `RUST_LOG` rules as [`init_subscriber`].
pub fn init_json_subscriber(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_target(true)
        .with_current_span(true)
        .with_span_list(true);

    let _ = subscriber.try_init();
}

/// Pick [`init_json_subscriber`] or [`init_subscriber`] from a flag.
pub fn init(level: &str, json: bool) {
    if json {
        init_json_subscriber(level);
    } else {
        init_subscriber(level);
    }
}
