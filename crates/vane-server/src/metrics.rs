//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render scrape output. Call once at
/// startup before any metrics are recorded; a second call fails.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across crates.

/// Successful server starts (counter).
pub const SERVER_STARTS_TOTAL: &str = "server_starts_total";
/// Server starts rolled back because the adapter failed (counter).
pub const SERVER_START_FAILURES_TOTAL: &str = "server_start_failures_total";
/// Running-to-stopped transitions (counter).
pub const SERVER_STOPS_TOTAL: &str = "server_stops_total";
/// Connections dispatched to a session (counter, labels: source).
pub const CONNECTIONS_TOTAL: &str = "connections_total";
/// Connections refused before dispatch (counter, labels: reason).
pub const CONNECTIONS_REJECTED_TOTAL: &str = "connections_rejected_total";
/// Session units currently scheduled or running (gauge).
pub const SESSIONS_ACTIVE: &str = "sessions_active";
/// Session units that started running and have since ended (counter).
///
/// Units dropped before their first poll are not counted.
pub const SESSIONS_COMPLETED_TOTAL: &str = "sessions_completed_total";
