//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once at startup before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connections evicted because their outbound queue was full (counter).
pub const WS_EVICTIONS_TOTAL: &str = "ws_evictions_total";
/// Inbound envelopes dropped because the sink was full (counter).
pub const WS_SINK_DROPS_TOTAL: &str = "ws_sink_drops_total";
/// Envelopes accepted by the hub for fan-out (counter).
pub const HUB_ENVELOPES_PUBLISHED_TOTAL: &str = "hub_envelopes_published_total";
/// Envelopes enqueued onto connection queues (counter).
pub const HUB_DELIVERIES_TOTAL: &str = "hub_deliveries_total";
/// Demo ticks published (counter).
pub const DEMO_TICKS_TOTAL: &str = "demo_ticks_total";
