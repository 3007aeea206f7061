//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Must be called once at process startup before any metrics are recorded;
/// tests build local recorder handles instead.
pub fn install_recorder() -> PrometheusHandle {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
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
/// WebSocket connection duration seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Currently registered device identities (gauge).
pub const DEVICES_REGISTERED: &str = "devices_registered";
/// Envelopes forwarded to a recipient total (counter, labels: kind).
pub const ENVELOPES_FORWARDED_TOTAL: &str = "envelopes_forwarded_total";
/// Envelopes discarded total (counter, labels: reason).
pub const ENVELOPES_DROPPED_TOTAL: &str = "envelopes_dropped_total";
/// Presence notices enqueued total (counter).
pub const PRESENCE_NOTICES_TOTAL: &str = "presence_notices_total";
/// Frames dropped on a full or closed send queue total (counter).
pub const SEND_QUEUE_DROPS_TOTAL: &str = "send_queue_drops_total";
