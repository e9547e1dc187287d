//! Prometheus metrics recording and endpoint.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus metrics recorder and return the handle for rendering.
pub fn install_prometheus_recorder() -> anyhow::Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {e}"))
}

/// Record a new WebSocket connection.
pub fn record_ws_connect() {
    metrics::gauge!("ws_connections_active").increment(1.0);
    metrics::counter!("ws_connections_total").increment(1);
}

/// Record a WebSocket disconnection.
pub fn record_ws_disconnect() {
    metrics::gauge!("ws_connections_active").decrement(1.0);
}

/// Record an event pushed to a client, labelled by its `type`.
pub fn record_event(kind: &'static str) {
    metrics::counter!("server_events_total", "type" => kind).increment(1);
}

/// Record a session replaced by a newer connection for the same chat.
pub fn record_session_takeover() {
    metrics::counter!("session_takeovers_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_prometheus_recorder() {
        // Can only install once per process, so this is the only test that does.
        let handle = install_prometheus_recorder().unwrap();
        record_event("stt_output");
        let output = handle.render();
        assert!(output.is_empty() || output.contains("# "));
    }

    #[test]
    fn test_recording_without_recorder_does_not_panic() {
        record_ws_connect();
        record_ws_disconnect();
        record_session_takeover();
        record_event("llm_done");
    }
}
