//! Prometheus metrics exposition
//!
//! Metrics served on `/metrics`:
//!
//! - `session_refresh_total` (counter): label `outcome`, recorded by the scheduler
//! - `session_events_total` (counter): label `event`
//! - `session_authenticated` (gauge): 1 while a usable session is stored
//! - `session_agent_requests_total` (counter): labels `route`, `status`

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::error::{Error, Result};

/// Install the global Prometheus recorder and return a handle for rendering.
pub fn install_recorder() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::Metrics(e.to_string()))
}

/// Record a handled API request.
pub fn record_request(route: &'static str, status: u16) {
    metrics::counter!(
        "session_agent_requests_total",
        "route" => route,
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a session event by its label.
pub fn record_session_event(event: &'static str) {
    metrics::counter!("session_events_total", "event" => event).increment(1);
}

pub fn set_authenticated(authenticated: bool) {
    metrics::gauge!("session_authenticated").set(if authenticated { 1.0 } else { 0.0 });
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_request("/health", 200);
        record_session_event("refreshed");
        set_authenticated(true);
    }

    /// Isolated recorder/handle pair; the global recorder can only be
    /// installed once per process.
    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn record_request_carries_route_and_status() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_request("/session/login", 200);
        record_request("/session/login", 401);

        let output = handle.render();
        assert!(output.contains("session_agent_requests_total"), "got: {output}");
        assert!(output.contains("route=\"/session/login\""), "got: {output}");
        assert!(output.contains("status=\"401\""), "got: {output}");
    }

    #[test]
    fn session_events_and_gauge_render() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_session_event("session_ended");
        set_authenticated(false);

        let output = handle.render();
        assert!(output.contains("event=\"session_ended\""), "got: {output}");
        assert!(output.contains("session_authenticated 0"), "got: {output}");
    }
}
