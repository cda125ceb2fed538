//! Prometheus metrics exposition
//!
//! The console's own HTTP metrics live here:
//!
//! - `console_requests_total` (counter): labels `route`, `method`, `status`
//! - `console_request_duration_seconds` (histogram): label `route`
//!
//! The device-flow and config crates record their own counters
//! (`console_device_flow_*`, `console_config_fetches_total`) through the same
//! global recorder.

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

/// Covers a cached read (sub-millisecond) up to a management call that hits
/// the configured timeout.
const DURATION_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("console_request_duration_seconds".to_string()),
        DURATION_BUCKETS,
    )
}

/// Install the global Prometheus recorder and return a handle for `/metrics`.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    Ok(builder()?.install_recorder()?)
}

/// Record a handled request. `route` is the matched route template, never the
/// raw path, so query strings and ids do not explode label cardinality.
pub fn record_request(route: &str, method: &str, status: u16, duration_secs: f64) {
    metrics::counter!(
        "console_requests_total",
        "route" => route.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("console_request_duration_seconds", "route" => route.to_string())
        .record(duration_secs);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    /// Recorder scoped to one test; only one global recorder may exist per
    /// process.
    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = builder().unwrap().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn record_request_without_recorder_is_a_no_op() {
        record_request("/health", "GET", 200, 0.001);
    }

    #[test]
    fn record_request_writes_counter_and_histogram() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_request("/api/config", "GET", 200, 0.012);
        record_request("/api/copilot/auth", "DELETE", 502, 0.4);

        let output = handle.render();
        assert!(output.contains("console_requests_total"));
        assert!(output.contains("route=\"/api/config\""));
        assert!(output.contains("method=\"DELETE\""));
        assert!(output.contains("status=\"502\""));
        assert!(
            output.contains("console_request_duration_seconds_bucket"),
            "duration must render as a histogram, got: {output}"
        );
    }

    #[test]
    fn histogram_buckets_span_cache_hit_to_timeout() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_request("/api/config", "GET", 200, 0.0004);

        let output = handle.render();
        assert!(output.contains("le=\"0.001\""));
        assert!(output.contains("le=\"30\""));
        assert!(output.contains("le=\"+Inf\""));
    }
}
