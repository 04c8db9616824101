//! Prometheus metrics exposition
//!
//! Metrics recorded by this service:
//!
//! - `architect_requests_total` (counter): labels `operation`, `outcome`
//! - `architect_request_duration_seconds` (histogram): label `operation`
//!
//! The key-pool crate adds `completion_attempts_total{outcome}` and
//! `credential_exhaustions_total` through the same global recorder.

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

/// Histogram buckets from 100ms to 5 minutes; thinking-model calls are slow.
const DURATION_BUCKETS: &[f64] = &[0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("architect_request_duration_seconds".to_string()),
        DURATION_BUCKETS,
    )
}

/// Install the global Prometheus recorder and return a handle for `/metrics`.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// Record a finished operation. `outcome` is `ok` or the error `type`.
pub fn record_operation(operation: &'static str, outcome: &'static str, duration_secs: f64) {
    metrics::counter!("architect_requests_total", "operation" => operation, "outcome" => outcome)
        .increment(1);
    metrics::histogram!("architect_request_duration_seconds", "operation" => operation)
        .record(duration_secs);
}
