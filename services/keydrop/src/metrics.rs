//! Prometheus metrics exposition
//!
//! - `keydrop_operations_total` (counter): labels `op`, `outcome`
//! - `keydrop_operation_duration_seconds` (histogram): label `op`
//! - `keydrop_remote_retries_total` (counter, from `repo-contents`): label `reason`
//! - `keydrop_keys_dispensed_total` (counter, from `key-pool`): labels `period`, `backend`
//! - `keydrop_pool_empty_total` (counter, from `key-pool`): label `period`

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

/// Bucket bounds for operation latency, 5ms to 30s. A dispense is up to four
/// remote round trips plus retry backoff.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("keydrop_operation_duration_seconds".to_string()),
        DURATION_BUCKETS,
    )
}

/// Install the global Prometheus recorder and return its render handle.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// Record a finished store operation.
pub fn record_operation(op: &'static str, outcome: &'static str, duration_secs: f64) {
    metrics::counter!("keydrop_operations_total", "op" => op, "outcome" => outcome).increment(1);
    metrics::histogram!("keydrop_operation_duration_seconds", "op" => op).record(duration_secs);
}
