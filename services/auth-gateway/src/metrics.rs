//! Prometheus metrics exposition
//!
//! - `auth_exchange_attempts_total` (counter): label `outcome`
//! - `auth_token_redemptions_total` (counter): labels `purpose`, `outcome`
//! - `auth_tokens_issued_total` (counter): label `purpose`
//! - `auth_tokens_swept_total` (counter)
//! - `auth_request_duration_seconds` (histogram): label `route`

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Callback handling includes the 1s redirect delay, so buckets reach past it.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 1.5, 2.5, 5.0, 10.0, 30.0,
];

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(
                "auth_request_duration_seconds".to_string(),
            ),
            DURATION_BUCKETS,
        )
        .expect("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record the outcome of one callback: `succeeded`, `denied`, or a failure
/// kind label.
pub fn record_exchange(outcome: &str) {
    metrics::counter!("auth_exchange_attempts_total", "outcome" => outcome.to_string())
        .increment(1);
}

/// Record one token redemption attempt.
pub fn record_redemption(purpose: &str, outcome: &str) {
    metrics::counter!(
        "auth_token_redemptions_total",
        "purpose" => purpose.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_issued(purpose: &str) {
    metrics::counter!("auth_tokens_issued_total", "purpose" => purpose.to_string()).increment(1);
}

pub fn record_swept(removed: usize) {
    metrics::counter!("auth_tokens_swept_total").increment(removed as u64);
}

/// Record a completed request against its route template.
pub fn record_request(route: &str, duration_secs: f64) {
    metrics::histogram!("auth_request_duration_seconds", "route" => route.to_string())
        .record(duration_secs);
}
