//! Metrics collection and exposition.
//!
//! # Metrics
//! - `guard_requests_total` (counter): requests by method, status, route
//! - `guard_request_duration_seconds` (histogram): latency distribution
//! - `guard_rate_limit_decisions_total` (counter): by preset and outcome
//! - `guard_rate_limit_store_errors_total` (counter): by backend
//! - `guard_rate_limit_entries` (gauge): tracked keys and active blocks
//! - `guard_retry_attempts_total` / `guard_retry_exhausted_total` (counter)
//!
//! # Design Decisions
//! - The `metrics` facade is a no-op until an exporter is installed, so
//!   library code records unconditionally
//! - Prometheus exposition on its own listener

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus exporter and its HTTP listener.
/// Must be called from inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, route: &str, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
        ("route", route.to_string()),
    ];
    ::metrics::counter!("guard_requests_total", &labels).increment(1);
    ::metrics::histogram!("guard_request_duration_seconds", &labels).record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limit_decision(preset: &str, allowed: bool) {
    let outcome = if allowed { "allowed" } else { "rejected" };
    ::metrics::counter!(
        "guard_rate_limit_decisions_total",
        "preset" => preset.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_store_error(backend: &str) {
    ::metrics::counter!("guard_rate_limit_store_errors_total", "backend" => backend.to_string()).increment(1);
}

pub fn record_store_size(tracked_keys: usize, active_blocks: usize) {
    ::metrics::gauge!("guard_rate_limit_entries", "kind" => "keys").set(tracked_keys as f64);
    ::metrics::gauge!("guard_rate_limit_entries", "kind" => "blocks").set(active_blocks as f64);
}

pub fn record_retry_attempt(operation: &str) {
    ::metrics::counter!("guard_retry_attempts_total", "operation" => operation.to_string()).increment(1);
}

pub fn record_retry_exhausted(operation: &str) {
    ::metrics::counter!("guard_retry_exhausted_total", "operation" => operation.to_string()).increment(1);
}
