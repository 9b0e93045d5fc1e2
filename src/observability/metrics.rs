//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): completion requests by outcome
//! - `gateway_provider_request_duration_seconds` (histogram): upstream latency
//! - `gateway_breaker_transitions_total` (counter): breaker state changes
//! - `gateway_failovers_total` (counter): switches away from the current provider
//! - `gateway_rate_limited_total` (counter): admission denials by scope
//! - `gateway_provider_health` (gauge): 1=healthy, 0=failed

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => {
            tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter")
        }
    }
}

/// Record the outcome of a completion request.
pub fn record_request(outcome: &'static str, provider: &str, start: Instant) {
    counter!("gateway_requests_total", "outcome" => outcome, "provider" => provider.to_string())
        .increment(1);
    histogram!("gateway_request_duration_seconds", "outcome" => outcome)
        .record(start.elapsed().as_secs_f64());
}

/// Record a single upstream call.
pub fn record_provider_call(provider: &str, success: bool, seconds: f64) {
    let status = if success { "success" } else { "failure" };
    histogram!(
        "gateway_provider_request_duration_seconds",
        "provider" => provider.to_string(),
        "status" => status
    )
    .record(seconds);
}

/// Record a breaker state transition.
pub fn record_breaker_transition(breaker: &str, to: &'static str) {
    counter!("gateway_breaker_transitions_total", "breaker" => breaker.to_string(), "to" => to)
        .increment(1);
}

/// Record a failover away from `from`.
pub fn record_failover(from: &str) {
    counter!("gateway_failovers_total", "from" => from.to_string()).increment(1);
}

/// Record an admission-control denial.
pub fn record_rate_limited(scope: &'static str) {
    counter!("gateway_rate_limited_total", "scope" => scope).increment(1);
}

/// Record provider health as seen by the health monitor.
pub fn record_provider_health(provider: &str, healthy: bool) {
    gauge!("gateway_provider_health", "provider" => provider.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}
