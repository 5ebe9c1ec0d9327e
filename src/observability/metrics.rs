//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define runtime metrics (submissions, outcomes, retries, dead letters, queue depth)
//! - Define outbound metrics (call latency, circuit state, pool sessions)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `dispatch_events_submitted_total` (counter): accepted events by priority
//! - `dispatch_events_rejected_total` (counter): refused submissions by reason
//! - `dispatch_events_processed_total` (counter): finished items by outcome
//! - `dispatch_handler_failures_total` (counter): failed attempts by kind
//! - `dispatch_retries_total` (counter): re-queued attempts
//! - `dispatch_dead_letters_total` (counter): dead-lettered items by reason
//! - `dispatch_queue_depth` (gauge): queued items
//! - `dispatch_in_flight` (gauge): items being processed
//! - `dispatch_processing_seconds` (histogram): per-attempt processing time
//! - `upstream_call_duration_seconds` (histogram): outbound call latency by endpoint, result
//! - `upstream_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `upstream_circuit_rejections_total` (counter): calls refused by an open circuit
//! - `upstream_pool_sessions` (gauge): open and idle sessions
//! - `middleware_rate_limited_total` (counter): events vetoed by rate limiting
//!
//! # Design Decisions
//! - Low-overhead metric updates (no-ops until a recorder is installed)
//! - Labels for priority, outcome, endpoint

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => {
            tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter")
        }
    }
}

pub fn record_submitted(priority: u8) {
    counter!("dispatch_events_submitted_total", "priority" => priority.to_string()).increment(1);
}

pub fn record_rejected(reason: &'static str) {
    counter!("dispatch_events_rejected_total", "reason" => reason).increment(1);
}

pub fn record_processed(outcome: &'static str, elapsed: Duration) {
    counter!("dispatch_events_processed_total", "outcome" => outcome).increment(1);
    histogram!("dispatch_processing_seconds").record(elapsed.as_secs_f64());
}

pub fn record_handler_failure(transient: bool) {
    let kind = if transient { "transient" } else { "permanent" };
    counter!("dispatch_handler_failures_total", "kind" => kind).increment(1);
}

pub fn record_retry() {
    counter!("dispatch_retries_total").increment(1);
}

pub fn record_dead_letter(reason: &'static str) {
    counter!("dispatch_dead_letters_total", "reason" => reason).increment(1);
}

pub fn set_queue_depth(depth: usize) {
    gauge!("dispatch_queue_depth").set(depth as f64);
}

pub fn set_in_flight(in_flight: u64) {
    gauge!("dispatch_in_flight").set(in_flight as f64);
}

pub fn record_outbound_call(endpoint: &str, result: &'static str, elapsed: Duration) {
    histogram!(
        "upstream_call_duration_seconds",
        "endpoint" => endpoint.to_string(),
        "result" => result
    )
    .record(elapsed.as_secs_f64());
}

pub fn record_circuit_state(endpoint: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    gauge!("upstream_circuit_state", "endpoint" => endpoint.to_string()).set(value);
}

pub fn record_circuit_rejection(endpoint: &str) {
    counter!("upstream_circuit_rejections_total", "endpoint" => endpoint.to_string()).increment(1);
}

pub fn set_pool_sessions(open: usize, idle: usize) {
    gauge!("upstream_pool_sessions", "state" => "open").set(open as f64);
    gauge!("upstream_pool_sessions", "state" => "idle").set(idle as f64);
}

pub fn record_rate_limited(middleware: &'static str) {
    counter!("middleware_rate_limited_total", "middleware" => middleware).increment(1);
}
