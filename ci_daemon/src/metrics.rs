//! Prometheus metrics for build daemon observability.

use metrics::{counter, gauge, histogram};

/// Initialize metrics exporter (Prometheus).
pub fn init_metrics() {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    if let Err(e) = builder.install() {
        tracing::warn!("Failed to install Prometheus exporter: {}", e);
    }
}

/// Record a webhook received event.
pub fn webhook_received(event_type: &str) {
    counter!("ci_webhooks_received_total", "event" => event_type.to_string()).increment(1);
}

/// Record how a build run ended (completed, degraded, aborted).
pub fn build_finished(outcome: &str) {
    counter!("ci_builds_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record build duration.
pub fn build_duration(duration_ms: u64) {
    histogram!("ci_build_duration_ms").record(duration_ms as f64);
}

/// Record the score a finished build earned.
pub fn build_score(score: i32) {
    histogram!("ci_build_score").record(f64::from(score));
}

/// Record step duration.
pub fn step_duration(step_name: &str, duration_ms: u64) {
    histogram!("ci_step_duration_ms", "step" => step_name.to_string()).record(duration_ms as f64);
}

/// Record a sandbox command killed for exceeding its time budget.
pub fn command_timed_out() {
    counter!("ci_command_timeouts_total").increment(1);
}

/// Set the number of builds currently in flight.
pub fn builds_in_flight(count: usize) {
    gauge!("ci_builds_in_flight").set(count as f64);
}

/// Record an error occurrence.
pub fn error_recorded(category: &str) {
    counter!("ci_errors_total", "category" => category.to_string()).increment(1);
}
