//! Prometheus metrics for gateway observability.

use metrics::{counter, histogram};

/// Initialize metrics exporter (Prometheus).
pub fn init_metrics() {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    if let Err(e) = builder.install() {
        tracing::warn!("Failed to install Prometheus exporter: {}", e);
    }
}

/// Record a finished generation request.
pub fn generation_finished(site: &str, outcome: &str) {
    counter!(
        "gateway_generations_total",
        "site" => site.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record end-to-end generation duration.
pub fn generation_duration(duration_ms: u64) {
    histogram!("gateway_generation_duration_ms").record(duration_ms as f64);
}

/// Record one poll attempt against the backend.
pub fn poll_attempt(mode: &str) {
    counter!("gateway_poll_attempts_total", "mode" => mode.to_string()).increment(1);
}

/// Record a credit mutation (consume, add, set).
pub fn credits_changed(kind: &str) {
    counter!("gateway_credit_mutations_total", "kind" => kind.to_string()).increment(1);
}

/// Record an admin API action.
pub fn admin_action(action: &str) {
    counter!("gateway_admin_actions_total", "action" => action.to_string()).increment(1);
}

/// Record a failed queue-tracking notification.
pub fn queue_tracker_failed() {
    counter!("gateway_queue_tracker_failures_total").increment(1);
}
