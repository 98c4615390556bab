use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::error::{AppError, Result};

/// Installs the Prometheus recorder and returns the handle used by the
/// `/metrics` endpoint to render the registry.
pub fn init_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| AppError::Configuration(format!("metrics recorder setup failed: {}", e)))?;

    describe_metrics();
    Ok(handle)
}

fn describe_metrics() {
    describe_counter!(
        "idempotency_requests_total",
        "Requests entering the coordinator, per operation"
    );
    describe_counter!(
        "idempotency_replayed_total",
        "Cached terminal responses replayed without re-running the operation"
    );
    describe_counter!(
        "idempotency_conflicts_total",
        "Requests rejected because another attempt was in flight"
    );
    describe_counter!(
        "idempotency_attempts_total",
        "Attempt cycles entering pending_external"
    );
    describe_counter!(
        "idempotency_outcomes_total",
        "Finalized attempt cycles, per resulting status"
    );
    describe_counter!(
        "idempotency_external_failures_total",
        "External calls that returned an error"
    );
    describe_counter!(
        "idempotency_compensation_failures_total",
        "Compensation hooks that themselves failed"
    );
}

/// Metrics emitter for the request coordinator.
#[derive(Debug, Clone, Default)]
pub struct Metrics;

impl Metrics {
    pub fn new() -> Self {
        Self
    }

    pub fn record_request(&self, operation: &str) {
        counter!("idempotency_requests_total", "operation" => operation.to_string()).increment(1);
    }

    pub fn record_replayed(&self, operation: &str) {
        counter!("idempotency_replayed_total", "operation" => operation.to_string()).increment(1);
    }

    pub fn record_conflict(&self, operation: &str) {
        counter!("idempotency_conflicts_total", "operation" => operation.to_string()).increment(1);
    }

    pub fn record_attempt(&self, operation: &str) {
        counter!("idempotency_attempts_total", "operation" => operation.to_string()).increment(1);
    }

    pub fn record_outcome(&self, operation: &str, status: &str) {
        counter!("idempotency_outcomes_total", "operation" => operation.to_string(), "status" => status.to_string()).increment(1);
    }

    pub fn record_external_failure(&self, operation: &str) {
        counter!("idempotency_external_failures_total", "operation" => operation.to_string())
            .increment(1);
    }

    pub fn record_compensation_failure(&self, operation: &str) {
        counter!("idempotency_compensation_failures_total", "operation" => operation.to_string())
            .increment(1);
    }
}
