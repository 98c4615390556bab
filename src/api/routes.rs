use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::idempotency::RequestCoordinator;
use crate::observability::HealthChecker;
use crate::operations::SignupOperation;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub coordinator: Arc<RequestCoordinator>,
    pub signup: Arc<SignupOperation>,
    pub health_checker: Arc<HealthChecker>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        coordinator: Arc<RequestCoordinator>,
        signup: Arc<SignupOperation>,
    ) -> Self {
        let health_checker = Arc::new(HealthChecker::new(pool.clone()));
        Self {
            pool,
            coordinator,
            signup,
            health_checker,
            metrics_handle: None,
        }
    }

    /// Adds the Prometheus handle backing the /metrics endpoint.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}

/// Creates the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/live", get(handlers::liveness_check))
        // Metrics endpoint
        .route("/metrics", get(handlers::metrics_endpoint))
        // Idempotent operations
        .route("/signup", post(handlers::signup))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
