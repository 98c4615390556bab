use std::time::Instant;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;

/// Health status of a service or dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// Health status of a single dependency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyHealth {
    pub name: String,
    pub status: HealthStatus,
    pub latency_ms: Option<f64>,
    pub message: Option<String>,
}

impl DependencyHealth {
    pub fn healthy(name: impl Into<String>, latency_ms: f64) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            latency_ms: Some(latency_ms),
            message: None,
        }
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Unhealthy,
            latency_ms: None,
            message: Some(message.into()),
        }
    }
}

/// Aggregated health check result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedHealth {
    pub status: HealthStatus,
    pub version: String,
    pub dependencies: Vec<DependencyHealth>,
}

impl AggregatedHealth {
    pub fn new(version: String, dependencies: Vec<DependencyHealth>) -> Self {
        let status = Self::aggregate_status(&dependencies);
        Self {
            status,
            version,
            dependencies,
        }
    }

    fn aggregate_status(dependencies: &[DependencyHealth]) -> HealthStatus {
        if dependencies.iter().any(|d| !d.status.is_healthy()) {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Healthy
        }
    }
}

/// Checks the liveness of the service's dependencies.
pub struct HealthChecker {
    pool: PgPool,
}

impl HealthChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn check(&self) -> AggregatedHealth {
        let dependencies = vec![self.check_database().await];
        AggregatedHealth::new(env!("CARGO_PKG_VERSION").to_string(), dependencies)
    }

    async fn check_database(&self) -> DependencyHealth {
        let start = Instant::now();
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => {
                DependencyHealth::healthy("database", start.elapsed().as_secs_f64() * 1000.0)
            }
            Err(e) => DependencyHealth::unhealthy("database", e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_status_all_healthy() {
        let health = AggregatedHealth::new(
            "0.1.0".to_string(),
            vec![DependencyHealth::healthy("database", 1.2)],
        );
        assert_eq!(health.status, HealthStatus::Healthy);
    }

    #[test]
    fn test_aggregate_status_with_unhealthy_dependency() {
        let health = AggregatedHealth::new(
            "0.1.0".to_string(),
            vec![
                DependencyHealth::healthy("database", 1.2),
                DependencyHealth::unhealthy("billing", "connection refused"),
            ],
        );
        assert_eq!(health.status, HealthStatus::Unhealthy);
    }
}
