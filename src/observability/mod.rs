pub mod health;
pub mod logging;
pub mod metrics;

pub use health::{AggregatedHealth, DependencyHealth, HealthChecker, HealthStatus};
pub use logging::{init_logging, mask_email, mask_sensitive, LogConfig, LogFormat};
pub use metrics::{init_metrics, Metrics};
