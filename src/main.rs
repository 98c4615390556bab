use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tracing::info;

use idempotency_engine::api::{create_router, AppState};
use idempotency_engine::config::Settings;
use idempotency_engine::crypto::Aes256GcmCipher;
use idempotency_engine::external::HttpBillingClient;
use idempotency_engine::idempotency::{CoordinatorConfig, EnvelopeCodec, RequestCoordinator};
use idempotency_engine::observability::{init_logging, init_metrics, LogConfig, LogFormat};
use idempotency_engine::operations::SignupOperation;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::new()?;

    // Initialize logging
    init_logging(&LogConfig {
        level: settings.application.log_level.clone(),
        format: LogFormat::from(settings.application.log_format.as_str()),
        include_target: true,
    });
    info!("Configuration loaded");

    // Connect to PostgreSQL
    let pool = PgPoolOptions::new()
        .max_connections(settings.database.pool_size)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&settings.database.url)
        .await?;
    info!("Database connection established");

    // Run migrations
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations applied");

    // Build the explicit dependency graph: cipher, billing client, codec,
    // coordinator, operation. Constructed once, passed down.
    let cipher = Aes256GcmCipher::from_hex_key(&settings.encryption.aes_256_gcm_key)?;
    let billing = Arc::new(HttpBillingClient::new(&settings.billing)?);
    let codec = EnvelopeCodec::new(cipher.clone());
    let coordinator = Arc::new(RequestCoordinator::new(
        pool.clone(),
        codec,
        CoordinatorConfig {
            max_attempt_count: settings.idempotency.max_attempt_count,
            idempotency_key_header: settings.idempotency.key_header.clone(),
        },
    ));
    let signup = Arc::new(SignupOperation::new(billing, cipher));

    let metrics_handle = init_metrics()?;
    let state = AppState::new(pool, coordinator, signup).with_metrics(metrics_handle);
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", settings.application.port);
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
