use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error taxonomy.
///
/// Business-level outcomes (success/failure/retry) are resolved inside the
/// request coordinator and returned as response envelopes; only the variants
/// below escape `handle()` as errors. `Corruption` and `Coordination` mark
/// invariant violations that must surface as generic server errors, never as
/// retryable client responses.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("external service error: {0}")]
    ExternalService(String),

    /// Stored state failed to decrypt or deserialize. Indicates data
    /// corruption, not an in-progress request.
    #[error("stored data corrupted: {0}")]
    Corruption(String),

    /// The coordinator observed a state only a bug could produce (record
    /// missing after insert, unexpected status in the second transaction).
    #[error("coordination invariant violated: {0}")]
    Coordination(String),

    #[error("internal error: {0}")]
    Internal(anyhow::Error),
}
