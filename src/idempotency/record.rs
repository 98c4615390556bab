use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;

use crate::error::{AppError, Result};

/// Status of an idempotency request record.
///
/// `Succeeded` and `Failed` are terminal; `Retryable` re-enters
/// `PendingExternal` on the next request bearing the same key while the
/// attempt ceiling has not been reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "idempotency_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    Created,
    PendingExternal,
    Succeeded,
    Failed,
    Retryable,
}

impl IdempotencyStatus {
    /// Returns true if no further transition is permitted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, IdempotencyStatus::Succeeded | IdempotencyStatus::Failed)
    }
}

/// One row per idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IdempotencyRecord {
    pub idempotency_key: String,
    pub operation: String,
    pub status: IdempotencyStatus,
    pub attempt_count: i32,
    pub max_attempt_count: i32,
    /// Encrypted response envelope, present once the record is terminal-for-now.
    pub response_encrypted: Option<String>,
    pub status_changed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update for an idempotency record. Unset fields keep their stored
/// value; `updated_at` always refreshes, `status_changed_at` only when a
/// status is supplied.
#[derive(Debug, Clone, Default)]
pub struct RecordUpdate {
    pub status: Option<IdempotencyStatus>,
    pub attempt_count: Option<i32>,
    pub response_encrypted: Option<String>,
}

impl RecordUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: IdempotencyStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn attempt_count(mut self, attempt_count: i32) -> Self {
        self.attempt_count = Some(attempt_count);
        self
    }

    pub fn response_encrypted(mut self, response_encrypted: impl Into<String>) -> Self {
        self.response_encrypted = Some(response_encrypted.into());
        self
    }
}

const RECORD_COLUMNS: &str = "idempotency_key, operation, status, attempt_count, max_attempt_count, response_encrypted, status_changed_at, created_at, updated_at";

/// Storage primitives for idempotency records.
///
/// Every function executes against the caller's open connection so that the
/// calls compose inside the coordinator's transactions; `select_for_update`
/// holds its row lock until that transaction commits or rolls back.
pub struct IdempotencyStore;

impl IdempotencyStore {
    /// Atomically inserts a new record if the key is absent. Returns `None`
    /// when a row already exists; conflict is a normal outcome, not an error.
    pub async fn try_insert(
        conn: &mut PgConnection,
        key: &str,
        operation: &str,
        max_attempt_count: i32,
    ) -> Result<Option<IdempotencyRecord>> {
        let row = sqlx::query_as::<_, IdempotencyRecord>(&format!(
            r#"
            INSERT INTO idempotency_requests (idempotency_key, operation, max_attempt_count)
            VALUES ($1, $2, $3)
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING {RECORD_COLUMNS}
            "#,
        ))
        .bind(key)
        .bind(operation)
        .bind(max_attempt_count)
        .fetch_optional(conn)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Fetches the row and acquires an exclusive row lock for the duration of
    /// the enclosing transaction, blocking concurrent holders of the same key.
    pub async fn select_for_update(
        conn: &mut PgConnection,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>> {
        let row = sqlx::query_as::<_, IdempotencyRecord>(&format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM idempotency_requests
            WHERE idempotency_key = $1
            FOR UPDATE
            "#,
        ))
        .bind(key)
        .fetch_optional(conn)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Applies a partial update and returns the updated row. The row must
    /// exist; the coordinator only calls this after `select_for_update`.
    pub async fn update(
        conn: &mut PgConnection,
        key: &str,
        update: RecordUpdate,
    ) -> Result<IdempotencyRecord> {
        let row = sqlx::query_as::<_, IdempotencyRecord>(&format!(
            r#"
            UPDATE idempotency_requests
            SET status = COALESCE($2, status),
                attempt_count = COALESCE($3, attempt_count),
                response_encrypted = COALESCE($4, response_encrypted),
                status_changed_at = CASE WHEN $2 IS NULL THEN status_changed_at ELSE NOW() END,
                updated_at = NOW()
            WHERE idempotency_key = $1
            RETURNING {RECORD_COLUMNS}
            "#,
        ))
        .bind(key)
        .bind(update.status)
        .bind(update.attempt_count)
        .bind(update.response_encrypted)
        .fetch_optional(conn)
        .await
        .map_err(AppError::Database)?;

        row.ok_or_else(|| {
            AppError::Coordination(format!("idempotency record '{}' vanished during update", key))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(IdempotencyStatus::Succeeded.is_terminal());
        assert!(IdempotencyStatus::Failed.is_terminal());
        assert!(!IdempotencyStatus::Created.is_terminal());
        assert!(!IdempotencyStatus::PendingExternal.is_terminal());
        assert!(!IdempotencyStatus::Retryable.is_terminal());
    }

    #[test]
    fn test_record_update_builder() {
        let update = RecordUpdate::new()
            .status(IdempotencyStatus::PendingExternal)
            .attempt_count(2);

        assert_eq!(update.status, Some(IdempotencyStatus::PendingExternal));
        assert_eq!(update.attempt_count, Some(2));
        assert!(update.response_encrypted.is_none());
    }

    #[test]
    fn test_status_serde_names() {
        let json = serde_json::to_string(&IdempotencyStatus::PendingExternal).unwrap();
        assert_eq!(json, "\"pending_external\"");
    }
}
