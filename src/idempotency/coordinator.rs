use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::error::{AppError, Result};
use crate::idempotency::codec::{EnvelopeCodec, ErrorCode, ResponseEnvelope};
use crate::idempotency::hooks::{IdempotentOperation, OperationRequest, Outcome};
use crate::idempotency::record::{
    IdempotencyRecord, IdempotencyStatus, IdempotencyStore, RecordUpdate,
};
use crate::observability::Metrics;

/// Counters for coordinator activity.
#[derive(Debug, Default)]
pub struct CoordinatorMetrics {
    pub total_requests: AtomicU64,
    pub replayed_responses: AtomicU64,
    pub conflict_responses: AtomicU64,
    pub attempts_started: AtomicU64,
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
    pub retryable: AtomicU64,
}

impl CoordinatorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    fn record_replayed(&self) {
        self.replayed_responses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_conflict(&self) {
        self.conflict_responses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_attempt(&self) {
        self.attempts_started.fetch_add(1, Ordering::Relaxed);
    }

    fn record_status(&self, status: IdempotencyStatus) {
        match status {
            IdempotencyStatus::Succeeded => self.succeeded.fetch_add(1, Ordering::Relaxed),
            IdempotencyStatus::Failed => self.failed.fetch_add(1, Ordering::Relaxed),
            IdempotencyStatus::Retryable => self.retryable.fetch_add(1, Ordering::Relaxed),
            IdempotencyStatus::Created | IdempotencyStatus::PendingExternal => 0,
        };
    }

    pub fn snapshot(&self) -> CoordinatorMetricsSnapshot {
        CoordinatorMetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            replayed_responses: self.replayed_responses.load(Ordering::Relaxed),
            conflict_responses: self.conflict_responses.load(Ordering::Relaxed),
            attempts_started: self.attempts_started.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retryable: self.retryable.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorMetricsSnapshot {
    pub total_requests: u64,
    pub replayed_responses: u64,
    pub conflict_responses: u64,
    pub attempts_started: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retryable: u64,
}

/// Configuration for the request coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Attempt ceiling stamped onto each record at creation.
    pub max_attempt_count: i32,
    /// Header carrying the client-supplied idempotency key.
    pub idempotency_key_header: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_attempt_count: 3,
            idempotency_key_header: "Idempotency-Key".to_string(),
        }
    }
}

enum FirstTxOutcome {
    /// A final envelope was resolved inside the first transaction: a replay,
    /// a duplicate-in-flight conflict, a tag mismatch, or a hook
    /// short-circuit. The external call never runs.
    Respond(ResponseEnvelope),
    /// The record entered `pending_external`; proceed to the external call.
    Proceed(IdempotencyRecord),
}

/// Sequences a local transaction, an external call, and a second local
/// transaction around an idempotency record, so that client retries, crashes,
/// and partial failures never produce duplicate external side effects or
/// inconsistent local state.
///
/// All mutual exclusion is delegated to the row lock taken by
/// `SELECT ... FOR UPDATE`; the coordinator holds no in-process locks, and
/// the external call runs with no lock held.
pub struct RequestCoordinator {
    pool: PgPool,
    codec: EnvelopeCodec,
    config: CoordinatorConfig,
    counters: Arc<CoordinatorMetrics>,
    metrics: Metrics,
}

impl RequestCoordinator {
    pub fn new(pool: PgPool, codec: EnvelopeCodec, config: CoordinatorConfig) -> Self {
        Self {
            pool,
            codec,
            config,
            counters: Arc::new(CoordinatorMetrics::new()),
            metrics: Metrics::new(),
        }
    }

    pub fn metrics(&self) -> Arc<CoordinatorMetrics> {
        Arc::clone(&self.counters)
    }

    /// Executes one idempotent request end to end and returns the envelope
    /// to deliver to the client.
    ///
    /// Only programmer-error-class violations (`Coordination`, `Corruption`)
    /// and unrecovered hook/database errors come back as `Err`; every
    /// business-level outcome resolves to an `Ok(envelope)`.
    pub async fn handle<O: IdempotentOperation>(
        &self,
        operation: &O,
        request: &OperationRequest,
    ) -> Result<ResponseEnvelope> {
        self.counters.record_request();
        self.metrics.record_request(operation.operation());

        let Some(key) = request.header(&self.config.idempotency_key_header) else {
            return Ok(ResponseEnvelope::from_code(
                400,
                ErrorCode::IdempotencyKeyRequired,
            ));
        };
        let key = key.to_string();

        let mut ctx = operation.on_parse_before_first_tx(request).await?;

        let record = match self.execute_first_tx(operation, &key, &mut ctx).await? {
            FirstTxOutcome::Respond(envelope) => return Ok(envelope),
            FirstTxOutcome::Proceed(record) => record,
        };

        // The external call runs outside any transaction so that its latency
        // never extends the row lock. A failure here is captured as a value;
        // the second transaction must run regardless so that state advances.
        let external_error = operation.on_external_call(&mut ctx).await.err();
        if let Some(err) = &external_error {
            self.metrics.record_external_failure(operation.operation());
            tracing::warn!(
                operation = operation.operation(),
                idempotency_key = %key,
                attempt = record.attempt_count,
                error = %err,
                "external call failed"
            );
        }

        match self
            .execute_second_tx(operation, &key, external_error, &mut ctx)
            .await
        {
            Ok(envelope) => Ok(envelope),
            Err(err) => {
                // Best-effort compensation; the record stays in
                // pending_external on this path (known crash-window gap).
                if let Err(comp_err) = operation.on_error_from_second_tx(&mut ctx).await {
                    self.metrics
                        .record_compensation_failure(operation.operation());
                    tracing::error!(
                        operation = operation.operation(),
                        idempotency_key = %key,
                        error = %comp_err,
                        "compensation hook failed"
                    );
                }
                Err(err)
            }
        }
    }

    async fn execute_first_tx<O: IdempotentOperation>(
        &self,
        operation: &O,
        key: &str,
        ctx: &mut O::Context,
    ) -> Result<FirstTxOutcome> {
        let mut tx = self.pool.begin().await.map_err(AppError::Database)?;

        IdempotencyStore::try_insert(
            &mut tx,
            key,
            operation.operation(),
            self.config.max_attempt_count,
        )
        .await?;
        let record = IdempotencyStore::select_for_update(&mut tx, key)
            .await?
            .ok_or_else(|| {
                AppError::Coordination(format!(
                    "idempotency record '{}' missing after insert",
                    key
                ))
            })?;

        if record.operation != operation.operation() {
            // Roll back so the stored record is left untouched.
            tx.rollback().await.map_err(AppError::Database)?;
            tracing::warn!(
                idempotency_key = %key,
                expected = operation.operation(),
                stored = %record.operation,
                "idempotency key reused across operations"
            );
            return Ok(FirstTxOutcome::Respond(ResponseEnvelope::from_code(
                400,
                ErrorCode::IdempotencyKeyMismatch,
            )));
        }

        match record.status {
            IdempotencyStatus::Succeeded | IdempotencyStatus::Failed => {
                let stored = record.response_encrypted.as_deref().ok_or_else(|| {
                    AppError::Corruption(format!(
                        "terminal record '{}' has no stored response",
                        key
                    ))
                })?;
                let envelope = self.codec.decode(stored)?;
                tx.commit().await.map_err(AppError::Database)?;

                self.counters.record_replayed();
                self.metrics.record_replayed(operation.operation());
                tracing::debug!(
                    idempotency_key = %key,
                    status = ?record.status,
                    "replaying cached response"
                );
                Ok(FirstTxOutcome::Respond(envelope))
            }
            IdempotencyStatus::PendingExternal => {
                tx.commit().await.map_err(AppError::Database)?;

                self.counters.record_conflict();
                self.metrics.record_conflict(operation.operation());
                Ok(FirstTxOutcome::Respond(ResponseEnvelope::from_code(
                    409,
                    ErrorCode::ExternalRequestInProgress,
                )))
            }
            IdempotencyStatus::Created | IdempotencyStatus::Retryable => {
                let record = IdempotencyStore::update(
                    &mut tx,
                    key,
                    RecordUpdate::new()
                        .status(IdempotencyStatus::PendingExternal)
                        .attempt_count(record.attempt_count + 1),
                )
                .await?;
                self.counters.record_attempt();
                self.metrics.record_attempt(operation.operation());

                if let Some(envelope) = operation.on_parse_in_first_tx(&mut tx, &record, ctx).await?
                {
                    // The short-circuit outcome is terminal and replayable.
                    let encoded = self.codec.encode(&envelope)?;
                    IdempotencyStore::update(
                        &mut tx,
                        key,
                        RecordUpdate::new()
                            .status(IdempotencyStatus::Failed)
                            .response_encrypted(encoded),
                    )
                    .await?;
                    tx.commit().await.map_err(AppError::Database)?;

                    self.counters.record_status(IdempotencyStatus::Failed);
                    self.metrics
                        .record_outcome(operation.operation(), "failed");
                    return Ok(FirstTxOutcome::Respond(envelope));
                }

                tx.commit().await.map_err(AppError::Database)?;
                Ok(FirstTxOutcome::Proceed(record))
            }
        }
    }

    async fn execute_second_tx<O: IdempotentOperation>(
        &self,
        operation: &O,
        key: &str,
        external_error: Option<AppError>,
        ctx: &mut O::Context,
    ) -> Result<ResponseEnvelope> {
        let mut tx = self.pool.begin().await.map_err(AppError::Database)?;

        let record = IdempotencyStore::select_for_update(&mut tx, key)
            .await?
            .ok_or_else(|| {
                AppError::Coordination(format!(
                    "idempotency record '{}' missing in second transaction",
                    key
                ))
            })?;

        // Only this coordinator instance moved the record into
        // pending_external, and nobody can advance it past that state without
        // the row lock; anything else here is a coordination bug.
        if record.status != IdempotencyStatus::PendingExternal {
            return Err(AppError::Coordination(format!(
                "record '{}' has status {:?} in second transaction, expected pending_external",
                key, record.status
            )));
        }

        let outcome = operation
            .on_parse_in_second_tx(&mut tx, &record, external_error.as_ref(), ctx)
            .await?;

        let (status, envelope) = match outcome {
            Outcome::Success(envelope) => (IdempotencyStatus::Succeeded, envelope),
            Outcome::Failure(envelope) => (IdempotencyStatus::Failed, envelope),
            Outcome::Retry(envelope) => {
                let status = if record.attempt_count < record.max_attempt_count {
                    IdempotencyStatus::Retryable
                } else {
                    IdempotencyStatus::Failed
                };
                (status, envelope)
            }
        };

        let encoded = self.codec.encode(&envelope)?;
        IdempotencyStore::update(
            &mut tx,
            key,
            RecordUpdate::new()
                .status(status)
                .response_encrypted(encoded),
        )
        .await?;
        tx.commit().await.map_err(AppError::Database)?;

        self.counters.record_status(status);
        self.metrics
            .record_outcome(operation.operation(), status_label(status));
        tracing::info!(
            operation = operation.operation(),
            idempotency_key = %key,
            attempt = record.attempt_count,
            status = ?status,
            "request finalized"
        );

        Ok(envelope)
    }
}

fn status_label(status: IdempotencyStatus) -> &'static str {
    match status {
        IdempotencyStatus::Created => "created",
        IdempotencyStatus::PendingExternal => "pending_external",
        IdempotencyStatus::Succeeded => "succeeded",
        IdempotencyStatus::Failed => "failed",
        IdempotencyStatus::Retryable => "retryable",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.max_attempt_count, 3);
        assert_eq!(config.idempotency_key_header, "Idempotency-Key");
    }

    #[test]
    fn test_metrics_snapshot() {
        let metrics = CoordinatorMetrics::new();
        metrics.record_request();
        metrics.record_request();
        metrics.record_replayed();
        metrics.record_attempt();
        metrics.record_status(IdempotencyStatus::Succeeded);
        metrics.record_status(IdempotencyStatus::Retryable);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.replayed_responses, 1);
        assert_eq!(snapshot.attempts_started, 1);
        assert_eq!(snapshot.succeeded, 1);
        assert_eq!(snapshot.retryable, 1);
        assert_eq!(snapshot.failed, 0);
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(status_label(IdempotencyStatus::PendingExternal), "pending_external");
        assert_eq!(status_label(IdempotencyStatus::Succeeded), "succeeded");
    }
}
