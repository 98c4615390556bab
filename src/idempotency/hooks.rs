use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgConnection;

use crate::error::{AppError, Result};
use crate::idempotency::codec::ResponseEnvelope;
use crate::idempotency::record::IdempotencyRecord;

/// The raw request handed to an operation: headers plus the parsed JSON body.
/// Header names are stored lowercase; lookups are case-insensitive.
#[derive(Debug, Clone)]
pub struct OperationRequest {
    headers: HashMap<String, String>,
    pub body: serde_json::Value,
}

impl OperationRequest {
    pub fn new(headers: HashMap<String, String>, body: serde_json::Value) -> Self {
        let headers = headers
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();
        Self { headers, body }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Outcome of the finalize hook, mapped by the coordinator onto the record's
/// status transition in the second transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(ResponseEnvelope),
    Failure(ResponseEnvelope),
    Retry(ResponseEnvelope),
}

impl Outcome {
    pub fn envelope(&self) -> &ResponseEnvelope {
        match self {
            Outcome::Success(envelope) | Outcome::Failure(envelope) | Outcome::Retry(envelope) => {
                envelope
            }
        }
    }
}

/// The five hooks a business operation supplies to the request coordinator.
///
/// Each `handle()` invocation owns one `Context` value, built by
/// `on_parse_before_first_tx` and threaded through the remaining hooks by
/// mutable reference; it is never persisted.
#[async_trait]
pub trait IdempotentOperation: Send + Sync {
    /// Request-scoped state staged between hooks: parsed input, derived
    /// fields, the external call's result.
    type Context: Send;

    /// Tag identifying this operation on stored records. A key replayed
    /// under a different tag is rejected as a client error.
    fn operation(&self) -> &'static str;

    /// Parses and validates the raw input before any transaction is opened.
    /// Errors propagate as ordinary input-validation failures; no record
    /// exists yet.
    async fn on_parse_before_first_tx(&self, request: &OperationRequest) -> Result<Self::Context>;

    /// Runs inside the first transaction, after the record has entered
    /// `pending_external`. Returning `Some(envelope)` short-circuits the
    /// protocol: the envelope is committed as the key's terminal outcome and
    /// the external call never runs.
    async fn on_parse_in_first_tx(
        &self,
        conn: &mut PgConnection,
        record: &IdempotencyRecord,
        ctx: &mut Self::Context,
    ) -> Result<Option<ResponseEnvelope>>;

    /// Performs the external side effect between the two transactions, with
    /// no lock held. The coordinator captures an error from this hook as a
    /// value and still runs the second transaction.
    ///
    /// Exactly-once is not guaranteed: a crash after the call succeeds but
    /// before the second transaction commits leaves the effect unrecorded,
    /// and a later retry will invoke this hook again.
    async fn on_external_call(&self, ctx: &mut Self::Context) -> Result<()>;

    /// Finalizes inside the second transaction, deciding whether the external
    /// outcome is a success, a permanent failure, or retryable for this
    /// operation.
    async fn on_parse_in_second_tx(
        &self,
        conn: &mut PgConnection,
        record: &IdempotencyRecord,
        external_error: Option<&AppError>,
        ctx: &mut Self::Context,
    ) -> Result<Outcome>;

    /// Best-effort compensation, run when an error escapes the second
    /// transaction (e.g. to reverse the external side effect). Its own
    /// failure is logged and never replaces the original error.
    async fn on_error_from_second_tx(&self, ctx: &mut Self::Context) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut headers = HashMap::new();
        headers.insert("Idempotency-Key".to_string(), "k1".to_string());
        let request = OperationRequest::new(headers, json!({}));

        assert_eq!(request.header("idempotency-key"), Some("k1"));
        assert_eq!(request.header("IDEMPOTENCY-KEY"), Some("k1"));
        assert_eq!(request.header("X-Other"), None);
    }

    #[test]
    fn test_outcome_envelope_accessor() {
        let envelope = ResponseEnvelope::new(503, json!({"retry": true}));
        let outcome = Outcome::Retry(envelope.clone());
        assert_eq!(outcome.envelope(), &envelope);
    }
}
