use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::crypto::Aes256GcmCipher;
use crate::error::{AppError, Result};

/// Error codes carried in envelope bodies as `{"error": {"code", "message"}}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    IdempotencyKeyRequired,
    IdempotencyKeyMismatch,
    ExternalRequestInProgress,
    EmailAlreadyExists,
    TemporaryUnavailable,
    ValidationError,
    InternalServerError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::IdempotencyKeyRequired => "IDEMPOTENCY_KEY_REQUIRED",
            ErrorCode::IdempotencyKeyMismatch => "IDEMPOTENCY_KEY_MISMATCH",
            ErrorCode::ExternalRequestInProgress => "EXTERNAL_REQUEST_IN_PROGRESS",
            ErrorCode::EmailAlreadyExists => "EMAIL_ALREADY_EXISTS",
            ErrorCode::TemporaryUnavailable => "TEMPORARY_UNAVAILABLE",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::InternalServerError => "INTERNAL_SERVER_ERROR",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ErrorCode::IdempotencyKeyRequired => {
                "The 'Idempotency-Key' header is required for this request."
            }
            ErrorCode::IdempotencyKeyMismatch => {
                "The idempotency key was already used for a different operation."
            }
            ErrorCode::ExternalRequestInProgress => {
                "The request is currently being processed. Please try again later."
            }
            ErrorCode::EmailAlreadyExists => "An account with this email already exists.",
            ErrorCode::TemporaryUnavailable => {
                "The service is temporarily unavailable. Please try again later."
            }
            ErrorCode::ValidationError => "Request validation failed.",
            ErrorCode::InternalServerError => {
                "An unexpected server error occurred. Please try again later."
            }
        }
    }
}

/// The replayable response triple: HTTP-style status, JSON body, headers.
///
/// This exact triple is what gets encoded into the record's stored blob and
/// replayed verbatim for idempotent re-delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub status: u16,
    pub data: serde_json::Value,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl ResponseEnvelope {
    pub fn new(status: u16, data: serde_json::Value) -> Self {
        Self {
            status,
            data,
            headers: BTreeMap::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Builds an error envelope with the code's default message.
    pub fn from_code(status: u16, code: ErrorCode) -> Self {
        Self::error(status, code, code.message())
    }

    /// Builds an error envelope with a custom message.
    pub fn error(status: u16, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(
            status,
            json!({
                "error": {
                    "code": code.as_str(),
                    "message": message.into(),
                }
            }),
        )
    }
}

/// Encrypts response envelopes into the opaque string persisted on the
/// record, and decrypts them back for replay.
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    cipher: Aes256GcmCipher,
}

impl EnvelopeCodec {
    pub fn new(cipher: Aes256GcmCipher) -> Self {
        Self { cipher }
    }

    pub fn encode(&self, envelope: &ResponseEnvelope) -> Result<String> {
        let json = serde_json::to_string(envelope)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("envelope serialization failed: {}", e)))?;
        self.cipher.encrypt(&json)
    }

    /// Decodes a stored blob. Any failure here is data corruption, never an
    /// in-progress or retryable condition.
    pub fn decode(&self, stored: &str) -> Result<ResponseEnvelope> {
        let json = self.cipher.decrypt(stored)?;
        serde_json::from_str(&json)
            .map_err(|e| AppError::Corruption(format!("stored envelope is not valid JSON: {}", e)))
    }
}
