use std::collections::HashMap;

use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::error::AppError;
use crate::idempotency::{ErrorCode, OperationRequest, ResponseEnvelope};
use crate::observability::AggregatedHealth;

use super::routes::AppState;

/// Handles an idempotent signup request. The coordinator resolves every
/// business outcome to an envelope; only invariant violations reach the
/// error arm below.
pub async fn signup(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let request = operation_request(&headers, body);

    match state.coordinator.handle(state.signup.as_ref(), &request).await {
        Ok(envelope) => envelope_response(envelope),
        Err(AppError::Validation(message)) => {
            envelope_response(ResponseEnvelope::error(400, ErrorCode::ValidationError, message))
        }
        Err(e) => {
            tracing::error!(error = %e, "signup request failed");
            envelope_response(ResponseEnvelope::from_code(500, ErrorCode::InternalServerError))
        }
    }
}

/// Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<AggregatedHealth>) {
    let health = state.health_checker.check().await;
    let status = if health.status.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(health))
}

/// Readiness check endpoint.
pub async fn readiness_check(State(state): State<AppState>) -> StatusCode {
    let db_healthy = sqlx::query("SELECT 1").fetch_one(&state.pool).await.is_ok();

    if db_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Liveness check endpoint.
pub async fn liveness_check() -> StatusCode {
    StatusCode::OK
}

/// Prometheus metrics endpoint.
pub async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    match &state.metrics_handle {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn operation_request(headers: &HeaderMap, body: serde_json::Value) -> OperationRequest {
    let headers: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    OperationRequest::new(headers, body)
}

/// Converts an envelope into the HTTP response it describes, verbatim.
fn envelope_response(envelope: ResponseEnvelope) -> Response {
    let status =
        StatusCode::from_u16(envelope.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, Json(envelope.data)).into_response();

    for (name, value) in &envelope.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            response.headers_mut().insert(name, value);
        }
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_response_carries_status_and_headers() {
        let envelope = ResponseEnvelope::new(503, json!({"error": "unavailable"}))
            .with_header("Retry-After", "5");

        let response = envelope_response(envelope);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get("Retry-After").unwrap().to_str().unwrap(),
            "5"
        );
    }

    #[test]
    fn test_operation_request_lowercases_header_names() {
        let mut headers = HeaderMap::new();
        headers.insert("Idempotency-Key", HeaderValue::from_static("k-42"));

        let request = operation_request(&headers, json!({}));
        assert_eq!(request.header("Idempotency-Key"), Some("k-42"));
    }
}
