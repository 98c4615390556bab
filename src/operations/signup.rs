use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use sqlx::PgConnection;
use validator::Validate;

use crate::crypto::{hash_email, hash_password, Aes256GcmCipher};
use crate::error::{AppError, Result};
use crate::external::{BillingClient, BillingCustomer};
use crate::idempotency::codec::{ErrorCode, ResponseEnvelope};
use crate::idempotency::hooks::{IdempotentOperation, OperationRequest, Outcome};
use crate::idempotency::record::IdempotencyRecord;
use crate::models::NewUser;
use crate::repositories::UserRepository;

pub const SIGNUP_OPERATION: &str = "signup";

/// Signup request body.
#[derive(Debug, Deserialize, Validate)]
pub struct SignupRequest {
    #[validate(email(message = "Invalid email address."))]
    pub email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters."))]
    pub password: String,
}

/// Values staged across the signup hooks for one request.
#[derive(Debug)]
pub struct SignupContext {
    email: String,
    email_hash: String,
    email_encrypted: String,
    password_hash: String,
    billing_customer: Option<BillingCustomer>,
    user_id: Option<i64>,
}

/// Creates a user account: a local row plus a customer at the external
/// billing provider, sequenced by the request coordinator.
pub struct SignupOperation {
    billing: Arc<dyn BillingClient>,
    cipher: Aes256GcmCipher,
}

impl SignupOperation {
    pub fn new(billing: Arc<dyn BillingClient>, cipher: Aes256GcmCipher) -> Self {
        Self { billing, cipher }
    }
}

#[async_trait]
impl IdempotentOperation for SignupOperation {
    type Context = SignupContext;

    fn operation(&self) -> &'static str {
        SIGNUP_OPERATION
    }

    async fn on_parse_before_first_tx(&self, request: &OperationRequest) -> Result<SignupContext> {
        let parsed: SignupRequest = serde_json::from_value(request.body.clone())
            .map_err(|e| AppError::Validation(format!("invalid signup payload: {}", e)))?;
        parsed
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let email_hash = hash_email(&parsed.email);
        let email_encrypted = self.cipher.encrypt(&parsed.email)?;
        let password_hash = hash_password(&parsed.password);

        Ok(SignupContext {
            email: parsed.email,
            email_hash,
            email_encrypted,
            password_hash,
            billing_customer: None,
            user_id: None,
        })
    }

    async fn on_parse_in_first_tx(
        &self,
        conn: &mut PgConnection,
        _record: &IdempotencyRecord,
        ctx: &mut SignupContext,
    ) -> Result<Option<ResponseEnvelope>> {
        // Checked before spending effort on the external call; the committed
        // envelope makes replays of this key observe the same conflict.
        if UserRepository::find_by_email_hash(conn, &ctx.email_hash)
            .await?
            .is_some()
        {
            return Ok(Some(ResponseEnvelope::from_code(
                409,
                ErrorCode::EmailAlreadyExists,
            )));
        }

        Ok(None)
    }

    async fn on_external_call(&self, ctx: &mut SignupContext) -> Result<()> {
        let customer = self.billing.create_customer(&ctx.email).await?;
        tracing::debug!(customer_id = %customer.id, "billing customer created");
        ctx.billing_customer = Some(customer);
        Ok(())
    }

    async fn on_parse_in_second_tx(
        &self,
        conn: &mut PgConnection,
        _record: &IdempotencyRecord,
        external_error: Option<&AppError>,
        ctx: &mut SignupContext,
    ) -> Result<Outcome> {
        if external_error.is_some() {
            return Ok(Outcome::Retry(
                ResponseEnvelope::from_code(503, ErrorCode::TemporaryUnavailable)
                    .with_header("Retry-After", "5"),
            ));
        }

        let customer = ctx.billing_customer.as_ref().ok_or_else(|| {
            AppError::Coordination(
                "billing customer missing after successful external call".to_string(),
            )
        })?;

        let user = UserRepository::insert(
            conn,
            &NewUser {
                email_encrypted: ctx.email_encrypted.clone(),
                email_hash: ctx.email_hash.clone(),
                password_hash: ctx.password_hash.clone(),
                billing_customer_id: customer.id.clone(),
            },
        )
        .await?;
        ctx.user_id = Some(user.id);

        let email = self.cipher.decrypt(&ctx.email_encrypted)?;
        Ok(Outcome::Success(ResponseEnvelope::new(
            201,
            json!({ "id": user.id, "email": email }),
        )))
    }

    async fn on_error_from_second_tx(&self, ctx: &mut SignupContext) -> Result<()> {
        if let Some(customer) = &ctx.billing_customer {
            tracing::warn!(customer_id = %customer.id, "archiving billing customer after finalize failure");
            self.billing
                .archive_customer(&customer.id, &ctx.email)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::MockBillingClient;
    use std::collections::HashMap;

    const TEST_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn operation_with(billing: MockBillingClient) -> SignupOperation {
        SignupOperation::new(
            Arc::new(billing),
            Aes256GcmCipher::from_hex_key(TEST_KEY).unwrap(),
        )
    }

    fn request(body: serde_json::Value) -> OperationRequest {
        OperationRequest::new(HashMap::new(), body)
    }

    #[tokio::test]
    async fn test_parse_stages_derived_values() {
        let operation = operation_with(MockBillingClient::new());
        let ctx = operation
            .on_parse_before_first_tx(&request(
                json!({"email": "alice@example.com", "password": "hunter2hunter2"}),
            ))
            .await
            .unwrap();

        assert_eq!(ctx.email, "alice@example.com");
        assert_eq!(ctx.email_hash, hash_email("alice@example.com"));
        assert_eq!(ctx.password_hash, hash_password("hunter2hunter2"));
        assert!(ctx.billing_customer.is_none());

        let cipher = Aes256GcmCipher::from_hex_key(TEST_KEY).unwrap();
        assert_eq!(cipher.decrypt(&ctx.email_encrypted).unwrap(), ctx.email);
    }

    #[tokio::test]
    async fn test_parse_rejects_invalid_input() {
        let operation = operation_with(MockBillingClient::new());

        let err = operation
            .on_parse_before_first_tx(&request(json!({"email": "not-an-email", "password": "hunter2hunter2"})))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = operation
            .on_parse_before_first_tx(&request(json!({"email": "a@example.com", "password": "short"})))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = operation
            .on_parse_before_first_tx(&request(json!({"email": "a@example.com"})))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_external_call_stages_customer() {
        let mut billing = MockBillingClient::new();
        billing.expect_create_customer().times(1).returning(|email| {
            Ok(BillingCustomer {
                id: "cus_123".to_string(),
                email: email.to_string(),
            })
        });
        let operation = operation_with(billing);

        let mut ctx = operation
            .on_parse_before_first_tx(&request(
                json!({"email": "alice@example.com", "password": "hunter2hunter2"}),
            ))
            .await
            .unwrap();

        operation.on_external_call(&mut ctx).await.unwrap();
        assert_eq!(ctx.billing_customer.as_ref().unwrap().id, "cus_123");
    }

    #[tokio::test]
    async fn test_compensation_archives_created_customer() {
        let mut billing = MockBillingClient::new();
        billing.expect_create_customer().times(1).returning(|email| {
            Ok(BillingCustomer {
                id: "cus_del".to_string(),
                email: email.to_string(),
            })
        });
        billing
            .expect_archive_customer()
            .times(1)
            .withf(|id, email| id == "cus_del" && email == "alice@example.com")
            .returning(|_, _| Ok(()));
        let operation = operation_with(billing);

        let mut ctx = operation
            .on_parse_before_first_tx(&request(
                json!({"email": "alice@example.com", "password": "hunter2hunter2"}),
            ))
            .await
            .unwrap();
        operation.on_external_call(&mut ctx).await.unwrap();
        operation.on_error_from_second_tx(&mut ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_compensation_is_noop_without_customer() {
        let operation = operation_with(MockBillingClient::new());
        let mut ctx = operation
            .on_parse_before_first_tx(&request(
                json!({"email": "alice@example.com", "password": "hunter2hunter2"}),
            ))
            .await
            .unwrap();

        operation.on_error_from_second_tx(&mut ctx).await.unwrap();
    }
}
