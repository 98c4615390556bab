use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::BillingSettings;
use crate::error::{AppError, Result};

/// A customer created at the billing provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingCustomer {
    pub id: String,
    pub email: String,
}

/// The external billing service, as seen by the signup operation.
///
/// The call may fail and may execute more than once across crash/retry
/// cycles; callers must not assume exactly-once delivery.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BillingClient: Send + Sync {
    /// Creates a customer for the given email.
    async fn create_customer(&self, email: &str) -> Result<BillingCustomer>;

    /// Archives a previously created customer. The provider keeps archived
    /// customers addressable, so the email is prefixed with a fresh UUID to
    /// free it for a later signup.
    async fn archive_customer(&self, customer_id: &str, email: &str) -> Result<()>;
}

/// HTTP implementation of [`BillingClient`].
pub struct HttpBillingClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct CreateCustomerRequest<'a> {
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct ArchiveCustomerRequest {
    email: String,
    status: &'static str,
}

impl HttpBillingClient {
    pub fn new(settings: &BillingSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()
            .map_err(|e| AppError::Configuration(format!("billing client setup failed: {}", e)))?;

        Ok(Self {
            http,
            api_url: settings.api_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
        })
    }
}

#[async_trait]
impl BillingClient for HttpBillingClient {
    async fn create_customer(&self, email: &str) -> Result<BillingCustomer> {
        let response = self
            .http
            .post(format!("{}/customers", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&CreateCustomerRequest { email })
            .send()
            .await
            .map_err(|e| AppError::ExternalService(format!("create customer request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::ExternalService(format!(
                "create customer returned {}",
                response.status()
            )));
        }

        response
            .json::<BillingCustomer>()
            .await
            .map_err(|e| AppError::ExternalService(format!("create customer response invalid: {}", e)))
    }

    async fn archive_customer(&self, customer_id: &str, email: &str) -> Result<()> {
        let freed_email = format!("{}+{}", Uuid::new_v4(), email);
        let response = self
            .http
            .patch(format!("{}/customers/{}", self.api_url, customer_id))
            .bearer_auth(&self.api_key)
            .json(&ArchiveCustomerRequest {
                email: freed_email,
                status: "archived",
            })
            .send()
            .await
            .map_err(|e| {
                AppError::ExternalService(format!("archive customer request failed: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(AppError::ExternalService(format!(
                "archive customer returned {}",
                response.status()
            )));
        }

        Ok(())
    }
}
