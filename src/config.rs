use serde::Deserialize;

use crate::error::{AppError, Result};

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub application: ApplicationSettings,
    pub encryption: EncryptionSettings,
    pub billing: BillingSettings,
    #[serde(default)]
    pub idempotency: IdempotencySettings,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub pool_size: u32,
}

#[derive(Debug, Deserialize)]
pub struct ApplicationSettings {
    pub port: u16,
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Key material for the stored-response cipher. The key is 32 bytes encoded
/// as 64 hex characters and is parsed once at startup.
#[derive(Debug, Deserialize)]
pub struct EncryptionSettings {
    pub aes_256_gcm_key: String,
}

#[derive(Debug, Deserialize)]
pub struct BillingSettings {
    pub api_url: String,
    pub api_key: String,
    #[serde(default = "default_billing_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize)]
pub struct IdempotencySettings {
    #[serde(default = "default_max_attempt_count")]
    pub max_attempt_count: i32,
    #[serde(default = "default_key_header")]
    pub key_header: String,
}

impl Default for IdempotencySettings {
    fn default() -> Self {
        Self {
            max_attempt_count: default_max_attempt_count(),
            key_header: default_key_header(),
        }
    }
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_billing_timeout() -> u64 {
    10
}

fn default_max_attempt_count() -> i32 {
    3
}

fn default_key_header() -> String {
    "Idempotency-Key".to_string()
}

impl Settings {
    pub fn new() -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| AppError::Configuration(e.to_string()))
    }
}
