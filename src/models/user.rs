use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A registered user.
///
/// The email is stored twice: encrypted for retrieval and hashed for the
/// uniqueness check, so the plaintext address never reaches the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub email_encrypted: String,
    pub email_hash: String,
    pub password_hash: String,
    /// Customer id assigned by the external billing provider.
    pub billing_customer_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for inserting a new user row.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email_encrypted: String,
    pub email_hash: String,
    pub password_hash: String,
    pub billing_customer_id: String,
}
