use sqlx::PgConnection;

use crate::error::{AppError, Result};
use crate::models::{NewUser, User};

const USER_COLUMNS: &str =
    "id, email_encrypted, email_hash, password_hash, billing_customer_id, created_at, updated_at";

/// Repository for user rows.
///
/// Functions execute against the caller's open connection so that the signup
/// hooks can run them inside the coordinator's transactions.
pub struct UserRepository;

impl UserRepository {
    /// Inserts a new user and returns the created row.
    pub async fn insert(conn: &mut PgConnection, user: &NewUser) -> Result<User> {
        let row = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (email_encrypted, email_hash, password_hash, billing_customer_id)
            VALUES ($1, $2, $3, $4)
            RETURNING {USER_COLUMNS}
            "#,
        ))
        .bind(&user.email_encrypted)
        .bind(&user.email_hash)
        .bind(&user.password_hash)
        .bind(&user.billing_customer_id)
        .fetch_one(conn)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Finds a user by the deterministic email hash.
    pub async fn find_by_email_hash(
        conn: &mut PgConnection,
        email_hash: &str,
    ) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE email_hash = $1
            "#,
        ))
        .bind(email_hash)
        .fetch_optional(conn)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    pub async fn find_by_id(conn: &mut PgConnection, id: i64) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE id = $1
            "#,
        ))
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }
}
