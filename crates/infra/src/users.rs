//! `UserDirectory` implementations backing login.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use walletd_auth::{DirectoryError, UserDirectory, UserRecord};
use walletd_core::UserId;

#[derive(Debug, Clone)]
pub struct PostgresUserDirectory {
    pool: Arc<PgPool>,
}

impl PostgresUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

#[async_trait]
impl UserDirectory for PostgresUserDirectory {
    #[instrument(skip(self), err)]
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, DirectoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, email, password_hash, status
            FROM users
            WHERE lower(email) = $1
            LIMIT 1
            "#,
        )
        .bind(email)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| DirectoryError::new("failed to get user by email", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let decode = |e: sqlx::Error| DirectoryError::new("failed to decode user row", e);
        let id: Uuid = row.try_get("id").map_err(decode)?;
        Ok(Some(UserRecord {
            id: UserId::from_uuid(id),
            email: row.try_get("email").map_err(decode)?,
            password_hash: row.try_get("password_hash").map_err(decode)?,
            status: row.try_get("status").map_err(decode)?,
        }))
    }
}

/// Users keyed by lowercased email.
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<String, UserRecord>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: UserRecord) {
        if let Ok(mut users) = self.users.write() {
            users.insert(record.email.trim().to_lowercase(), record);
        }
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, DirectoryError> {
        let users = self
            .users
            .read()
            .map_err(|_| DirectoryError::new("find_by_email", "user directory lock poisoned"))?;
        Ok(users.get(email).cloned())
    }
}
