//! Email + password login.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{instrument, warn};

use walletd_core::{BoxError, UserId};

use crate::password::{PasswordError, PasswordHasher};
use crate::token::{TokenError, TokenSigner};

/// Credentials row as stored by the user directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: UserId,
    pub email: String,
    pub password_hash: String,
    pub status: String,
}

impl UserRecord {
    pub fn is_active(&self) -> bool {
        self.status.eq_ignore_ascii_case("active")
    }
}

#[derive(Debug, Error)]
#[error("{operation}: {source}")]
pub struct DirectoryError {
    pub operation: &'static str,
    #[source]
    pub source: BoxError,
}

impl DirectoryError {
    pub fn new(operation: &'static str, source: impl Into<BoxError>) -> Self {
        Self {
            operation,
            source: source.into(),
        }
    }
}

/// Lookup of login credentials by normalised email.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// `email` is already trimmed and lowercased.
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, DirectoryError>;
}

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("email and password are required")]
    MissingCredentials,

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("user lookup failed: {0}")]
    Directory(#[from] DirectoryError),

    #[error("failed to issue token: {0}")]
    Token(#[from] TokenError),

    #[error("password check did not complete: {0}")]
    Hashing(#[source] BoxError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    pub token_type: String,
}

#[derive(Clone)]
pub struct LoginService {
    users: Arc<dyn UserDirectory>,
    hasher: Arc<dyn PasswordHasher>,
    tokens: Arc<dyn TokenSigner>,
}

impl LoginService {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        hasher: Arc<dyn PasswordHasher>,
        tokens: Arc<dyn TokenSigner>,
    ) -> Self {
        Self { users, hasher, tokens }
    }

    #[instrument(skip(self, password), err)]
    pub async fn login(&self, email: &str, password: &str) -> Result<AccessToken, LoginError> {
        let email = email.trim().to_lowercase();
        if email.is_empty() || password.trim().is_empty() {
            return Err(LoginError::MissingCredentials);
        }

        let Some(user) = self.users.find_by_email(&email).await? else {
            return Err(LoginError::InvalidCredentials);
        };
        if !user.is_active() {
            return Err(LoginError::InvalidCredentials);
        }

        // bcrypt verification is CPU-bound; run it on the blocking pool.
        let hasher = Arc::clone(&self.hasher);
        let password = password.to_string();
        let stored_hash = user.password_hash.clone();
        let verdict = tokio::task::spawn_blocking(move || hasher.verify(&password, &stored_hash))
            .await
            .map_err(|e| LoginError::Hashing(Box::new(e)))?;

        match verdict {
            Ok(true) => {}
            Ok(false) => return Err(LoginError::InvalidCredentials),
            Err(PasswordError::Bcrypt(err)) => {
                warn!(user_id = %user.id, error = %err, "stored password hash is unusable");
                return Err(LoginError::InvalidCredentials);
            }
        }

        let access_token = self.tokens.sign(&user.id.to_string())?;
        Ok(AccessToken {
            access_token,
            token_type: "Bearer".to_string(),
        })
    }
}
