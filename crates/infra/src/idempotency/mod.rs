//! Exactly-once execution of mutating requests keyed by a client-chosen
//! idempotency key.
//!
//! A record is identified by `(scope, key)` and bound to the hash of the
//! request that created it. [`IdempotencyStore::acquire`] decides whether the
//! caller may execute, must replay a stored response, must back off because
//! another attempt holds the lock, or reused the key for a different payload.
//! [`IdempotencyStore::complete`] stores the final response for later replays.

use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;

use walletd_core::BoxError;

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryIdempotencyStore;
pub use postgres::PostgresIdempotencyStore;

/// Lock lifetime used when the caller passes a zero TTL.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30);

/// Lifecycle state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordStatus {
    InProgress,
    Completed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::InProgress => "in_progress",
            RecordStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "in_progress" => Some(RecordStatus::InProgress),
            "completed" => Some(RecordStatus::Completed),
            _ => None,
        }
    }
}

/// Identity of one idempotent attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRequest {
    pub scope: String,
    pub key: String,
    pub request_hash: String,
    pub lock_ttl: Duration,
}

impl IdempotencyRequest {
    pub fn new(
        scope: impl Into<String>,
        key: impl Into<String>,
        request_hash: impl Into<String>,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            scope: scope.into(),
            key: key.into(),
            request_hash: request_hash.into(),
            lock_ttl,
        }
    }

    /// Trim every field, reject blanks and default the lock TTL.
    pub fn normalized(&self) -> Result<Self, IdempotencyError> {
        let scope = required("scope", &self.scope)?;
        let key = required("key", &self.key)?;
        let request_hash = required("request_hash", &self.request_hash)?;
        let lock_ttl = if self.lock_ttl.is_zero() {
            DEFAULT_LOCK_TTL
        } else {
            self.lock_ttl
        };

        Ok(Self {
            scope,
            key,
            request_hash,
            lock_ttl,
        })
    }
}

fn required(field: &'static str, value: &str) -> Result<String, IdempotencyError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(IdempotencyError::MissingField(field));
    }
    Ok(value.to_string())
}

/// A response captured for replay.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoredResponse {
    /// HTTP status as stored; values outside `100..=999` replay as `200`.
    pub status: i32,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

impl StoredResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>, content_type: Option<&str>) -> Self {
        Self {
            status: i32::from(status),
            body: body.into(),
            content_type: normalize_content_type(content_type),
        }
    }

    pub fn replay_status(&self) -> u16 {
        match u16::try_from(self.status) {
            Ok(status) if (100..=999).contains(&status) => status,
            _ => 200,
        }
    }
}

pub(crate) fn normalize_content_type(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

/// What the caller should do with this attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The caller holds the lock and must execute, then `complete`.
    Acquired,
    /// A completed attempt exists; answer with its response.
    Replay(StoredResponse),
    /// Another attempt holds an unexpired lock.
    InProgress,
    /// The key was first used with a different request hash.
    Conflict,
}

#[derive(Debug, Error)]
pub enum IdempotencyError {
    #[error("idempotency {0} is required")]
    MissingField(&'static str),

    #[error("idempotency key not found for completion")]
    NotFound,

    #[error("{operation}: {source}")]
    Store {
        operation: &'static str,
        #[source]
        source: BoxError,
    },
}

impl IdempotencyError {
    pub fn store(operation: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Store {
            operation,
            source: source.into(),
        }
    }
}

/// Durable coordinator for idempotent requests.
///
/// `acquire` must be atomic per `(scope, key)`: of two concurrent first
/// attempts exactly one is `Acquired`.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn acquire(&self, request: &IdempotencyRequest) -> Result<Decision, IdempotencyError>;

    /// Persist the final response. Matches on scope, key and request hash;
    /// `NotFound` when nothing matched.
    async fn complete(
        &self,
        request: &IdempotencyRequest,
        response: &StoredResponse,
    ) -> Result<(), IdempotencyError>;
}

/// Scope under which a user's withdrawals are deduplicated.
pub fn withdraw_scope(user_id: &str) -> String {
    format!("withdraw:{}", user_id.trim())
}

/// Lowercase hex SHA-256 over
/// `upper(trim(method)) "\n" trim(path) "\n" trim(principal) "\n" body`.
pub fn request_hash(method: &str, path: &str, principal: &str, body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.trim().to_uppercase().as_bytes());
    hasher.update(b"\n");
    hasher.update(path.trim().as_bytes());
    hasher.update(b"\n");
    hasher.update(principal.trim().as_bytes());
    hasher.update(b"\n");
    hasher.update(body);
    hex::encode(hasher.finalize())
}
