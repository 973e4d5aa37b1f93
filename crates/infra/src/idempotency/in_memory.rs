//! In-memory idempotency store for tests and single-process development runs.
//!
//! Like the `withdraw_idempotency` table, completed records are kept for the
//! life of the store so replays keep working; nothing is evicted. Deployments
//! use the Postgres store (`USE_PERSISTENT_STORES=true`).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

use super::{
    normalize_content_type, Decision, IdempotencyError, IdempotencyRequest, IdempotencyStore, RecordStatus,
    StoredResponse,
};

#[derive(Debug, Clone)]
struct Record {
    request_hash: String,
    status: RecordStatus,
    response: Option<StoredResponse>,
    locked_until: DateTime<Utc>,
}

/// Records keyed by `(scope, key)`; the mutex plays the role of the row lock.
#[derive(Debug, Default)]
pub struct InMemoryIdempotencyStore {
    records: Mutex<HashMap<(String, String), Record>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock_deadline(now: DateTime<Utc>, ttl: std::time::Duration) -> Result<DateTime<Utc>, IdempotencyError> {
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| IdempotencyError::store("acquire", "lock ttl out of range"))
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn acquire(&self, request: &IdempotencyRequest) -> Result<Decision, IdempotencyError> {
        let request = request.normalized()?;
        let now = Utc::now();
        let locked_until = lock_deadline(now, request.lock_ttl)?;

        let mut records = self
            .records
            .lock()
            .map_err(|_| IdempotencyError::store("acquire", "idempotency state lock poisoned"))?;

        let id = (request.scope.clone(), request.key.clone());
        let Some(record) = records.get_mut(&id) else {
            records.insert(
                id,
                Record {
                    request_hash: request.request_hash,
                    status: RecordStatus::InProgress,
                    response: None,
                    locked_until,
                },
            );
            return Ok(Decision::Acquired);
        };

        if record.request_hash != request.request_hash {
            return Ok(Decision::Conflict);
        }

        match record.status {
            RecordStatus::Completed => Ok(Decision::Replay(record.response.clone().unwrap_or_default())),
            RecordStatus::InProgress if record.locked_until > now => Ok(Decision::InProgress),
            RecordStatus::InProgress => {
                record.locked_until = locked_until;
                Ok(Decision::Acquired)
            }
        }
    }

    async fn complete(
        &self,
        request: &IdempotencyRequest,
        response: &StoredResponse,
    ) -> Result<(), IdempotencyError> {
        let request = request.normalized()?;
        let mut records = self
            .records
            .lock()
            .map_err(|_| IdempotencyError::store("complete", "idempotency state lock poisoned"))?;

        let record = records
            .get_mut(&(request.scope, request.key))
            .filter(|r| r.request_hash == request.request_hash)
            .ok_or(IdempotencyError::NotFound)?;

        record.status = RecordStatus::Completed;
        record.locked_until = Utc::now();
        record.response = Some(StoredResponse {
            status: response.status,
            body: response.body.clone(),
            content_type: normalize_content_type(response.content_type.as_deref()),
        });
        Ok(())
    }
}
