//! Postgres-backed idempotency store.
//!
//! Records live in `withdraw_idempotency` with primary key
//! `(scope, idempotency_key)`. `acquire` runs in one transaction and locks the
//! row with `SELECT ... FOR UPDATE`, so concurrent attempts on the same key are
//! serialised by the database. A first insert that loses a race to another
//! first insert falls back to reading the winner's row, and inserts again if
//! the winner rolled back.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{instrument, warn, Span};

use super::{
    normalize_content_type, Decision, IdempotencyError, IdempotencyRequest, IdempotencyStore, RecordStatus,
    StoredResponse,
};

/// Insert attempts before a caller that keeps losing the race backs off.
const INSERT_ATTEMPTS: usize = 2;

#[derive(Debug, Clone)]
pub struct PostgresIdempotencyStore {
    pool: Arc<PgPool>,
}

impl PostgresIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

#[async_trait]
impl IdempotencyStore for PostgresIdempotencyStore {
    #[instrument(
        skip(self, request),
        fields(scope = %request.scope, key = %request.key, decision = tracing::field::Empty),
        err
    )]
    async fn acquire(&self, request: &IdempotencyRequest) -> Result<Decision, IdempotencyError> {
        let request = request.normalized()?;
        let now = Utc::now();
        let locked_until = TimeDelta::from_std(request.lock_ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| IdempotencyError::store("acquire", "lock ttl out of range"))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| IdempotencyError::store("failed to start transaction", e))?;

        let mut existing = select_for_update(&mut tx, &request).await?;
        for _ in 0..INSERT_ATTEMPTS {
            if existing.is_some() {
                break;
            }
            if insert_in_progress(&mut tx, &request, locked_until).await? {
                commit(tx).await?;
                Span::current().record("decision", "acquired");
                return Ok(Decision::Acquired);
            }
            // Lost the insert race; read the winner's row (gone if it rolled back).
            existing = select_for_update(&mut tx, &request).await?;
        }
        let Some(existing) = existing else {
            warn!("idempotency row kept vanishing after insert conflicts");
            commit(tx).await?;
            return Ok(Decision::InProgress);
        };

        let decision = if existing.request_hash != request.request_hash {
            Decision::Conflict
        } else {
            match existing.status {
                RecordStatus::Completed => Decision::Replay(StoredResponse {
                    status: existing.response_status.unwrap_or(0),
                    body: existing.response_body.unwrap_or_default(),
                    content_type: normalize_content_type(existing.response_content_type.as_deref()),
                }),
                RecordStatus::InProgress if existing.locked_until.is_some_and(|t| t > now) => Decision::InProgress,
                RecordStatus::InProgress => {
                    sqlx::query(
                        r#"
                        UPDATE withdraw_idempotency
                        SET status = 'in_progress', locked_until = $3, updated_at = NOW()
                        WHERE scope = $1 AND idempotency_key = $2
                        "#,
                    )
                    .bind(&request.scope)
                    .bind(&request.key)
                    .bind(locked_until)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| IdempotencyError::store("failed to refresh idempotency lock", e))?;
                    Decision::Acquired
                }
            }
        };

        commit(tx).await?;
        Span::current().record("decision", decision_label(&decision));
        Ok(decision)
    }

    #[instrument(
        skip(self, request, response),
        fields(scope = %request.scope, key = %request.key, status = response.status),
        err
    )]
    async fn complete(
        &self,
        request: &IdempotencyRequest,
        response: &StoredResponse,
    ) -> Result<(), IdempotencyError> {
        let request = request.normalized()?;

        let result = sqlx::query(
            r#"
            UPDATE withdraw_idempotency
            SET
                status = 'completed',
                response_status = $4,
                response_body = $5,
                response_content_type = $6,
                locked_until = NOW(),
                completed_at = NOW(),
                updated_at = NOW()
            WHERE scope = $1 AND idempotency_key = $2 AND request_hash = $3
            "#,
        )
        .bind(&request.scope)
        .bind(&request.key)
        .bind(&request.request_hash)
        .bind(response.status)
        .bind(&response.body)
        .bind(normalize_content_type(response.content_type.as_deref()))
        .execute(&*self.pool)
        .await
        .map_err(|e| IdempotencyError::store("failed to complete idempotency key", e))?;

        if result.rows_affected() == 0 {
            return Err(IdempotencyError::NotFound);
        }
        Ok(())
    }
}

fn decision_label(decision: &Decision) -> &'static str {
    match decision {
        Decision::Acquired => "acquired",
        Decision::Replay(_) => "replay",
        Decision::InProgress => "in_progress",
        Decision::Conflict => "conflict",
    }
}

async fn commit(tx: Transaction<'_, Postgres>) -> Result<(), IdempotencyError> {
    tx.commit()
        .await
        .map_err(|e| IdempotencyError::store("failed to commit transaction", e))
}

async fn select_for_update(
    tx: &mut Transaction<'_, Postgres>,
    request: &IdempotencyRequest,
) -> Result<Option<IdempotencyRow>, IdempotencyError> {
    let row = sqlx::query(
        r#"
        SELECT
            request_hash,
            status,
            response_status,
            response_body,
            response_content_type,
            locked_until
        FROM withdraw_idempotency
        WHERE scope = $1 AND idempotency_key = $2
        FOR UPDATE
        "#,
    )
    .bind(&request.scope)
    .bind(&request.key)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| IdempotencyError::store("failed to read idempotency key", e))?;

    row.map(|row| IdempotencyRow::try_from_row(&row)).transpose()
}

/// `false` when another transaction already owns the key.
async fn insert_in_progress(
    tx: &mut Transaction<'_, Postgres>,
    request: &IdempotencyRequest,
    locked_until: DateTime<Utc>,
) -> Result<bool, IdempotencyError> {
    let result = sqlx::query(
        r#"
        INSERT INTO withdraw_idempotency (
            scope,
            idempotency_key,
            request_hash,
            status,
            locked_until,
            created_at,
            updated_at
        )
        VALUES ($1, $2, $3, 'in_progress', $4, NOW(), NOW())
        ON CONFLICT (scope, idempotency_key) DO NOTHING
        "#,
    )
    .bind(&request.scope)
    .bind(&request.key)
    .bind(&request.request_hash)
    .bind(locked_until)
    .execute(&mut **tx)
    .await
    .map_err(|e| IdempotencyError::store("failed to insert idempotency key", e))?;

    Ok(result.rows_affected() == 1)
}

#[derive(Debug)]
struct IdempotencyRow {
    request_hash: String,
    status: RecordStatus,
    response_status: Option<i32>,
    response_body: Option<Vec<u8>>,
    response_content_type: Option<String>,
    locked_until: Option<DateTime<Utc>>,
}

impl IdempotencyRow {
    fn try_from_row(row: &sqlx::postgres::PgRow) -> Result<Self, IdempotencyError> {
        let decode = |e: sqlx::Error| IdempotencyError::store("failed to decode idempotency row", e);
        let status: String = row.try_get("status").map_err(decode)?;
        let status = RecordStatus::parse(&status).ok_or_else(|| {
            IdempotencyError::store(
                "failed to decode idempotency row",
                format!("unknown idempotency status {status:?}"),
            )
        })?;

        Ok(Self {
            request_hash: row.try_get("request_hash").map_err(decode)?,
            status,
            response_status: row.try_get("response_status").map_err(decode)?,
            response_body: row.try_get("response_body").map_err(decode)?,
            response_content_type: row.try_get("response_content_type").map_err(decode)?,
            locked_until: row.try_get("locked_until").map_err(decode)?,
        })
    }
}
