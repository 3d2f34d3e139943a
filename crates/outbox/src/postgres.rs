//! Postgres-backed outbox and idempotency stores.
//!
//! Uses the SQLx connection pool (thread-safe, `Send + Sync`). Batch
//! stamping runs in a single transaction so a crash or commit failure
//! leaves every row of the batch pending. `append_in_tx` lets the
//! business-transaction layer write outbox rows inside its own open
//! transaction, so the event is recorded iff the state change commits.
//!
//! Schema lives in `schema/outbox.sql`:
//!
//! | column             | type        |                                  |
//! |--------------------|-------------|----------------------------------|
//! | `id`               | UUID        | primary key                      |
//! | `occurred_on_utc`  | TIMESTAMPTZ | processing order                 |
//! | `event_type`       | TEXT        | decode discriminator             |
//! | `content`          | JSONB       | self-describing payload          |
//! | `processed_on_utc` | TIMESTAMPTZ | null = pending                   |
//! | `error`            | TEXT        | terminal failure detail          |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use convene_core::{EventId, OutboxMessageId};

use crate::idempotency::{IdempotencyStore, IdempotencyStoreError};
use crate::message::OutboxMessage;
use crate::store::{OutboxStats, OutboxStore, OutboxStoreError, ProcessedUpdate};

fn map_sqlx_error(operation: &str, e: sqlx::Error) -> OutboxStoreError {
    OutboxStoreError::Storage(format!("{operation}: {e}"))
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|d| d.code())
        .is_some_and(|code| code == "23505")
}

#[derive(Debug, FromRow)]
struct OutboxMessageRow {
    id: Uuid,
    occurred_on_utc: DateTime<Utc>,
    event_type: String,
    content: serde_json::Value,
    processed_on_utc: Option<DateTime<Utc>>,
    error: Option<String>,
}

impl From<OutboxMessageRow> for OutboxMessage {
    fn from(row: OutboxMessageRow) -> Self {
        Self {
            id: OutboxMessageId::from_uuid(row.id),
            occurred_on_utc: row.occurred_on_utc,
            event_type: row.event_type,
            content: row.content,
            processed_on_utc: row.processed_on_utc,
            error: row.error,
        }
    }
}

/// Postgres-backed outbox store.
#[derive(Debug, Clone)]
pub struct PostgresOutboxStore {
    pool: Arc<PgPool>,
}

impl PostgresOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Append rows inside a caller-owned transaction.
    ///
    /// This is the transactional-writer entry point: the application layer
    /// opens a transaction, persists its entity changes, appends the
    /// events raised by those changes, and commits atomically.
    pub async fn append_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        messages: &[OutboxMessage],
    ) -> Result<(), OutboxStoreError> {
        for message in messages {
            sqlx::query(
                r#"
                INSERT INTO outbox_messages (
                    id,
                    occurred_on_utc,
                    event_type,
                    content,
                    processed_on_utc,
                    error
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(message.id.as_uuid())
            .bind(message.occurred_on_utc)
            .bind(&message.event_type)
            .bind(&message.content)
            .bind(message.processed_on_utc)
            .bind(&message.error)
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    OutboxStoreError::Duplicate(message.id)
                } else {
                    map_sqlx_error("append", e)
                }
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    #[instrument(skip(self, messages), fields(count = messages.len()), err)]
    async fn append(&self, messages: Vec<OutboxMessage>) -> Result<(), OutboxStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("append/begin", e))?;

        Self::append_in_tx(&mut tx, &messages).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("append/commit", e))
    }

    #[instrument(skip(self), err)]
    async fn fetch_pending(&self, limit: usize) -> Result<Vec<OutboxMessage>, OutboxStoreError> {
        let rows = sqlx::query_as::<_, OutboxMessageRow>(
            r#"
            SELECT
                id,
                occurred_on_utc,
                event_type,
                content,
                processed_on_utc,
                error
            FROM outbox_messages
            WHERE processed_on_utc IS NULL
            ORDER BY occurred_on_utc ASC, id ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_pending", e))?;

        Ok(rows.into_iter().map(OutboxMessage::from).collect())
    }

    #[instrument(skip(self, updates), fields(count = updates.len()), err)]
    async fn mark_processed_batch(
        &self,
        updates: &[ProcessedUpdate],
    ) -> Result<(), OutboxStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("mark_processed/begin", e))?;

        for update in updates {
            let result = sqlx::query(
                r#"
                UPDATE outbox_messages
                SET processed_on_utc = $2, error = $3
                WHERE id = $1 AND processed_on_utc IS NULL
                "#,
            )
            .bind(update.id.as_uuid())
            .bind(update.processed_on_utc)
            .bind(&update.error)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("mark_processed", e))?;

            // The predicate on processed_on_utc enforces the single
            // null → non-null transition; zero rows means the row is
            // missing or already terminal. Dropping the transaction
            // rolls everything back.
            if result.rows_affected() != 1 {
                return Err(OutboxStoreError::Storage(format!(
                    "message missing or already processed: {}",
                    update.id
                )));
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("mark_processed/commit", e))
    }

    #[instrument(skip(self), err)]
    async fn stats(&self) -> Result<OutboxStats, OutboxStoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE processed_on_utc IS NULL) AS pending,
                COUNT(*) FILTER (WHERE processed_on_utc IS NOT NULL AND error IS NULL) AS processed,
                COUNT(*) FILTER (WHERE processed_on_utc IS NOT NULL AND error IS NOT NULL) AS failed
            FROM outbox_messages
            "#,
        )
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stats", e))?;

        let count = |name: &str| -> Result<usize, OutboxStoreError> {
            row.try_get::<i64, _>(name)
                .map(|v| v.max(0) as usize)
                .map_err(|e| OutboxStoreError::Storage(format!("stats/{name}: {e}")))
        };

        Ok(OutboxStats {
            pending: count("pending")?,
            processed: count("processed")?,
            failed: count("failed")?,
        })
    }
}

/// Postgres-backed idempotency record store.
///
/// One row per (event, handler) execution; inserts are
/// `ON CONFLICT DO NOTHING`, so recording an already-present pair is a
/// no-op rather than an error.
#[derive(Debug, Clone)]
pub struct PostgresIdempotencyStore {
    pool: Arc<PgPool>,
}

impl PostgresIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl IdempotencyStore for PostgresIdempotencyStore {
    #[instrument(skip(self), err)]
    async fn already_handled(
        &self,
        event_id: EventId,
        handler_name: &str,
    ) -> Result<bool, IdempotencyStoreError> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM outbox_message_consumers
                WHERE event_id = $1 AND handler_name = $2
            ) AS handled
            "#,
        )
        .bind(event_id.as_uuid())
        .bind(handler_name)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| IdempotencyStoreError::Storage(format!("already_handled: {e}")))?;

        row.try_get::<bool, _>("handled")
            .map_err(|e| IdempotencyStoreError::Storage(format!("already_handled: {e}")))
    }

    #[instrument(skip(self), err)]
    async fn record_handled(
        &self,
        event_id: EventId,
        handler_name: &str,
    ) -> Result<(), IdempotencyStoreError> {
        sqlx::query(
            r#"
            INSERT INTO outbox_message_consumers (event_id, handler_name, handled_on_utc)
            VALUES ($1, $2, $3)
            ON CONFLICT (event_id, handler_name) DO NOTHING
            "#,
        )
        .bind(event_id.as_uuid())
        .bind(handler_name)
        .bind(Utc::now())
        .execute(&*self.pool)
        .await
        .map_err(|e| IdempotencyStoreError::Storage(format!("record_handled: {e}")))?;

        Ok(())
    }
}
