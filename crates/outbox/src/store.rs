//! Outbox storage abstraction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use convene_core::OutboxMessageId;

use crate::message::OutboxMessage;

/// Outbox store error.
#[derive(Debug, Error)]
pub enum OutboxStoreError {
    #[error("message already exists: {0}")]
    Duplicate(OutboxMessageId),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Terminal outcome for one message, applied by the dispatcher as part of
/// an atomic batch. The dispatcher is the only writer of these two fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedUpdate {
    pub id: OutboxMessageId,
    pub processed_on_utc: DateTime<Utc>,
    pub error: Option<String>,
}

impl ProcessedUpdate {
    pub fn succeeded(id: OutboxMessageId, processed_on_utc: DateTime<Utc>) -> Self {
        Self {
            id,
            processed_on_utc,
            error: None,
        }
    }

    pub fn failed(
        id: OutboxMessageId,
        processed_on_utc: DateTime<Utc>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id,
            processed_on_utc,
            error: Some(error.into()),
        }
    }
}

/// Counts for monitoring. `failed` means terminal-with-error; `processed`
/// means terminal without one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct OutboxStats {
    pub pending: usize,
    pub processed: usize,
    pub failed: usize,
}

/// Durable store of outbox rows.
///
/// Implementations must:
/// - return pending messages in FIFO order: `occurred_on_utc` ascending,
///   ties broken by `id` (UUIDv7, time-ordered)
/// - apply `mark_processed_batch` atomically (all updates commit or none do)
/// - reject a second terminal stamp for the same row (the null → non-null
///   transition happens exactly once)
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Append pending messages. The business-transaction layer calls this;
    /// the Postgres implementation additionally offers an in-transaction
    /// variant so the caller's commit owns atomicity.
    async fn append(&self, messages: Vec<OutboxMessage>) -> Result<(), OutboxStoreError>;

    /// Fetch the oldest `limit` unprocessed messages, FIFO.
    async fn fetch_pending(&self, limit: usize) -> Result<Vec<OutboxMessage>, OutboxStoreError>;

    /// Stamp terminal outcomes for a batch, atomically.
    async fn mark_processed_batch(
        &self,
        updates: &[ProcessedUpdate],
    ) -> Result<(), OutboxStoreError>;

    /// Counters for ops dashboards.
    async fn stats(&self) -> Result<OutboxStats, OutboxStoreError>;
}
