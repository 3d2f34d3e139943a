//! The outbox row model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use convene_core::OutboxMessageId;
use convene_events::codec::{self, EncodeError};
use convene_events::DomainEvent;

/// One persisted domain event, pending or terminal.
///
/// A message is appended inside the same transaction that persisted the
/// domain change raising the event, and is retired exactly once by the
/// dispatcher: `processed_on_utc` goes null → non-null and never back.
/// `error` being set does not mean the row is still pending; a message is
/// done once `processed_on_utc` is stamped, whether the final publish
/// attempt succeeded or not.
///
/// The field set is the persisted contract ops tooling queries against:
/// `id, occurred_on_utc, event_type, content, processed_on_utc, error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: OutboxMessageId,
    /// When the event was raised; defines processing order.
    pub occurred_on_utc: DateTime<Utc>,
    /// Discriminator used to resolve the concrete event type at decode time.
    pub event_type: String,
    /// Self-describing serialized payload.
    pub content: JsonValue,
    /// Null = pending; non-null = terminal (success or recorded failure).
    pub processed_on_utc: Option<DateTime<Utc>>,
    /// Failure detail of the final publish attempt, if it failed.
    pub error: Option<String>,
}

impl OutboxMessage {
    /// Serialize an event into a pending outbox row.
    pub fn from_event(event: &DomainEvent) -> Result<Self, EncodeError> {
        let encoded = codec::encode(event)?;
        Ok(Self {
            id: OutboxMessageId::new(),
            occurred_on_utc: event.occurred_at(),
            event_type: encoded.event_type,
            content: encoded.content,
            processed_on_utc: None,
            error: None,
        })
    }

    pub fn is_pending(&self) -> bool {
        self.processed_on_utc.is_none()
    }
}
