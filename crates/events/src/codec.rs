//! Envelope codec: `DomainEvent` ⇄ (type discriminator, JSON content).
//!
//! Encoding captures the discriminator alongside a self-describing payload
//! (serde embeds the same tag inside the JSON), so a stored row can be
//! decoded years later without the caller knowing the concrete type.
//! Decoding resolves the tag through the `DomainEvent` enum (a registry of
//! tag to deserializer) and fails explicitly for tags it does not know.
//! Pure transformation, no side effects.

use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::event::DomainEvent;

/// JSON key under which the discriminator is embedded in the payload.
pub const TYPE_TAG: &str = "type";

/// A serialized event, ready to be written to an outbox row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedEvent {
    /// Discriminator, duplicated out of the payload for indexable queries.
    pub event_type: String,
    /// Self-describing JSON payload (embeds the discriminator).
    pub content: JsonValue,
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("event payload serialization failed: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Why a stored payload could not be turned back into an event.
///
/// All of these are permanent: a payload that fails to decode today will
/// fail identically tomorrow, so callers must not retry.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The discriminator resolves to no known event type (renamed or
    /// removed variant).
    #[error("unknown event type '{0}'")]
    UnknownEventType(String),

    /// The row's discriminator column and the tag embedded in the payload
    /// disagree; the row was corrupted or written by broken tooling.
    #[error("event type mismatch: record says '{record}', payload embeds '{embedded}'")]
    TypeMismatch { record: String, embedded: String },

    /// The payload is not valid JSON for the claimed type.
    #[error("malformed event payload: {0}")]
    Malformed(String),
}

/// Serialize an event, preserving its concrete type for later decode.
pub fn encode(event: &DomainEvent) -> Result<EncodedEvent, EncodeError> {
    let content = serde_json::to_value(event).map_err(EncodeError::Serialize)?;
    Ok(EncodedEvent {
        event_type: event.event_type().to_string(),
        content,
    })
}

/// Reconstruct the concrete event from a stored row.
///
/// `event_type` is the row's discriminator column; `content` is the stored
/// payload. The embedded tag must match the column.
pub fn decode(event_type: &str, content: &JsonValue) -> Result<DomainEvent, DecodeError> {
    if !DomainEvent::KNOWN_TYPES.contains(&event_type) {
        return Err(DecodeError::UnknownEventType(event_type.to_string()));
    }

    let embedded = content
        .get(TYPE_TAG)
        .and_then(JsonValue::as_str)
        .ok_or_else(|| DecodeError::Malformed("payload is missing its type tag".to_string()))?;

    if embedded != event_type {
        return Err(DecodeError::TypeMismatch {
            record: event_type.to_string(),
            embedded: embedded.to_string(),
        });
    }

    serde_json::from_value(content.clone()).map_err(|e| DecodeError::Malformed(e.to_string()))
}
