//! Event publication abstraction (mechanics only).
//!
//! The publisher is the boundary the outbox dispatcher hands decoded events
//! to. It makes minimal assumptions: zero or more handlers may be
//! registered, delivery is at-least-once, and a failure is surfaced per
//! overall publish so the caller can retry. How handlers are registered
//! and invoked is the implementation's business.

use async_trait::async_trait;
use thiserror::Error;

use crate::event::DomainEvent;
use crate::handler::HandlerError;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("handler '{handler}' failed: {source}")]
    Handler {
        handler: String,
        #[source]
        source: HandlerError,
    },
}

/// Delivers a decoded event to every registered handler.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError>;
}
