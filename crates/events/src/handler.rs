//! Event handler abstraction.

use async_trait::async_trait;
use thiserror::Error;

use crate::event::DomainEvent;

/// Failure raised by a handler invocation.
///
/// Handlers reduce their domain-specific failures to this type; the
/// dispatcher treats any of them as recoverable and retries within its
/// bounded policy.
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct HandlerError {
    reason: String,
}

impl HandlerError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// A consumer of republished domain events.
///
/// Delivery is at-least-once: the same event can reach a handler again
/// after a crash or a retried publish. Handlers registered behind the
/// idempotency guard get deduplication for free; anything registered bare
/// must tolerate duplicates itself.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable handler identity. Used as one half of the idempotency key,
    /// so renaming a handler makes it reprocess history.
    fn name(&self) -> &str;

    async fn handle(&self, event: &DomainEvent) -> Result<(), HandlerError>;
}
