//! In-process publisher for the relay binary and tests.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::event::DomainEvent;
use crate::handler::EventHandler;
use crate::publisher::{EventPublisher, PublishError};

/// Sequential fan-out over handlers registered at startup.
///
/// Handlers run one at a time, in registration order; delivery stops at the
/// first failure and the error is surfaced to the caller. On a retried
/// publish, handlers that already succeeded are skipped by their
/// idempotency guard, so stopping early does not starve later handlers.
pub struct InProcessPublisher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl InProcessPublisher {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Register a handler. Composition (e.g. wrapping in the idempotency
    /// guard) happens before this call.
    pub fn register(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

impl Default for InProcessPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for InProcessPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        for handler in &self.handlers {
            debug!(
                handler = handler.name(),
                event_type = event.event_type(),
                event_id = %event.event_id(),
                "delivering event"
            );
            handler
                .handle(event)
                .await
                .map_err(|source| PublishError::Handler {
                    handler: handler.name().to_string(),
                    source,
                })?;
        }
        Ok(())
    }
}
