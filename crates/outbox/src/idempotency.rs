//! Idempotency records and the handler guard built on them.
//!
//! One record per (event instance, handler) execution. The guard wraps any
//! handler at registration time (decoration, not per-handler code) and
//! checks/records against the store so a handler runs at most once per
//! event, even across dispatcher restarts. The record is written after the
//! handler succeeds: a crash in between re-delivers once, which is the
//! documented at-least-once contract handlers already live under.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use convene_core::EventId;
use convene_events::{DomainEvent, EventHandler, HandlerError};

#[derive(Debug, Error)]
pub enum IdempotencyStoreError {
    #[error("storage error: {0}")]
    Storage(String),
}

/// Durable record of which (event, handler) pairs have already executed.
///
/// Records are never deleted by this subsystem; retention is an
/// operational concern.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn already_handled(
        &self,
        event_id: EventId,
        handler_name: &str,
    ) -> Result<bool, IdempotencyStoreError>;

    async fn record_handled(
        &self,
        event_id: EventId,
        handler_name: &str,
    ) -> Result<(), IdempotencyStoreError>;
}

/// In-memory idempotency store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryIdempotencyStore {
    handled: RwLock<HashSet<(EventId, String)>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn already_handled(
        &self,
        event_id: EventId,
        handler_name: &str,
    ) -> Result<bool, IdempotencyStoreError> {
        let handled = self.handled.read().unwrap();
        Ok(handled.contains(&(event_id, handler_name.to_string())))
    }

    async fn record_handled(
        &self,
        event_id: EventId,
        handler_name: &str,
    ) -> Result<(), IdempotencyStoreError> {
        let mut handled = self.handled.write().unwrap();
        handled.insert((event_id, handler_name.to_string()));
        Ok(())
    }
}

/// Wraps a handler so it executes at most once per event.
///
/// Composed around every concrete handler when it is registered with the
/// publisher. An existing record short-circuits to success (the work was
/// already done); a handler failure records nothing, so the next dispatch
/// attempt retries. Store failures surface as handler failures and flow
/// into the dispatcher's retry policy.
pub struct IdempotentHandler {
    inner: Arc<dyn EventHandler>,
    store: Arc<dyn IdempotencyStore>,
}

impl IdempotentHandler {
    pub fn new(inner: Arc<dyn EventHandler>, store: Arc<dyn IdempotencyStore>) -> Self {
        Self { inner, store }
    }
}

#[async_trait]
impl EventHandler for IdempotentHandler {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn handle(&self, event: &DomainEvent) -> Result<(), HandlerError> {
        let event_id = event.event_id();
        let handler_name = self.inner.name();

        let seen = self
            .store
            .already_handled(event_id, handler_name)
            .await
            .map_err(|e| HandlerError::new(e.to_string()))?;
        if seen {
            debug!(
                handler = handler_name,
                event_id = %event_id,
                "event already handled; skipping"
            );
            return Ok(());
        }

        self.inner.handle(event).await?;

        self.store
            .record_handled(event_id, handler_name)
            .await
            .map_err(|e| HandlerError::new(e.to_string()))
    }
}
