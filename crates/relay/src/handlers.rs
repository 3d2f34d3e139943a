//! Event consumers registered by the relay.
//!
//! Every handler here is wrapped in an idempotency guard at registration,
//! so implementations only need to be correct for a single execution per
//! event.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use convene_events::{DomainEvent, EventHandler, HandlerError};

/// All handlers the relay registers, in delivery order.
pub fn all() -> Vec<Arc<dyn EventHandler>> {
    vec![Arc::new(AuditTrailHandler), Arc::new(WelcomeEmailHandler)]
}

/// Writes every republished event to the audit log.
pub struct AuditTrailHandler;

#[async_trait]
impl EventHandler for AuditTrailHandler {
    fn name(&self) -> &str {
        "audit-trail"
    }

    async fn handle(&self, event: &DomainEvent) -> Result<(), HandlerError> {
        info!(
            event_type = event.event_type(),
            event_id = %event.event_id(),
            occurred_at = %event.occurred_at(),
            "audit"
        );
        Ok(())
    }
}

/// Greets newly registered members.
///
/// Delivery currently goes to the log; swapping in a mail transport only
/// changes this handler, not the dispatch pipeline around it.
pub struct WelcomeEmailHandler;

#[async_trait]
impl EventHandler for WelcomeEmailHandler {
    fn name(&self) -> &str {
        "welcome-email"
    }

    async fn handle(&self, event: &DomainEvent) -> Result<(), HandlerError> {
        if let DomainEvent::MemberRegistered(registered) = event {
            info!(
                member_id = %registered.member_id,
                email = %registered.email,
                "welcome email queued for {}",
                registered.name
            );
        }
        Ok(())
    }
}
