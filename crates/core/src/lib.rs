//! `convene-core` — identifiers and error model shared across the workspace.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{EventId, GatheringId, InvitationId, MemberId, OutboxMessageId};
