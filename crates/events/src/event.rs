//! Domain events raised by the member and gathering aggregates.
//!
//! Events are immutable facts. Each one carries its own `event_id` (the
//! idempotency key for consumers) and `occurred_at` (business time, which
//! also defines outbox processing order). The `DomainEvent` enum is the
//! tagged union persisted to the outbox: serde embeds the discriminator
//! under the `"type"` key, so a stored payload is self-describing and can
//! be decoded without knowing the concrete type up front.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use convene_core::{EventId, GatheringId, InvitationId, MemberId};

/// A new member completed registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRegistered {
    pub event_id: EventId,
    pub occurred_at: DateTime<Utc>,
    pub member_id: MemberId,
    pub email: String,
    pub name: String,
}

/// A member scheduled a new gathering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatheringScheduled {
    pub event_id: EventId,
    pub occurred_at: DateTime<Utc>,
    pub gathering_id: GatheringId,
    pub creator_id: MemberId,
    pub name: String,
    pub scheduled_on_utc: DateTime<Utc>,
}

/// The gathering creator invited a member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationSent {
    pub event_id: EventId,
    pub occurred_at: DateTime<Utc>,
    pub invitation_id: InvitationId,
    pub gathering_id: GatheringId,
    pub member_id: MemberId,
}

/// An invited member accepted and became an attendee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationAccepted {
    pub event_id: EventId,
    pub occurred_at: DateTime<Utc>,
    pub invitation_id: InvitationId,
    pub gathering_id: GatheringId,
    pub member_id: MemberId,
}

/// The closed set of domain events this system publishes.
///
/// Adding an event type means adding a variant here (and its discriminator
/// to [`DomainEvent::KNOWN_TYPES`]); removing or renaming one makes already
/// persisted rows undecodable, which the dispatcher records as a decode
/// failure rather than guessing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    #[serde(rename = "member.registered")]
    MemberRegistered(MemberRegistered),
    #[serde(rename = "gathering.scheduled")]
    GatheringScheduled(GatheringScheduled),
    #[serde(rename = "invitation.sent")]
    InvitationSent(InvitationSent),
    #[serde(rename = "invitation.accepted")]
    InvitationAccepted(InvitationAccepted),
}

impl DomainEvent {
    /// Every discriminator the codec can resolve, in one place.
    pub const KNOWN_TYPES: &'static [&'static str] = &[
        "member.registered",
        "gathering.scheduled",
        "invitation.sent",
        "invitation.accepted",
    ];

    /// Stable event name/type identifier (e.g. "member.registered").
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::MemberRegistered(_) => "member.registered",
            DomainEvent::GatheringScheduled(_) => "gathering.scheduled",
            DomainEvent::InvitationSent(_) => "invitation.sent",
            DomainEvent::InvitationAccepted(_) => "invitation.accepted",
        }
    }

    /// Identity of this event instance.
    pub fn event_id(&self) -> EventId {
        match self {
            DomainEvent::MemberRegistered(e) => e.event_id,
            DomainEvent::GatheringScheduled(e) => e.event_id,
            DomainEvent::InvitationSent(e) => e.event_id,
            DomainEvent::InvitationAccepted(e) => e.event_id,
        }
    }

    /// When the event occurred (business time).
    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DomainEvent::MemberRegistered(e) => e.occurred_at,
            DomainEvent::GatheringScheduled(e) => e.occurred_at,
            DomainEvent::InvitationSent(e) => e.occurred_at,
            DomainEvent::InvitationAccepted(e) => e.occurred_at,
        }
    }
}

impl From<MemberRegistered> for DomainEvent {
    fn from(e: MemberRegistered) -> Self {
        DomainEvent::MemberRegistered(e)
    }
}

impl From<GatheringScheduled> for DomainEvent {
    fn from(e: GatheringScheduled) -> Self {
        DomainEvent::GatheringScheduled(e)
    }
}

impl From<InvitationSent> for DomainEvent {
    fn from(e: InvitationSent) -> Self {
        DomainEvent::InvitationSent(e)
    }
}

impl From<InvitationAccepted> for DomainEvent {
    fn from(e: InvitationAccepted) -> Self {
        DomainEvent::InvitationAccepted(e)
    }
}
