//! `convene-events` — domain events, the envelope codec, and the
//! handler/publisher seams they are delivered through.

pub mod codec;
pub mod event;
pub mod handler;
pub mod in_process;
pub mod publisher;

pub use codec::{DecodeError, EncodeError, EncodedEvent};
pub use event::{
    DomainEvent, GatheringScheduled, InvitationAccepted, InvitationSent, MemberRegistered,
};
pub use handler::{EventHandler, HandlerError};
pub use in_process::InProcessPublisher;
pub use publisher::{EventPublisher, PublishError};
