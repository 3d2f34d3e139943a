//! `convene-outbox` — transactional outbox storage and dispatch.
//!
//! Business transactions append serialized domain events next to the state
//! change that produced them; a scheduled, non-reentrant dispatcher later
//! decodes each record, republishes it to in-process handlers under a
//! bounded retry policy, and stamps the terminal outcome back onto the row.
//! Idempotency records keep a handler from reprocessing an event it has
//! already handled, so a crash between publish and stamp is safe.

pub mod dispatcher;
pub mod idempotency;
pub mod in_memory;
pub mod message;
pub mod postgres;
pub mod retry;
pub mod scheduler;
pub mod store;

pub use dispatcher::{DispatchError, OutboxDispatcher, RunOutcome, RunStats, DEFAULT_BATCH_SIZE};
pub use idempotency::{
    IdempotencyStore, IdempotencyStoreError, IdempotentHandler, InMemoryIdempotencyStore,
};
pub use in_memory::InMemoryOutboxStore;
pub use message::OutboxMessage;
pub use postgres::{PostgresIdempotencyStore, PostgresOutboxStore};
pub use retry::{RetryOutcome, RetryPolicy};
pub use scheduler::{DispatcherSchedule, SchedulerHandle};
pub use store::{OutboxStats, OutboxStore, OutboxStoreError, ProcessedUpdate};
