//! The outbox dispatch run: fetch → decode → guarded publish → stamp →
//! persist.
//!
//! One run drains at most one batch, strictly in FIFO order and strictly
//! sequentially: events for the same aggregate may depend on each other,
//! so there is no fan-out across messages. A single message's failure is
//! recorded on its row and never aborts the batch; only a failure to
//! persist the batch itself aborts the run, leaving every row pending for
//! the next trigger.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use convene_events::{codec, EventPublisher};

use crate::retry::{RetryOutcome, RetryPolicy};
use crate::store::{OutboxStore, OutboxStoreError, ProcessedUpdate};

/// Default number of messages drained per run.
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// Run-level failure. Per-message failures are recorded inline on the rows
/// and do not surface here.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("outbox store error: {0}")]
    Store(#[from] OutboxStoreError),
}

/// Counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Messages fetched from the store.
    pub fetched: usize,
    /// Messages published and stamped without error.
    pub published: usize,
    /// Messages stamped with a recorded error (decode failure or exhausted
    /// retries).
    pub failed: usize,
}

/// How a triggered run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// The batch was drained and persisted.
    Completed(RunStats),
    /// Cancellation was observed; messages handled before the cancel were
    /// persisted, the rest stay pending.
    Cancelled(RunStats),
    /// Another run was still active. Not an error; the trigger is dropped.
    Skipped,
}

/// Republishes pending outbox messages to the event publisher.
///
/// `run_once` is safe to trigger at any time: an internal guard turns an
/// overlapping trigger into [`RunOutcome::Skipped`], so two runs never
/// read or stamp the same rows concurrently.
pub struct OutboxDispatcher {
    store: Arc<dyn OutboxStore>,
    publisher: Arc<dyn EventPublisher>,
    retry: RetryPolicy,
    batch_size: usize,
    run_guard: Mutex<()>,
}

impl OutboxDispatcher {
    pub fn new(store: Arc<dyn OutboxStore>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            store,
            publisher,
            retry: RetryPolicy::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            run_guard: Mutex::new(()),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Execute one dispatch run.
    ///
    /// Invoked by the scheduler host on its interval; also callable
    /// directly (ops tooling, tests). `cancel` is observed between
    /// messages and between retry attempts, never mid-write.
    pub async fn run_once(
        &self,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, DispatchError> {
        let Ok(_guard) = self.run_guard.try_lock() else {
            debug!("dispatch run already in progress; skipping trigger");
            return Ok(RunOutcome::Skipped);
        };

        let messages = self.store.fetch_pending(self.batch_size).await?;
        if messages.is_empty() {
            return Ok(RunOutcome::Completed(RunStats::default()));
        }

        let mut stats = RunStats {
            fetched: messages.len(),
            ..RunStats::default()
        };
        let mut updates: Vec<ProcessedUpdate> = Vec::with_capacity(messages.len());
        let mut cancelled = false;

        for message in &messages {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            // Decode failures are permanent: stamp the row with the error
            // instead of letting a poison message occupy the head of the
            // queue forever.
            let event = match codec::decode(&message.event_type, &message.content) {
                Ok(event) => event,
                Err(err) => {
                    warn!(
                        message_id = %message.id,
                        event_type = %message.event_type,
                        error = %err,
                        "outbox payload failed to decode; recording as terminal"
                    );
                    updates.push(ProcessedUpdate::failed(message.id, Utc::now(), err.to_string()));
                    stats.failed += 1;
                    continue;
                }
            };

            match self
                .retry
                .run(cancel, || self.publisher.publish(&event))
                .await
            {
                RetryOutcome::Succeeded { attempts, .. } => {
                    if attempts > 1 {
                        debug!(
                            message_id = %message.id,
                            attempts,
                            "publish succeeded after retry"
                        );
                    }
                    updates.push(ProcessedUpdate::succeeded(message.id, Utc::now()));
                    stats.published += 1;
                }
                RetryOutcome::Exhausted { error, attempts } => {
                    warn!(
                        message_id = %message.id,
                        event_type = %message.event_type,
                        attempts,
                        error = %error,
                        "publish exhausted its retry budget; recording failure"
                    );
                    updates.push(ProcessedUpdate::failed(
                        message.id,
                        Utc::now(),
                        error.to_string(),
                    ));
                    stats.failed += 1;
                }
                RetryOutcome::Cancelled => {
                    cancelled = true;
                    break;
                }
            }
        }

        // All-or-nothing for the whole batch: a commit failure here leaves
        // every row pending and the next run starts over.
        if !updates.is_empty() {
            self.store.mark_processed_batch(&updates).await?;
        }

        if cancelled {
            info!(
                fetched = stats.fetched,
                published = stats.published,
                failed = stats.failed,
                "dispatch run cancelled; remaining messages stay pending"
            );
            Ok(RunOutcome::Cancelled(stats))
        } else {
            debug!(
                fetched = stats.fetched,
                published = stats.published,
                failed = stats.failed,
                "dispatch run completed"
            );
            Ok(RunOutcome::Completed(stats))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryOutboxStore;
    use crate::message::OutboxMessage;
    use crate::store::OutboxStats;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use convene_core::{EventId, MemberId, OutboxMessageId};
    use convene_events::{DomainEvent, MemberRegistered, PublishError};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;

    fn event_at(offset_secs: i64) -> DomainEvent {
        MemberRegistered {
            event_id: EventId::new(),
            occurred_at: Utc::now() + ChronoDuration::seconds(offset_secs),
            member_id: MemberId::new(),
            email: "d@example.com".to_string(),
            name: "D".to_string(),
        }
        .into()
    }

    /// Records every delivered event id; optionally fails for one event.
    struct RecordingPublisher {
        delivered: StdMutex<Vec<EventId>>,
        fail_for: Option<EventId>,
    }

    impl RecordingPublisher {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                delivered: StdMutex::new(Vec::new()),
                fail_for: None,
            })
        }

        fn failing_for(event_id: EventId) -> Arc<Self> {
            Arc::new(Self {
                delivered: StdMutex::new(Vec::new()),
                fail_for: Some(event_id),
            })
        }

        fn delivered(&self) -> Vec<EventId> {
            self.delivered.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventPublisher for RecordingPublisher {
        async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
            if self.fail_for == Some(event.event_id()) {
                return Err(PublishError::Handler {
                    handler: "recording".to_string(),
                    source: convene_events::HandlerError::new("rejected"),
                });
            }
            self.delivered.lock().unwrap().push(event.event_id());
            Ok(())
        }
    }

    /// Blocks inside publish until released, to hold a run open.
    struct GatedPublisher {
        entered: Notify,
        release: Notify,
    }

    impl GatedPublisher {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                entered: Notify::new(),
                release: Notify::new(),
            })
        }
    }

    #[async_trait]
    impl EventPublisher for GatedPublisher {
        async fn publish(&self, _event: &DomainEvent) -> Result<(), PublishError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    /// Delegates to an in-memory store but can fail the batch commit.
    struct FlakyStore {
        inner: InMemoryOutboxStore,
        fail_persist: AtomicBool,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: InMemoryOutboxStore::new(),
                fail_persist: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl OutboxStore for FlakyStore {
        async fn append(&self, messages: Vec<OutboxMessage>) -> Result<(), OutboxStoreError> {
            self.inner.append(messages).await
        }

        async fn fetch_pending(
            &self,
            limit: usize,
        ) -> Result<Vec<OutboxMessage>, OutboxStoreError> {
            self.inner.fetch_pending(limit).await
        }

        async fn mark_processed_batch(
            &self,
            updates: &[ProcessedUpdate],
        ) -> Result<(), OutboxStoreError> {
            if self.fail_persist.load(Ordering::SeqCst) {
                return Err(OutboxStoreError::Storage("commit failed".to_string()));
            }
            self.inner.mark_processed_batch(updates).await
        }

        async fn stats(&self) -> Result<OutboxStats, OutboxStoreError> {
            self.inner.stats().await
        }
    }

    async fn append_events(
        store: &dyn OutboxStore,
        events: &[DomainEvent],
    ) -> Vec<OutboxMessageId> {
        let messages: Vec<_> = events
            .iter()
            .map(|e| OutboxMessage::from_event(e).unwrap())
            .collect();
        let ids = messages.iter().map(|m| m.id).collect();
        store.append(messages).await.unwrap();
        ids
    }

    #[tokio::test]
    async fn empty_store_completes_with_zero_stats() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let dispatcher = OutboxDispatcher::new(store, RecordingPublisher::new());

        let outcome = dispatcher
            .run_once(&CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            RunOutcome::Completed(stats) if stats == RunStats::default()
        ));
    }

    #[tokio::test]
    async fn publishes_in_occurrence_order() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let events = [event_at(30), event_at(10), event_at(20)];
        append_events(store.as_ref(), &events).await;

        let publisher = RecordingPublisher::new();
        let dispatcher = OutboxDispatcher::new(store.clone(), publisher.clone());

        let outcome = dispatcher
            .run_once(&CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            RunOutcome::Completed(RunStats {
                fetched: 3,
                published: 3,
                failed: 0
            })
        ));

        assert_eq!(
            publisher.delivered(),
            vec![
                events[1].event_id(),
                events[2].event_id(),
                events[0].event_id()
            ]
        );

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.processed, 3);
    }

    #[tokio::test]
    async fn overlapping_trigger_is_skipped() {
        let store = Arc::new(InMemoryOutboxStore::new());
        append_events(store.as_ref(), &[event_at(0)]).await;

        let publisher = GatedPublisher::new();
        let dispatcher = Arc::new(OutboxDispatcher::new(store, publisher.clone()));

        let first = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.run_once(&CancellationToken::new()).await })
        };

        // Wait until the first run is inside publish (holding the guard).
        publisher.entered.notified().await;

        let second = dispatcher
            .run_once(&CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(second, RunOutcome::Skipped));

        publisher.release.notify_one();
        let first = first.await.unwrap().unwrap();
        assert!(matches!(
            first,
            RunOutcome::Completed(RunStats { published: 1, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn decode_failure_is_isolated_from_the_rest_of_the_batch() {
        let store = Arc::new(InMemoryOutboxStore::new());

        let good_before = OutboxMessage::from_event(&event_at(0)).unwrap();
        let mut poison = OutboxMessage::from_event(&event_at(10)).unwrap();
        poison.event_type = "member.renamed".to_string();
        let good_after = OutboxMessage::from_event(&event_at(20)).unwrap();

        store
            .append(vec![good_before.clone(), poison, good_after.clone()])
            .await
            .unwrap();

        let publisher = RecordingPublisher::new();
        let dispatcher = OutboxDispatcher::new(store.clone(), publisher.clone());

        let outcome = dispatcher
            .run_once(&CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            RunOutcome::Completed(RunStats {
                fetched: 3,
                published: 2,
                failed: 1
            })
        ));

        // Every row is terminal; only the poison one carries an error.
        let stats = store.stats().await.unwrap();
        assert_eq!(
            stats,
            OutboxStats {
                pending: 0,
                processed: 2,
                failed: 1
            }
        );
        assert_eq!(publisher.delivered().len(), 2);

        // The poison row is never fetched again.
        assert!(store.fetch_pending(10).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_publish_is_recorded_and_the_batch_continues() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let failing_event = event_at(0);
        let ok_event = event_at(10);
        append_events(
            store.as_ref(),
            &[failing_event.clone(), ok_event.clone()],
        )
        .await;

        let publisher = RecordingPublisher::failing_for(failing_event.event_id());
        let dispatcher = OutboxDispatcher::new(store.clone(), publisher.clone());

        let outcome = dispatcher
            .run_once(&CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            RunOutcome::Completed(RunStats {
                fetched: 2,
                published: 1,
                failed: 1
            })
        ));

        assert_eq!(publisher.delivered(), vec![ok_event.event_id()]);
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.processed, 1);
    }

    #[tokio::test]
    async fn persistence_failure_leaves_the_whole_batch_pending() {
        let store = Arc::new(FlakyStore::new());
        append_events(store.as_ref(), &[event_at(0), event_at(10)]).await;
        store.fail_persist.store(true, Ordering::SeqCst);

        let publisher = RecordingPublisher::new();
        let dispatcher = OutboxDispatcher::new(store.clone(), publisher.clone());

        let err = dispatcher
            .run_once(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Store(_)));

        // Nothing committed: the next run re-fetches and reprocesses.
        assert_eq!(store.fetch_pending(10).await.unwrap().len(), 2);

        store.fail_persist.store(false, Ordering::SeqCst);
        let outcome = dispatcher
            .run_once(&CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            RunOutcome::Completed(RunStats {
                fetched: 2,
                published: 2,
                failed: 0
            })
        ));
        assert_eq!(publisher.delivered().len(), 4); // two per run
    }

    #[tokio::test]
    async fn cancellation_persists_finished_messages_and_leaves_the_rest() {
        struct CancellingPublisher {
            cancel: CancellationToken,
        }

        #[async_trait]
        impl EventPublisher for CancellingPublisher {
            async fn publish(&self, _event: &DomainEvent) -> Result<(), PublishError> {
                // Shutdown arrives while the first message is in flight.
                self.cancel.cancel();
                Ok(())
            }
        }

        let store = Arc::new(InMemoryOutboxStore::new());
        append_events(store.as_ref(), &[event_at(0), event_at(10)]).await;

        let cancel = CancellationToken::new();
        let publisher = Arc::new(CancellingPublisher {
            cancel: cancel.clone(),
        });
        let dispatcher = OutboxDispatcher::new(store.clone(), publisher);

        let outcome = dispatcher.run_once(&cancel).await.unwrap();
        assert!(matches!(
            outcome,
            RunOutcome::Cancelled(RunStats {
                fetched: 2,
                published: 1,
                failed: 0
            })
        ));

        // The handled message is terminal, the abandoned one still pending.
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.pending, 1);
    }

    #[tokio::test]
    async fn batch_size_caps_a_single_run() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let events: Vec<_> = (0..5).map(event_at).collect();
        append_events(store.as_ref(), &events).await;

        let publisher = RecordingPublisher::new();
        let dispatcher =
            OutboxDispatcher::new(store.clone(), publisher.clone()).with_batch_size(3);

        let outcome = dispatcher
            .run_once(&CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            RunOutcome::Completed(RunStats { fetched: 3, .. })
        ));
        assert_eq!(store.stats().await.unwrap().pending, 2);
    }
}
