//! In-memory outbox store for tests/dev.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use convene_core::OutboxMessageId;

use crate::message::OutboxMessage;
use crate::store::{OutboxStats, OutboxStore, OutboxStoreError, ProcessedUpdate};

/// In-memory outbox store.
///
/// Intended for tests/dev. Batch updates are validated first and applied
/// under a single write lock, so they are all-or-nothing like the
/// Postgres implementation's transaction.
#[derive(Debug, Default)]
pub struct InMemoryOutboxStore {
    messages: RwLock<HashMap<OutboxMessageId, OutboxMessage>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn append(&self, messages: Vec<OutboxMessage>) -> Result<(), OutboxStoreError> {
        let mut map = self.messages.write().unwrap();
        for message in &messages {
            if map.contains_key(&message.id) {
                return Err(OutboxStoreError::Duplicate(message.id));
            }
        }
        for message in messages {
            map.insert(message.id, message);
        }
        Ok(())
    }

    async fn fetch_pending(&self, limit: usize) -> Result<Vec<OutboxMessage>, OutboxStoreError> {
        let map = self.messages.read().unwrap();
        let mut pending: Vec<OutboxMessage> = map
            .values()
            .filter(|m| m.is_pending())
            .cloned()
            .collect();

        // FIFO: occurrence time, then id (UUIDv7, time-ordered).
        pending.sort_by_key(|m| (m.occurred_on_utc, m.id.as_uuid()));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_processed_batch(
        &self,
        updates: &[ProcessedUpdate],
    ) -> Result<(), OutboxStoreError> {
        let mut map = self.messages.write().unwrap();

        // Validate everything before touching anything.
        for update in updates {
            match map.get(&update.id) {
                None => {
                    return Err(OutboxStoreError::Storage(format!(
                        "unknown message: {}",
                        update.id
                    )));
                }
                Some(m) if !m.is_pending() => {
                    return Err(OutboxStoreError::Storage(format!(
                        "message already processed: {}",
                        update.id
                    )));
                }
                Some(_) => {}
            }
        }

        for update in updates {
            if let Some(m) = map.get_mut(&update.id) {
                m.processed_on_utc = Some(update.processed_on_utc);
                m.error = update.error.clone();
            }
        }
        Ok(())
    }

    async fn stats(&self) -> Result<OutboxStats, OutboxStoreError> {
        let map = self.messages.read().unwrap();
        let mut stats = OutboxStats::default();
        for m in map.values() {
            if m.is_pending() {
                stats.pending += 1;
            } else if m.error.is_some() {
                stats.failed += 1;
            } else {
                stats.processed += 1;
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use convene_core::{EventId, GatheringId, MemberId};
    use convene_events::{DomainEvent, GatheringScheduled, MemberRegistered};

    fn event_at(offset_secs: i64) -> DomainEvent {
        MemberRegistered {
            event_id: EventId::new(),
            occurred_at: Utc::now() + Duration::seconds(offset_secs),
            member_id: MemberId::new(),
            email: "t@example.com".to_string(),
            name: "T".to_string(),
        }
        .into()
    }

    #[tokio::test]
    async fn fetch_returns_fifo_order_regardless_of_insertion() {
        let store = InMemoryOutboxStore::new();

        let m3 = OutboxMessage::from_event(&event_at(30)).unwrap();
        let m1 = OutboxMessage::from_event(&event_at(10)).unwrap();
        let m2 = OutboxMessage::from_event(&event_at(20)).unwrap();

        store
            .append(vec![m3.clone(), m1.clone(), m2.clone()])
            .await
            .unwrap();

        let fetched = store.fetch_pending(10).await.unwrap();
        let ids: Vec<_> = fetched.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![m1.id, m2.id, m3.id]);
    }

    #[tokio::test]
    async fn fetch_respects_limit_and_skips_terminal_rows() {
        let store = InMemoryOutboxStore::new();
        let messages: Vec<_> = (0..5)
            .map(|i| OutboxMessage::from_event(&event_at(i)).unwrap())
            .collect();
        store.append(messages.clone()).await.unwrap();

        store
            .mark_processed_batch(&[ProcessedUpdate::succeeded(messages[0].id, Utc::now())])
            .await
            .unwrap();

        let fetched = store.fetch_pending(2).await.unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0].id, messages[1].id);
        assert_eq!(fetched[1].id, messages[2].id);
    }

    #[tokio::test]
    async fn duplicate_append_is_rejected() {
        let store = InMemoryOutboxStore::new();
        let m = OutboxMessage::from_event(&event_at(0)).unwrap();
        store.append(vec![m.clone()]).await.unwrap();

        let err = store.append(vec![m]).await.unwrap_err();
        assert!(matches!(err, OutboxStoreError::Duplicate(_)));
    }

    #[tokio::test]
    async fn batch_update_is_all_or_nothing() {
        let store = InMemoryOutboxStore::new();
        let m = OutboxMessage::from_event(&event_at(0)).unwrap();
        store.append(vec![m.clone()]).await.unwrap();

        let bogus = ProcessedUpdate::succeeded(
            convene_core::OutboxMessageId::new(),
            Utc::now(),
        );
        let good = ProcessedUpdate::succeeded(m.id, Utc::now());

        let err = store
            .mark_processed_batch(&[good, bogus])
            .await
            .unwrap_err();
        assert!(matches!(err, OutboxStoreError::Storage(_)));

        // Nothing was applied: the valid row is still pending.
        let fetched = store.fetch_pending(10).await.unwrap();
        assert_eq!(fetched.len(), 1);
    }

    #[tokio::test]
    async fn terminal_stamp_happens_exactly_once() {
        let store = InMemoryOutboxStore::new();
        let m = OutboxMessage::from_event(&event_at(0)).unwrap();
        store.append(vec![m.clone()]).await.unwrap();

        store
            .mark_processed_batch(&[ProcessedUpdate::succeeded(m.id, Utc::now())])
            .await
            .unwrap();

        let err = store
            .mark_processed_batch(&[ProcessedUpdate::failed(m.id, Utc::now(), "late")])
            .await
            .unwrap_err();
        assert!(matches!(err, OutboxStoreError::Storage(_)));
    }

    #[tokio::test]
    async fn stats_split_terminal_rows_by_error() {
        let store = InMemoryOutboxStore::new();
        let ok: DomainEvent = GatheringScheduled {
            event_id: EventId::new(),
            occurred_at: Utc::now(),
            gathering_id: GatheringId::new(),
            creator_id: MemberId::new(),
            name: "stats".to_string(),
            scheduled_on_utc: Utc::now(),
        }
        .into();

        let m1 = OutboxMessage::from_event(&ok).unwrap();
        let m2 = OutboxMessage::from_event(&event_at(1)).unwrap();
        let m3 = OutboxMessage::from_event(&event_at(2)).unwrap();
        store
            .append(vec![m1.clone(), m2.clone(), m3.clone()])
            .await
            .unwrap();

        store
            .mark_processed_batch(&[
                ProcessedUpdate::succeeded(m1.id, Utc::now()),
                ProcessedUpdate::failed(m2.id, Utc::now(), "exhausted"),
            ])
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(
            stats,
            OutboxStats {
                pending: 1,
                processed: 1,
                failed: 1
            }
        );
    }
}
