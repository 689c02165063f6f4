//! In-memory log source for offline runs and tests.

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::warn;

use super::source::{LogSource, Subscription};
use crate::error::TransportError;
use crate::models::{BetEvent, EventKind};

struct Subscriber {
    kind: EventKind,
    from_block: u64,
    tx: mpsc::Sender<BetEvent>,
}

impl Subscriber {
    fn wants(&self, event: &BetEvent) -> bool {
        event.kind() == self.kind && event.position.block_number >= self.from_block
    }
}

#[derive(Default)]
struct ReplayState {
    events: Vec<BetEvent>,
    head: u64,
    subscribers: Vec<Subscriber>,
}

/// Serves a fixed event list; [`ReplayLogSource::push`] appends and notifies
/// live subscribers.
#[derive(Default)]
pub struct ReplayLogSource {
    state: Mutex<ReplayState>,
}

impl ReplayLogSource {
    pub fn new(events: impl IntoIterator<Item = BetEvent>) -> Self {
        let source = Self::default();
        for event in events {
            source.push(event);
        }
        source
    }

    /// Load a JSON array of events.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read events file: {}", path.display()))?;
        let events: Vec<BetEvent> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse events file: {}", path.display()))?;
        Ok(Self::new(events))
    }

    /// Append an event as if the ledger just emitted it.
    pub fn push(&self, event: BetEvent) {
        let mut state = self.state.lock();
        state.head = state.head.max(event.position.block_number);
        state.subscribers.retain(|sub| !sub.tx.is_closed());

        for sub in state.subscribers.iter().filter(|sub| sub.wants(&event)) {
            if let Err(e) = sub.tx.try_send(event.clone()) {
                warn!(event = %sub.kind, error = %e, "Replay subscriber lagging, event dropped");
            }
        }
        state.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live subscriptions whose consumer is still attached.
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.state.lock();
        state.subscribers.retain(|sub| !sub.tx.is_closed());
        state.subscribers.len()
    }
}

#[async_trait]
impl LogSource for ReplayLogSource {
    async fn latest_block(&self) -> Result<u64, TransportError> {
        Ok(self.state.lock().head)
    }

    async fn fetch(
        &self,
        kind: EventKind,
        from_block: u64,
    ) -> Result<Vec<BetEvent>, TransportError> {
        let state = self.state.lock();
        let mut events: Vec<BetEvent> = state
            .events
            .iter()
            .filter(|e| e.kind() == kind && e.position.block_number >= from_block)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.position);
        Ok(events)
    }

    async fn subscribe(
        &self,
        kind: EventKind,
        from_block: u64,
    ) -> Result<Subscription, TransportError> {
        let (tx, subscription) = Subscription::channel(kind);
        let sub = Subscriber {
            kind,
            from_block,
            tx,
        };

        let mut state = self.state.lock();
        let mut backlog: Vec<&BetEvent> = state.events.iter().filter(|e| sub.wants(e)).collect();
        backlog.sort_by_key(|e| e.position);
        for event in backlog {
            if let Err(e) = sub.tx.try_send(event.clone()) {
                warn!(event = %kind, error = %e, "Replay backlog exceeds subscription buffer");
                break;
            }
        }
        state.subscribers.push(sub);

        Ok(subscription)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BetEventData, LogPosition};
    use num_bigint::BigUint;

    fn accepted(id: u32, block: u64) -> BetEvent {
        BetEvent::new(
            LogPosition::new(block, 0),
            BetEventData::Accepted {
                id: BigUint::from(id),
            },
        )
    }

    fn deleted(id: u32, block: u64) -> BetEvent {
        BetEvent::new(
            LogPosition::new(block, 1),
            BetEventData::Deleted {
                id: BigUint::from(id),
            },
        )
    }

    #[tokio::test]
    async fn test_fetch_filters_kind_and_block() {
        let source = ReplayLogSource::new(vec![accepted(2, 20), deleted(1, 5), accepted(1, 10)]);
        assert_eq!(source.latest_block().await.unwrap(), 20);

        let events = source.fetch(EventKind::Accepted, 0).await.unwrap();
        let blocks: Vec<u64> = events.iter().map(|e| e.position.block_number).collect();
        assert_eq!(blocks, vec![10, 20]);

        let events = source.fetch(EventKind::Accepted, 11).await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_receives_pushed_events() {
        let source = ReplayLogSource::new(vec![accepted(1, 10)]);
        let mut sub = source.subscribe(EventKind::Accepted, 11).await.unwrap();

        source.push(deleted(2, 12));
        source.push(accepted(3, 12));

        let event = sub.next().await.unwrap();
        assert_eq!(event.bet_id(), &BigUint::from(3u32));
        assert_eq!(sub.kind(), EventKind::Accepted);
    }

    #[tokio::test]
    async fn test_subscribe_replays_backlog_from_block() {
        let source = ReplayLogSource::new(vec![accepted(1, 10), accepted(2, 30)]);
        let mut sub = source.subscribe(EventKind::Accepted, 20).await.unwrap();
        assert_eq!(sub.next().await.unwrap().bet_id(), &BigUint::from(2u32));
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_pruned() {
        let source = ReplayLogSource::default();
        let sub = source.subscribe(EventKind::Deleted, 0).await.unwrap();
        assert_eq!(source.subscriber_count(), 1);
        drop(sub);
        assert_eq!(source.subscriber_count(), 0);
    }
}
