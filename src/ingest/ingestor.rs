//! Event log ownership
//!
//! The ingestor is the single writer of the four event collections. Every
//! accepted append publishes a fresh immutable [`EventSnapshot`] through
//! `ArcSwap` and bumps a version on a watch channel, so readers never lock the
//! writer and never see a half-applied batch.
//!
//! Bet state is pulled: [`EventIngestor::bets`] reconciles at most once per
//! snapshot version and hands out the memoized book until the next append.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::source::LogSource;
use crate::error::TransportError;
use crate::models::{BetBook, BetEvent, EventKey, EventKind, FinishedBet};
use crate::reconciler;

/// Immutable view of the four collections at one version.
#[derive(Debug, Default)]
pub struct EventSnapshot {
    pub version: u64,
    pub created: Arc<Vec<BetEvent>>,
    pub deleted: Arc<Vec<BetEvent>>,
    pub accepted: Arc<Vec<BetEvent>>,
    pub finished: Arc<Vec<BetEvent>>,
}

impl EventSnapshot {
    pub fn collection(&self, kind: EventKind) -> &[BetEvent] {
        match kind {
            EventKind::Created => &self.created,
            EventKind::Deleted => &self.deleted,
            EventKind::Accepted => &self.accepted,
            EventKind::Finished => &self.finished,
        }
    }

    /// Total events across all kinds.
    pub fn len(&self) -> usize {
        self.created.len() + self.deleted.len() + self.accepted.len() + self.finished.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reconcile(&self) -> BetBook {
        reconciler::reconcile(&self.created, &self.deleted, &self.accepted, &self.finished)
    }
}

/// Writer-side state. Collections stay sorted by log position and are shared
/// with published snapshots; a collection is copied only when a batch touches it.
#[derive(Default)]
struct EventLog {
    created: Arc<Vec<BetEvent>>,
    deleted: Arc<Vec<BetEvent>>,
    accepted: Arc<Vec<BetEvent>>,
    finished: Arc<Vec<BetEvent>>,
    seen: HashSet<EventKey>,
    version: u64,
}

impl EventLog {
    fn collection_mut(&mut self, kind: EventKind) -> &mut Vec<BetEvent> {
        let shared = match kind {
            EventKind::Created => &mut self.created,
            EventKind::Deleted => &mut self.deleted,
            EventKind::Accepted => &mut self.accepted,
            EventKind::Finished => &mut self.finished,
        };
        Arc::make_mut(shared)
    }

    /// False for a redelivery.
    fn append(&mut self, event: BetEvent) -> bool {
        if !self.seen.insert(event.key()) {
            return false;
        }
        let collection = self.collection_mut(event.kind());
        let at = collection.partition_point(|e| e.position <= event.position);
        collection.insert(at, event);
        true
    }

    fn snapshot(&mut self) -> EventSnapshot {
        self.version += 1;
        EventSnapshot {
            version: self.version,
            created: Arc::clone(&self.created),
            deleted: Arc::clone(&self.deleted),
            accepted: Arc::clone(&self.accepted),
            finished: Arc::clone(&self.finished),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    pub ingested: usize,
    pub duplicates: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackfillSummary {
    pub from_block: u64,
    /// Head observed before fetching; live ingestion resumes after it.
    pub head_block: u64,
    pub fetched: usize,
    pub ingested: usize,
    pub duplicates: usize,
}

pub struct EventIngestor {
    source: Arc<dyn LogSource>,
    from_block: u64,
    log: Mutex<EventLog>,
    snapshot: ArcSwap<EventSnapshot>,
    version_tx: watch::Sender<u64>,
    memo: Mutex<Option<(u64, Arc<BetBook>)>>,
    live: Mutex<Vec<JoinHandle<()>>>,
}

impl EventIngestor {
    /// `from_block` is the lower bound for historical replay (the ledger's deploy block).
    pub fn new(source: Arc<dyn LogSource>, from_block: u64) -> Arc<Self> {
        let (version_tx, _) = watch::channel(0);
        Arc::new(Self {
            source,
            from_block,
            log: Mutex::new(EventLog::default()),
            snapshot: ArcSwap::new(Arc::new(EventSnapshot::default())),
            version_tx,
            memo: Mutex::new(None),
            live: Mutex::new(Vec::new()),
        })
    }

    pub fn from_block(&self) -> u64 {
        self.from_block
    }

    /// Append one event. Returns false when it was already present.
    pub fn ingest(&self, event: BetEvent) -> bool {
        self.ingest_batch(std::iter::once(event)).ingested == 1
    }

    /// Append a batch under one lock and publish a single snapshot for it.
    pub fn ingest_batch(&self, events: impl IntoIterator<Item = BetEvent>) -> IngestOutcome {
        let mut outcome = IngestOutcome::default();
        let mut log = self.log.lock();

        for event in events {
            if log.append(event) {
                outcome.ingested += 1;
            } else {
                outcome.duplicates += 1;
            }
        }

        if outcome.ingested > 0 {
            let snapshot = log.snapshot();
            let version = snapshot.version;
            self.snapshot.store(Arc::new(snapshot));
            self.version_tx.send_replace(version);
            debug!(version, ingested = outcome.ingested, "Published event snapshot");
        }
        outcome
    }

    pub fn snapshot(&self) -> Arc<EventSnapshot> {
        self.snapshot.load_full()
    }

    pub fn version(&self) -> u64 {
        self.snapshot.load().version
    }

    /// Snapshot versions as they are published.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.version_tx.subscribe()
    }

    /// Current bet state. Reflects every event ingested before the call.
    pub fn bets(&self) -> Arc<BetBook> {
        let snapshot = self.snapshot.load_full();
        let mut memo = self.memo.lock();
        if let Some((version, book)) = memo.as_ref() {
            if *version == snapshot.version {
                return Arc::clone(book);
            }
        }
        let book = Arc::new(snapshot.reconcile());
        *memo = Some((snapshot.version, Arc::clone(&book)));
        book
    }

    pub fn finished(&self) -> Vec<FinishedBet> {
        reconciler::finished_bets(&self.snapshot.load().finished)
    }

    /// Fetch all four kinds from `from_block` and ingest them in log order.
    pub async fn backfill(&self) -> Result<BackfillSummary, TransportError> {
        let head_block = self.source.latest_block().await?;
        let source = &self.source;
        let from = self.from_block;

        let (created, deleted, accepted, finished) = tokio::try_join!(
            source.fetch(EventKind::Created, from),
            source.fetch(EventKind::Deleted, from),
            source.fetch(EventKind::Accepted, from),
            source.fetch(EventKind::Finished, from),
        )?;

        let mut events: Vec<BetEvent> = created
            .into_iter()
            .chain(deleted)
            .chain(accepted)
            .chain(finished)
            .collect();
        events.sort_by_key(|e| e.position);
        let fetched = events.len();

        let outcome = self.ingest_batch(events);
        let summary = BackfillSummary {
            from_block: from,
            head_block,
            fetched,
            ingested: outcome.ingested,
            duplicates: outcome.duplicates,
        };

        info!(
            from_block = summary.from_block,
            head_block = summary.head_block,
            fetched = summary.fetched,
            ingested = summary.ingested,
            duplicates = summary.duplicates,
            "Backfill complete"
        );
        Ok(summary)
    }

    /// Subscribe to all four kinds from `from_block` and forward into the log
    /// until [`EventIngestor::shutdown`].
    pub async fn spawn_live(self: &Arc<Self>, from_block: u64) -> Result<(), TransportError> {
        let mut subscriptions = Vec::with_capacity(EventKind::ALL.len());
        for kind in EventKind::ALL {
            subscriptions.push(self.source.subscribe(kind, from_block).await?);
        }

        let mut live = self.live.lock();
        for mut subscription in subscriptions {
            let ingestor = Arc::clone(self);
            live.push(tokio::spawn(async move {
                let kind = subscription.kind();
                while let Some(event) = subscription.next().await {
                    let mut batch = vec![event];
                    batch.extend(subscription.drain_ready());
                    let last = batch[batch.len() - 1].position;
                    let outcome = ingestor.ingest_batch(batch);
                    if outcome.ingested > 0 {
                        debug!(
                            event = %kind,
                            ingested = outcome.ingested,
                            block = last.block_number,
                            log_index = last.log_index,
                            "Live events ingested"
                        );
                    }
                }
                warn!(event = %kind, "Live subscription ended");
            }));
        }

        info!(from_block, subscriptions = live.len(), "Live ingestion started");
        Ok(())
    }

    pub fn is_live(&self) -> bool {
        self.live.lock().iter().any(|h| !h.is_finished())
    }

    /// Stop forwarding and drop every live subscription.
    pub async fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = self.live.lock().drain(..).collect();
        if handles.is_empty() {
            return;
        }
        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            // Cancelled is the expected outcome
            let _ = handle.await;
        }
        info!("Live ingestion stopped");
    }
}
