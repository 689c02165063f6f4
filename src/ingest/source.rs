//! Ledger log sources
//!
//! [`LogSource`] is the transport seam of the ingestor: a finite historical
//! fetch per event kind plus a live subscription. [`RpcLogSource`] reads the
//! ledger through `eth_getLogs`; replay lives in [`super::replay`].

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::abi::{self, AbiReader};
use crate::error::{InvalidInput, TransportError};
use crate::models::{BetCreated, BetEvent, BetEventData, BetFinished, EventKind, LogPosition};
use crate::rpc::{JsonRpcClient, RawLog};

/// Buffered events per live subscription before the producer waits.
pub const SUBSCRIPTION_BUFFER: usize = 1024;

#[async_trait]
pub trait LogSource: Send + Sync {
    /// Current head of the source.
    async fn latest_block(&self) -> Result<u64, TransportError>;

    /// Every event of `kind` from `from_block` up to the current head, in log order.
    async fn fetch(&self, kind: EventKind, from_block: u64)
        -> Result<Vec<BetEvent>, TransportError>;

    /// Events of `kind` appended at or after `from_block`, until the subscription is dropped.
    async fn subscribe(
        &self,
        kind: EventKind,
        from_block: u64,
    ) -> Result<Subscription, TransportError>;
}

/// Live event feed for one kind.
///
/// Dropping it (or calling [`Subscription::close`]) closes the channel, and the
/// producer stops at its next send or poll.
#[derive(Debug)]
pub struct Subscription {
    kind: EventKind,
    rx: mpsc::Receiver<BetEvent>,
}

impl Subscription {
    pub fn new(kind: EventKind, rx: mpsc::Receiver<BetEvent>) -> Self {
        Self { kind, rx }
    }

    /// A subscription plus the sender a producer feeds it through.
    pub fn channel(kind: EventKind) -> (mpsc::Sender<BetEvent>, Self) {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        (tx, Self::new(kind, rx))
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Next event, or `None` once the producer has gone away.
    pub async fn next(&mut self) -> Option<BetEvent> {
        self.rx.recv().await
    }

    /// Events already buffered, without waiting.
    pub fn drain_ready(&mut self) -> Vec<BetEvent> {
        let mut ready = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            ready.push(event);
        }
        ready
    }

    pub fn close(&mut self) {
        self.rx.close();
    }
}

// =============================================================================
// JSON-RPC source
// =============================================================================

#[derive(Debug, Clone)]
pub struct RpcLogSourceConfig {
    pub contract_address: String,
    /// Widest `eth_getLogs` range issued in one call.
    pub block_range: u64,
    /// Head polling period for live subscriptions.
    pub poll_interval: Duration,
}

impl RpcLogSourceConfig {
    pub fn new(contract_address: impl Into<String>) -> Self {
        Self {
            contract_address: contract_address.into(),
            block_range: 5000,
            poll_interval: Duration::from_millis(4000),
        }
    }
}

/// Ledger events read through `eth_getLogs`, filtered by contract and topic0.
#[derive(Clone)]
pub struct RpcLogSource {
    rpc: Arc<JsonRpcClient>,
    config: RpcLogSourceConfig,
}

impl RpcLogSource {
    pub fn new(rpc: Arc<JsonRpcClient>, config: RpcLogSourceConfig) -> Self {
        Self { rpc, config }
    }

    pub fn contract_address(&self) -> &str {
        &self.config.contract_address
    }

    /// Inclusive range, split into `block_range` sized calls.
    async fn fetch_range(
        &self,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<BetEvent>, TransportError> {
        let topic0 = abi::event_topic(kind.signature());
        let mut events = Vec::new();

        for (start, end) in block_chunks(from_block, to_block, self.config.block_range) {
            let logs = self
                .rpc
                .get_logs(&self.config.contract_address, &topic0, start, end)
                .await?;
            debug!(event = %kind, from = start, to = end, logs = logs.len(), "Fetched log chunk");
            events.extend(decode_logs(kind, &logs));
        }

        events.sort_by_key(|e| e.position);
        Ok(events)
    }
}

#[async_trait]
impl LogSource for RpcLogSource {
    async fn latest_block(&self) -> Result<u64, TransportError> {
        self.rpc.block_number().await
    }

    async fn fetch(
        &self,
        kind: EventKind,
        from_block: u64,
    ) -> Result<Vec<BetEvent>, TransportError> {
        let head = self.rpc.block_number().await?;
        if from_block > head {
            return Ok(Vec::new());
        }
        self.fetch_range(kind, from_block, head).await
    }

    async fn subscribe(
        &self,
        kind: EventKind,
        from_block: u64,
    ) -> Result<Subscription, TransportError> {
        let (tx, subscription) = Subscription::channel(kind);
        let source = self.clone();

        tokio::spawn(async move {
            let mut next_block = from_block;
            let mut ticker = tokio::time::interval(source.config.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            info!(event = %kind, from_block, "Log subscription started");

            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    break;
                }

                let head = match source.rpc.block_number().await {
                    Ok(head) => head,
                    Err(e) => {
                        warn!(event = %kind, error = %e, "Head poll failed, retrying next tick");
                        continue;
                    }
                };
                let Some((from, to)) = poll_window(next_block, head) else {
                    continue;
                };

                match source.fetch_range(kind, from, to).await {
                    Ok(events) => {
                        for event in events {
                            if tx.send(event).await.is_err() {
                                debug!(event = %kind, "Log subscription closed by consumer");
                                return;
                            }
                        }
                        next_block = to.saturating_add(1);
                    }
                    Err(e) => {
                        // Same range again next tick; the ingestor drops any redelivery.
                        warn!(event = %kind, from = next_block, to = head, error = %e, "Log poll failed");
                    }
                }
            }

            debug!(event = %kind, "Log subscription stopped");
        });

        Ok(subscription)
    }
}

/// Split the inclusive range `[from, to]` into inclusive chunks of at most
/// `step` blocks. Empty when `from > to`.
pub(crate) fn block_chunks(from: u64, to: u64, step: u64) -> Vec<(u64, u64)> {
    let step = step.max(1);
    let mut chunks = Vec::new();
    let mut start = from;

    while start <= to {
        let end = start.saturating_add(step - 1).min(to);
        chunks.push((start, end));
        match end.checked_add(1) {
            Some(next) => start = next,
            None => break,
        }
    }
    chunks
}

/// Blocks a live poll should fetch, or `None` while the head has not reached
/// `next_block`.
pub(crate) fn poll_window(next_block: u64, head: u64) -> Option<(u64, u64)> {
    (head >= next_block).then_some((next_block, head))
}

// =============================================================================
// Log decoding
// =============================================================================

/// Decode a batch, logging and skipping anything malformed or reorged out.
pub fn decode_logs(kind: EventKind, logs: &[RawLog]) -> Vec<BetEvent> {
    logs.iter()
        .filter(|log| !log.removed)
        .filter_map(|log| match decode_log(kind, log) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(error = %e, tx_hash = ?log.transaction_hash, "Skipping undecodable log");
                None
            }
        })
        .collect()
}

/// Decode one `eth_getLogs` entry. All event parameters sit in `data`.
pub fn decode_log(kind: EventKind, log: &RawLog) -> Result<BetEvent, InvalidInput> {
    let expected = abi::event_topic(kind.signature());
    match log.topics.first() {
        Some(topic) if topic.eq_ignore_ascii_case(&expected) => {}
        other => {
            return Err(InvalidInput::new(
                kind,
                "topic0",
                format!("expected {}, got {:?}", expected, other),
            ))
        }
    }

    let block_number = quantity(kind, "blockNumber", log.block_number.as_deref())?;
    let log_index = quantity(kind, "logIndex", log.log_index.as_deref())?;
    let data = abi::decode_hex(&log.data).map_err(|e| InvalidInput::new(kind, "data", e))?;
    let r = AbiReader::new(&data);

    let id = r.uint(0).map_err(|e| InvalidInput::new(kind, "id", e))?;
    let field = |name: &'static str| {
        let id = id.clone();
        move |e: String| InvalidInput::new(kind, name, e).with_bet_id(id)
    };

    let payload = match kind {
        EventKind::Created => BetEventData::Created(BetCreated {
            creator: r.address(1).map_err(field("creator"))?,
            deadline: r.uint_u64(2).map_err(field("deadline"))?,
            amount: r.uint(3).map_err(field("amount"))?,
            target_price: r.string(4).map_err(field("targetPrice"))?,
            direction: r.boolean(5).map_err(field("direction"))?,
            id,
        }),
        EventKind::Deleted => BetEventData::Deleted { id },
        EventKind::Accepted => BetEventData::Accepted { id },
        EventKind::Finished => BetEventData::Finished(BetFinished {
            winner: r.address(1).map_err(field("winner"))?,
            loser: r.address(2).map_err(field("loser"))?,
            amount: r.uint(3).map_err(field("amount"))?,
            id,
        }),
    };

    let mut event = BetEvent::new(LogPosition::new(block_number, log_index), payload);
    if let Some(tx_hash) = &log.transaction_hash {
        event = event.with_tx_hash(tx_hash.clone());
    }
    Ok(event)
}

fn quantity(kind: EventKind, field: &'static str, raw: Option<&str>) -> Result<u64, InvalidInput> {
    let raw = raw.ok_or_else(|| InvalidInput::new(kind, field, "missing (pending log)"))?;
    abi::parse_quantity(raw).map_err(|e| InvalidInput::new(kind, field, e))
}
