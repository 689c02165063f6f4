//! Ledger event ingestion
//!
//! - **Sources**: `eth_getLogs` over JSON-RPC, or an in-memory replay
//! - **Ingestor**: ordered, deduplicated event log with snapshot publication
//!
//! Redelivered logs are dropped by (kind, bet id, block, log index).

pub mod ingestor;
pub mod replay;
pub mod source;

pub use ingestor::{BackfillSummary, EventIngestor, EventSnapshot, IngestOutcome};
pub use replay::ReplayLogSource;
pub use source::{LogSource, RpcLogSource, RpcLogSourceConfig, Subscription};
