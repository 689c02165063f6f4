//! Duel Indexer Library
//!
//! Rebuilds wager state for the DuelContract ledger from its event log and
//! resolves the oracle round a bet settles against.
//!
//! - `ingest`: log sources and the event ingestor (ordered, deduplicated, snapshot reads)
//! - `reconciler`: pure derivation of bet state from the four event collections
//! - `oracle`: Chainlink round model, sources and the settlement round resolver
//! - `dispatch`: ledger action planning and the submission seam

pub mod abi;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod ingest;
pub mod models;
pub mod oracle;
pub mod reconciler;
pub mod rpc;
pub mod units;

pub use error::{DispatchError, InvalidInput, ResolveError, TransportError};
