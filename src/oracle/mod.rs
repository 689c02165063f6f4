//! Oracle round resolution for bet settlement
//!
//! - **Round model**: phase-aware round ids and round data
//! - **Sources**: Chainlink AggregatorV3Interface over JSON-RPC, or an offline replay set
//! - **Resolver**: binary search by default, linear scan for validation
//!
//! Settlement uses the bracket round: the newest round of the current phase whose
//! `updated_at` is strictly before the bet deadline.

pub mod replay;
pub mod resolver;
pub mod round;
pub mod source;

pub use replay::{ReplayRoundSource, RoundsFile};
pub use resolver::{CancelFlag, Resolution, RoundResolver, SearchStrategy};
pub use round::{OracleRound, RoundId};
pub use source::{ChainlinkRoundSource, RoundSource};

#[cfg(test)]
mod tests;
