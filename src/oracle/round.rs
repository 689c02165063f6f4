//! Oracle round data and phase-aware round ids.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Low 64 bits of a proxy round id: the aggregator's own counter.
const AGGREGATOR_MASK: u128 = 0xFFFF_FFFF_FFFF_FFFF;

/// Proxy round id: `(phase_id << 64) | aggregator_round_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundId(pub u128);

impl RoundId {
    pub fn from_parts(phase_id: u64, aggregator_round_id: u64) -> Self {
        Self(((phase_id as u128) << 64) | aggregator_round_id as u128)
    }

    pub fn phase_id(self) -> u64 {
        (self.0 >> 64) as u64
    }

    pub fn aggregator_round_id(self) -> u64 {
        (self.0 & AGGREGATOR_MASK) as u64
    }

    /// First round of this round's phase, `None` for a phase that has no rounds
    /// (aggregator counter 0).
    pub fn first_of_phase(self) -> Option<RoundId> {
        let agg = self.aggregator_round_id() as u128;
        if agg == 0 {
            return None;
        }
        Some(RoundId(self.0 - agg + 1))
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One published price update.
///
/// Timestamps are Unix seconds as reported on-chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleRound {
    pub round_id: RoundId,
    /// Price at the feed's decimals.
    pub answer: i128,
    pub started_at: u64,
    pub updated_at: u64,
    pub answered_in_round: u128,
}

impl OracleRound {
    /// A round with `updated_at == 0` has not been answered yet.
    pub fn is_complete(&self) -> bool {
        self.updated_at != 0
    }

    /// The answer was carried over from an earlier round.
    pub fn is_stale(&self) -> bool {
        self.answered_in_round < self.round_id.0
    }

    /// Strictly before the target time.
    pub fn is_before(&self, target_timestamp: u64) -> bool {
        self.is_complete() && self.updated_at < target_timestamp
    }

    /// Decode the answer to a float price, for display only.
    pub fn price(&self, decimals: u8) -> f64 {
        (self.answer as f64) / 10f64.powi(decimals as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_id_decoding() {
        let id = RoundId((5u128 << 64) | 10);
        assert_eq!(id.aggregator_round_id(), 10);
        assert_eq!(id.phase_id(), 5);
        assert_eq!(id.first_of_phase(), Some(RoundId(id.0 - 10 + 1)));
        assert_eq!(id, RoundId::from_parts(5, 10));
    }

    #[test]
    fn test_first_of_phase_for_empty_counter() {
        assert_eq!(RoundId::from_parts(3, 0).first_of_phase(), None);
        assert_eq!(
            RoundId::from_parts(3, 1).first_of_phase(),
            Some(RoundId::from_parts(3, 1))
        );
    }

    #[test]
    fn test_round_flags() {
        let round = OracleRound {
            round_id: RoundId::from_parts(1, 4),
            answer: 185_000_000_000,
            started_at: 90,
            updated_at: 100,
            answered_in_round: RoundId::from_parts(1, 3).0,
        };
        assert!(round.is_complete());
        assert!(round.is_stale());
        assert!(round.is_before(101));
        assert!(!round.is_before(100));
        assert!((round.price(8) - 1850.0).abs() < 1e-9);

        let pending = OracleRound {
            updated_at: 0,
            ..round
        };
        assert!(!pending.is_before(u64::MAX));
    }
}
