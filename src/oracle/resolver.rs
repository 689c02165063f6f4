//! Settlement round resolution
//!
//! Finds the bracket round for a target time: the newest round in the current
//! phase whose `updated_at` is strictly before the target.
//!
//! Round ids are only contiguous inside a phase, so the search never leaves
//! `(first_of_phase, latest]`. The phase's first round is never a candidate: a
//! target that falls at or before it predates the phase's coverage.
//! `updated_at` is assumed non-decreasing across that range, which is what makes
//! the binary search valid. The linear scan walks the same range newest to
//! oldest and exists to cross-check it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use super::round::{OracleRound, RoundId};
use super::source::RoundSource;
use crate::error::ResolveError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    /// O(log n) probes. Relies on monotonic `updated_at`.
    #[default]
    Binary,
    /// One probe per round, newest first.
    Linear,
}

impl FromStr for SearchStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "binary" => Ok(Self::Binary),
            "linear" => Ok(Self::Linear),
            other => Err(format!("unknown search strategy {:?} (binary|linear)", other)),
        }
    }
}

impl fmt::Display for SearchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binary => f.write_str("binary"),
            Self::Linear => f.write_str("linear"),
        }
    }
}

/// Cooperative cancellation, checked once per probe.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A resolved bracket round and what it cost to find.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub round: OracleRound,
    /// `getRoundData` calls issued.
    pub probes: u32,
    pub strategy: SearchStrategy,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RoundResolver {
    strategy: SearchStrategy,
}

impl RoundResolver {
    pub fn new(strategy: SearchStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> SearchStrategy {
        self.strategy
    }

    /// Fetch `latestRoundData` and resolve against it.
    pub async fn resolve_latest<S: RoundSource + ?Sized>(
        &self,
        source: &S,
        target_timestamp: u64,
        cancel: &CancelFlag,
    ) -> Result<Resolution, ResolveError> {
        let latest = source.latest_round_data().await?;
        self.resolve(source, target_timestamp, &latest, cancel).await
    }

    /// Resolve the bracket round for `target_timestamp`, given the freshest round.
    pub async fn resolve<S: RoundSource + ?Sized>(
        &self,
        source: &S,
        target_timestamp: u64,
        latest: &OracleRound,
        cancel: &CancelFlag,
    ) -> Result<Resolution, ResolveError> {
        let first = search_floor(target_timestamp, latest)?;

        debug!(
            target_timestamp,
            latest_round_id = %latest.round_id,
            first_round_id = %first,
            phase_id = latest.round_id.phase_id(),
            strategy = %self.strategy,
            "Resolving settlement round"
        );

        let (found, probes) = match self.strategy {
            SearchStrategy::Binary => {
                binary_search(source, target_timestamp, first, latest.round_id, cancel).await?
            }
            SearchStrategy::Linear => {
                linear_scan(source, target_timestamp, first, latest.round_id, cancel).await?
            }
        };

        match found {
            Some(round) => {
                info!(
                    target_timestamp,
                    round_id = %round.round_id,
                    updated_at = round.updated_at,
                    answer = %round.answer,
                    probes,
                    "Settlement round resolved"
                );
                Ok(Resolution {
                    round,
                    probes,
                    strategy: self.strategy,
                })
            }
            None => Err(ResolveError::RoundNotFound {
                target_timestamp,
                first_round_id: first.0,
                latest_round_id: latest.round_id.0,
            }),
        }
    }
}

/// Eligibility gate plus phase decoding. Returns the first round id of the phase.
fn search_floor(target_timestamp: u64, latest: &OracleRound) -> Result<RoundId, ResolveError> {
    if target_timestamp >= latest.updated_at {
        return Err(ResolveError::NotYetResolvable {
            target_timestamp,
            latest_updated_at: latest.updated_at,
        });
    }
    latest
        .round_id
        .first_of_phase()
        .ok_or(ResolveError::RoundNotFound {
            target_timestamp,
            first_round_id: latest.round_id.0,
            latest_round_id: latest.round_id.0,
        })
}

/// Newest to oldest over `(first, latest)`; `latest` already failed the gate.
async fn linear_scan<S: RoundSource + ?Sized>(
    source: &S,
    target_timestamp: u64,
    first: RoundId,
    latest: RoundId,
    cancel: &CancelFlag,
) -> Result<(Option<OracleRound>, u32), ResolveError> {
    let mut probes = 0u32;
    let mut id = latest.0;

    while id > first.0 + 1 {
        if cancel.is_cancelled() {
            return Err(ResolveError::Cancelled { probes });
        }
        id -= 1;
        let round = source.get_round_data(RoundId(id)).await?;
        probes += 1;
        if round.is_before(target_timestamp) {
            return Ok((Some(round), probes));
        }
    }

    Ok((None, probes))
}

/// Last id in `(first, latest)` whose round is before the target.
async fn binary_search<S: RoundSource + ?Sized>(
    source: &S,
    target_timestamp: u64,
    first: RoundId,
    latest: RoundId,
    cancel: &CancelFlag,
) -> Result<(Option<OracleRound>, u32), ResolveError> {
    let mut probes = 0u32;
    let mut best = None;
    let (mut lo, mut hi) = (first.0 + 1, latest.0);

    while lo < hi {
        if cancel.is_cancelled() {
            return Err(ResolveError::Cancelled { probes });
        }
        let mid = lo + (hi - lo) / 2;
        let round = source.get_round_data(RoundId(mid)).await?;
        probes += 1;
        if round.is_before(target_timestamp) {
            best = Some(round);
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }

    Ok((best, probes))
}
