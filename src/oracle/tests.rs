//! Resolver tests against synthetic round series
//!
//! Tests cover:
//! 1. Bracket selection for both strategies
//! 2. Eligibility gate (strict `<`)
//! 3. Phase exhaustion and phase boundaries
//! 4. Probe budgets, cancellation, transport failures

use async_trait::async_trait;

use super::*;
use crate::error::{ResolveError, TransportError};

/// Rounds `1..=n` of `phase` with `updated_at = 100 * i`.
fn series(phase: u64, n: u64) -> Vec<OracleRound> {
    (1..=n)
        .map(|i| OracleRound {
            round_id: RoundId::from_parts(phase, i),
            answer: 2_000_00000000 + i as i128,
            started_at: 100 * i - 5,
            updated_at: 100 * i,
            answered_in_round: RoundId::from_parts(phase, i).0,
        })
        .collect()
}

fn source(phase: u64, n: u64) -> ReplayRoundSource {
    ReplayRoundSource::new(8, series(phase, n))
}

async fn resolve(
    strategy: SearchStrategy,
    src: &ReplayRoundSource,
    target: u64,
) -> Result<Resolution, ResolveError> {
    RoundResolver::new(strategy)
        .resolve_latest(src, target, &CancelFlag::new())
        .await
}

// =========================================================================
// BRACKET SELECTION
// =========================================================================

#[tokio::test]
async fn test_binary_finds_first_round_below_target() {
    let src = source(1, 10);
    let res = resolve(SearchStrategy::Binary, &src, 550).await.unwrap();
    assert_eq!(res.round.updated_at, 500);
    assert_eq!(res.round.round_id, RoundId::from_parts(1, 5));
    assert_eq!(res.strategy, SearchStrategy::Binary);
}

#[tokio::test]
async fn test_linear_finds_first_round_below_target() {
    let src = source(1, 10);
    let res = resolve(SearchStrategy::Linear, &src, 550).await.unwrap();
    assert_eq!(res.round.updated_at, 500);
    // 9, 8, 7, 6, 5
    assert_eq!(res.probes, 5);
}

#[tokio::test]
async fn test_exact_timestamp_is_not_before() {
    let src = source(1, 10);
    let res = resolve(SearchStrategy::Binary, &src, 500).await.unwrap();
    assert_eq!(res.round.updated_at, 400);
}

#[tokio::test]
async fn test_first_round_of_phase_never_brackets() {
    for strategy in [SearchStrategy::Binary, SearchStrategy::Linear] {
        // Only round 1 (updated_at 100) is before 150.
        let src = source(1, 10);
        let err = resolve(strategy, &src, 150).await.unwrap_err();
        assert!(matches!(err, ResolveError::RoundNotFound { .. }), "{}: {:?}", strategy, err);
        assert!(src.probes() > 0);

        let res = resolve(strategy, &src, 250).await.unwrap();
        assert_eq!(res.round.round_id, RoundId::from_parts(1, 2), "{}", strategy);
    }
}

#[tokio::test]
async fn test_linear_stops_above_first_round() {
    let src = source(1, 10);
    let _ = resolve(SearchStrategy::Linear, &src, 150).await.unwrap_err();
    // 9 down to 2; round 1 is never fetched.
    assert_eq!(src.probes(), 8);
}

#[tokio::test]
async fn test_strategies_agree_on_every_target() {
    let src = source(3, 40);
    for target in (101..4000).step_by(37) {
        let b = resolve(SearchStrategy::Binary, &src, target).await;
        let l = resolve(SearchStrategy::Linear, &src, target).await;
        match (b, l) {
            (Ok(b), Ok(l)) => assert_eq!(b.round, l.round, "target {}", target),
            (Err(ResolveError::RoundNotFound { .. }), Err(ResolveError::RoundNotFound { .. })) => {
                assert!(target <= 200, "target {}", target);
            }
            (b, l) => panic!("target {}: binary {:?}, linear {:?}", target, b, l),
        }
    }
}

// =========================================================================
// GATE AND EXHAUSTION
// =========================================================================

#[tokio::test]
async fn test_gate_is_strict() {
    let src = source(1, 10);
    for strategy in [SearchStrategy::Binary, SearchStrategy::Linear] {
        let err = resolve(strategy, &src, 1000).await.unwrap_err();
        assert!(
            matches!(
                err,
                ResolveError::NotYetResolvable {
                    target_timestamp: 1000,
                    latest_updated_at: 1000
                }
            ),
            "{:?}",
            err
        );
        assert!(err.is_retryable());
    }
    // Gate failures cost no probes.
    assert_eq!(src.probes(), 0);
}

#[tokio::test]
async fn test_target_before_phase_is_round_not_found() {
    for strategy in [SearchStrategy::Binary, SearchStrategy::Linear] {
        let src = source(1, 10);
        let err = resolve(strategy, &src, 50).await.unwrap_err();
        match err {
            ResolveError::RoundNotFound {
                first_round_id,
                latest_round_id,
                ..
            } => {
                assert_eq!(first_round_id, RoundId::from_parts(1, 1).0);
                assert_eq!(latest_round_id, RoundId::from_parts(1, 10).0);
            }
            other => panic!("expected RoundNotFound, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_search_stays_inside_current_phase() {
    // Phase 4 covers times 100..=1000, phase 5 restarts its counter at 1 with later times.
    let mut rounds = series(4, 10);
    rounds.extend((1..=5u64).map(|i| OracleRound {
        round_id: RoundId::from_parts(5, i),
        answer: 1,
        started_at: 2000 + i,
        updated_at: 2000 + 100 * i,
        answered_in_round: RoundId::from_parts(5, i).0,
    }));
    let src = ReplayRoundSource::new(8, rounds);

    let err = resolve(SearchStrategy::Binary, &src, 550).await.unwrap_err();
    assert!(matches!(err, ResolveError::RoundNotFound { .. }));

    let res = resolve(SearchStrategy::Binary, &src, 2250).await.unwrap();
    assert_eq!(res.round.round_id, RoundId::from_parts(5, 2));
}

#[tokio::test]
async fn test_latest_is_only_round_of_phase() {
    let src = source(2, 1);
    let err = resolve(SearchStrategy::Linear, &src, 50).await.unwrap_err();
    assert!(matches!(err, ResolveError::RoundNotFound { .. }));
    assert_eq!(src.probes(), 0);
}

// =========================================================================
// COST, CANCELLATION, FAILURES
// =========================================================================

#[tokio::test]
async fn test_binary_probe_budget_is_logarithmic() {
    let src = source(1, 1000);
    let res = resolve(SearchStrategy::Binary, &src, 12_345).await.unwrap();
    assert_eq!(res.round.updated_at, 12_300);
    assert!(res.probes <= 11, "probes = {}", res.probes);
}

#[tokio::test]
async fn test_cancel_before_first_probe() {
    let src = source(1, 10);
    let cancel = CancelFlag::new();
    cancel.cancel();
    let err = RoundResolver::new(SearchStrategy::Linear)
        .resolve_latest(&src, 550, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::Cancelled { probes: 0 }));
}

/// Cancels its flag once `after` probes have been served.
struct CancelAfter {
    inner: ReplayRoundSource,
    flag: CancelFlag,
    after: u32,
}

#[async_trait]
impl RoundSource for CancelAfter {
    async fn decimals(&self) -> Result<u8, TransportError> {
        self.inner.decimals().await
    }

    async fn latest_round_data(&self) -> Result<OracleRound, TransportError> {
        self.inner.latest_round_data().await
    }

    async fn get_round_data(&self, round_id: RoundId) -> Result<OracleRound, TransportError> {
        let round = self.inner.get_round_data(round_id).await;
        if self.inner.probes() >= self.after {
            self.flag.cancel();
        }
        round
    }
}

#[tokio::test]
async fn test_cancel_between_probes() {
    let flag = CancelFlag::new();
    let src = CancelAfter {
        inner: source(1, 10),
        flag: flag.clone(),
        after: 2,
    };
    let err = RoundResolver::new(SearchStrategy::Linear)
        .resolve_latest(&src, 150, &flag)
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::Cancelled { probes: 2 }), "{:?}", err);
}

#[tokio::test]
async fn test_missing_round_surfaces_transport_error() {
    // Round 5 was never published.
    let rounds = series(1, 10)
        .into_iter()
        .filter(|r| r.round_id.aggregator_round_id() != 5);
    let src = ReplayRoundSource::new(8, rounds);
    let err = resolve(SearchStrategy::Binary, &src, 550).await.unwrap_err();
    assert!(matches!(err, ResolveError::Transport(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_incomplete_round_never_brackets() {
    let mut rounds = series(1, 10);
    rounds[4].updated_at = 0; // round 5 not answered
    let src = ReplayRoundSource::new(8, rounds);
    let res = resolve(SearchStrategy::Linear, &src, 550).await.unwrap();
    assert_eq!(res.round.round_id, RoundId::from_parts(1, 4));
}

#[test]
fn test_strategy_parsing() {
    assert_eq!("Binary".parse::<SearchStrategy>().unwrap(), SearchStrategy::Binary);
    assert_eq!("linear".parse::<SearchStrategy>().unwrap(), SearchStrategy::Linear);
    assert!("bisect".parse::<SearchStrategy>().is_err());
}
