//! Bet state reconciliation
//!
//! Pure derivation of bet state from the four event collections. Status comes
//! from membership of the bet id in the Deleted / Accepted / Finished sets and
//! follows a fixed precedence, so event arrival order never matters:
//!
//! `Finished > Accepted > Deleted > Waiting`
//!
//! The precedence is reported as-is even for combinations the ledger should never
//! produce (Deleted then Accepted reports Accepted). Legality is the ledger's call.

use std::collections::HashSet;
use tracing::warn;

use crate::error::InvalidInput;
use crate::models::{
    Bet, BetBook, BetCreated, BetEvent, BetEventData, BetId, BetStatus, Direction, EventKind,
    FinishedBet,
};
use crate::units;

/// Output of a reconciliation pass that also surfaces skipped events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub bets: BetBook,
    pub rejected: Vec<InvalidInput>,
}

/// Derive every bet's current state. Malformed Created events are logged and skipped.
pub fn reconcile(
    created: &[BetEvent],
    deleted: &[BetEvent],
    accepted: &[BetEvent],
    finished: &[BetEvent],
) -> BetBook {
    let Reconciliation { bets, rejected } =
        reconcile_with_rejects(created, deleted, accepted, finished);
    for reject in &rejected {
        warn!(error = %reject, "Skipping malformed BetCreated event");
    }
    bets
}

/// As [`reconcile`], returning rejects instead of logging them.
///
/// Duplicate Created events for one id collapse to a single record: last write
/// wins by collection order.
pub fn reconcile_with_rejects(
    created: &[BetEvent],
    deleted: &[BetEvent],
    accepted: &[BetEvent],
    finished: &[BetEvent],
) -> Reconciliation {
    let deleted = id_set(deleted, EventKind::Deleted);
    let accepted = id_set(accepted, EventKind::Accepted);
    let finished = id_set(finished, EventKind::Finished);

    let mut out = Reconciliation::default();

    for event in created {
        let BetEventData::Created(c) = &event.data else {
            continue;
        };

        let target_price = match parse_target_price(c) {
            Ok(p) => p,
            Err(e) => {
                out.rejected.push(e);
                continue;
            }
        };

        let status = derive_status(
            finished.contains(&c.id),
            accepted.contains(&c.id),
            deleted.contains(&c.id),
        );

        out.bets.insert(
            c.id.clone(),
            Bet {
                id: c.id.clone(),
                creator: c.creator.clone(),
                amount: c.amount.clone(),
                deadline_timestamp: c.deadline,
                target_price,
                direction: Direction::from(c.direction),
                status,
                created_at: event.position,
            },
        );
    }

    out
}

/// Fixed precedence over membership flags.
pub fn derive_status(is_finished: bool, is_accepted: bool, is_deleted: bool) -> BetStatus {
    if is_finished {
        BetStatus::Finished
    } else if is_accepted {
        BetStatus::Accepted
    } else if is_deleted {
        BetStatus::Deleted
    } else {
        BetStatus::Waiting
    }
}

/// Finished-bet listing in log order.
pub fn finished_bets(finished: &[BetEvent]) -> Vec<FinishedBet> {
    finished
        .iter()
        .filter_map(|event| match &event.data {
            BetEventData::Finished(f) => Some(FinishedBet {
                bet_id: f.id.clone(),
                winner: f.winner.clone(),
                loser: f.loser.clone(),
                amount: f.amount.clone(),
                position: event.position,
            }),
            _ => None,
        })
        .collect()
}

/// Empty target means "none set". A bare integer is already 18-decimal fixed
/// point; a number with a fractional part is in whole units and gets scaled.
fn parse_target_price(c: &BetCreated) -> Result<Option<num_bigint::BigUint>, InvalidInput> {
    let raw = c.target_price.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    let parsed = if raw.contains('.') {
        units::parse_units(raw, units::LEDGER_DECIMALS)
    } else {
        units::parse_uint(raw)
    };
    parsed.map(Some).ok_or_else(|| {
        InvalidInput::new(
            EventKind::Created,
            "targetPrice",
            format!("{:?} is not a decimal number", c.target_price),
        )
        .with_bet_id(&c.id)
    })
}

fn id_set(events: &[BetEvent], kind: EventKind) -> HashSet<&BetId> {
    events
        .iter()
        .filter(|e| e.kind() == kind)
        .map(|e| e.bet_id())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BetFinished, LogPosition};
    use num_bigint::BigUint;

    fn id(n: u32) -> BigUint {
        BigUint::from(n)
    }

    fn created(n: u32, block: u64, amount: u32) -> BetEvent {
        BetEvent::new(
            LogPosition::new(block, 0),
            BetEventData::Created(BetCreated {
                id: id(n),
                creator: "0x00000000000000000000000000000000000000c1".to_string(),
                deadline: 1_700_000_000,
                amount: BigUint::from(amount),
                target_price: "1850000000000000000000".to_string(),
                direction: true,
            }),
        )
    }

    fn deleted(n: u32, block: u64) -> BetEvent {
        BetEvent::new(LogPosition::new(block, 1), BetEventData::Deleted { id: id(n) })
    }

    fn accepted(n: u32, block: u64) -> BetEvent {
        BetEvent::new(LogPosition::new(block, 2), BetEventData::Accepted { id: id(n) })
    }

    fn finished(n: u32, block: u64) -> BetEvent {
        BetEvent::new(
            LogPosition::new(block, 3),
            BetEventData::Finished(BetFinished {
                id: id(n),
                winner: "0x00000000000000000000000000000000000000a1".to_string(),
                loser: "0x00000000000000000000000000000000000000b1".to_string(),
                amount: BigUint::from(1000u32),
            }),
        )
    }

    #[test]
    fn test_precedence_all_four_is_finished() {
        let book = reconcile(
            &[created(1, 1, 10)],
            &[deleted(1, 2)],
            &[accepted(1, 3)],
            &[finished(1, 4)],
        );
        assert_eq!(book[&id(1)].status, BetStatus::Finished);
    }

    #[test]
    fn test_precedence_accepted_beats_deleted() {
        let book = reconcile(&[created(1, 1, 10)], &[deleted(1, 2)], &[accepted(1, 3)], &[]);
        assert_eq!(book[&id(1)].status, BetStatus::Accepted);
    }

    #[test]
    fn test_precedence_deleted_and_waiting() {
        let book = reconcile(
            &[created(1, 1, 10), created(2, 1, 10)],
            &[deleted(1, 2)],
            &[],
            &[],
        );
        assert_eq!(book[&id(1)].status, BetStatus::Deleted);
        assert_eq!(book[&id(2)].status, BetStatus::Waiting);
    }

    #[test]
    fn test_arrival_order_irrelevant() {
        // Accepted logged before Deleted, and vice versa, yield the same status.
        let a = reconcile(&[created(1, 1, 10)], &[deleted(1, 9)], &[accepted(1, 2)], &[]);
        let b = reconcile(&[created(1, 1, 10)], &[deleted(1, 2)], &[accepted(1, 9)], &[]);
        assert_eq!(a[&id(1)].status, b[&id(1)].status);
    }

    #[test]
    fn test_idempotent() {
        let c = [created(1, 1, 10), created(2, 2, 20), created(3, 3, 30)];
        let d = [deleted(2, 4)];
        let a = [accepted(3, 5)];
        let f = [finished(3, 6)];
        let first = reconcile(&c, &d, &a, &f);
        let second = reconcile(&c, &d, &a, &f);
        assert_eq!(first, second);
    }

    #[test]
    fn test_completeness_only_created_ids() {
        let book = reconcile(
            &[created(1, 1, 10)],
            &[deleted(7, 2)],
            &[accepted(8, 3)],
            &[finished(9, 4)],
        );
        assert_eq!(book.len(), 1);
        assert!(book.contains_key(&id(1)));
        assert!(!book.contains_key(&id(7)));
    }

    #[test]
    fn test_duplicate_created_last_write_wins() {
        let book = reconcile(&[created(1, 1, 10), created(1, 5, 99)], &[], &[], &[]);
        assert_eq!(book.len(), 1);
        assert_eq!(book[&id(1)].amount, BigUint::from(99u32));
        assert_eq!(book[&id(1)].created_at, LogPosition::new(5, 0));
    }

    #[test]
    fn test_target_price_parsing() {
        let mut empty = created(1, 1, 10);
        let mut bad = created(2, 1, 10);
        if let BetEventData::Created(c) = &mut empty.data {
            c.target_price = String::new();
        }
        if let BetEventData::Created(c) = &mut bad.data {
            c.target_price = "about 1800".to_string();
        }

        let out = reconcile_with_rejects(&[empty, bad, created(3, 1, 10)], &[], &[], &[]);
        assert_eq!(out.bets[&id(1)].target_price, None);
        assert!(!out.bets.contains_key(&id(2)));
        assert_eq!(
            out.bets[&id(3)].target_price,
            Some(BigUint::parse_bytes(b"1850000000000000000000", 10).unwrap())
        );
        assert_eq!(out.rejected.len(), 1);
        assert_eq!(out.rejected[0].bet_id.as_deref(), Some("2"));
    }

    #[test]
    fn test_fractional_target_price_keeps_bet() {
        let mut c = created(1, 1, 10);
        if let BetEventData::Created(inner) = &mut c.data {
            inner.target_price = "1850.50".to_string();
        }

        let out = reconcile_with_rejects(&[c], &[], &[accepted(1, 2)], &[]);
        assert!(out.rejected.is_empty(), "{:?}", out.rejected);
        assert_eq!(out.bets.len(), 1);
        let bet = &out.bets[&id(1)];
        assert_eq!(bet.status, BetStatus::Accepted);
        assert_eq!(
            bet.target_price,
            Some(BigUint::parse_bytes(b"1850500000000000000000", 10).unwrap())
        );
    }

    #[test]
    fn test_status_event_in_wrong_collection_is_ignored() {
        // A Finished event mistakenly handed in as "deleted" does not count as a deletion.
        let book = reconcile(&[created(1, 1, 10)], &[finished(1, 2)], &[], &[]);
        assert_eq!(book[&id(1)].status, BetStatus::Waiting);
    }

    #[test]
    fn test_finished_listing() {
        let list = finished_bets(&[finished(4, 10), finished(2, 11)]);
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].bet_id, id(4));
        assert_eq!(list[1].position.block_number, 11);
    }
}
