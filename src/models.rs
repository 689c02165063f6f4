use chrono::{DateTime, TimeZone, Utc};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::units::{decimal_string, option_decimal_string};

/// uint256 bet identifier.
pub type BetId = BigUint;

/// Derived bet state keyed by id, in ascending id order.
pub type BetBook = BTreeMap<BetId, Bet>;

/// The four ledger event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Deleted,
    Accepted,
    Finished,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Created,
        EventKind::Deleted,
        EventKind::Accepted,
        EventKind::Finished,
    ];

    /// Solidity event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            EventKind::Created => "BetCreated",
            EventKind::Deleted => "BetDeleted",
            EventKind::Accepted => "BetAccepted",
            EventKind::Finished => "BetFinished",
        }
    }

    /// Canonical signature hashed into topic0.
    pub fn signature(&self) -> &'static str {
        match self {
            EventKind::Created => "BetCreated(uint256,address,uint256,uint256,string,bool)",
            EventKind::Deleted => "BetDeleted(uint256)",
            EventKind::Accepted => "BetAccepted(uint256)",
            EventKind::Finished => "BetFinished(uint256,address,address,uint256)",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

/// Where a log sits in the chain. Orders events totally at the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogPosition {
    pub block_number: u64,
    pub log_index: u64,
}

impl LogPosition {
    pub fn new(block_number: u64, log_index: u64) -> Self {
        Self {
            block_number,
            log_index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetCreated {
    #[serde(with = "decimal_string")]
    pub id: BetId,
    pub creator: String,
    /// Unix seconds.
    pub deadline: u64,
    #[serde(with = "decimal_string")]
    pub amount: BigUint,
    /// Raw string as emitted; empty when the creator set no target.
    pub target_price: String,
    /// `true` bets on a higher price.
    pub direction: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetFinished {
    #[serde(with = "decimal_string")]
    pub id: BetId,
    pub winner: String,
    pub loser: String,
    #[serde(with = "decimal_string")]
    pub amount: BigUint,
}

/// Event payload, one variant per ledger event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BetEventData {
    Created(BetCreated),
    Deleted {
        #[serde(with = "decimal_string")]
        id: BetId,
    },
    Accepted {
        #[serde(with = "decimal_string")]
        id: BetId,
    },
    Finished(BetFinished),
}

/// An immutable ledger event together with its log position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetEvent {
    pub position: LogPosition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(flatten)]
    pub data: BetEventData,
}

impl BetEvent {
    pub fn new(position: LogPosition, data: BetEventData) -> Self {
        Self {
            position,
            tx_hash: None,
            data,
        }
    }

    pub fn with_tx_hash(mut self, tx_hash: impl Into<String>) -> Self {
        self.tx_hash = Some(tx_hash.into());
        self
    }

    pub fn kind(&self) -> EventKind {
        match &self.data {
            BetEventData::Created(_) => EventKind::Created,
            BetEventData::Deleted { .. } => EventKind::Deleted,
            BetEventData::Accepted { .. } => EventKind::Accepted,
            BetEventData::Finished(_) => EventKind::Finished,
        }
    }

    pub fn bet_id(&self) -> &BetId {
        match &self.data {
            BetEventData::Created(c) => &c.id,
            BetEventData::Deleted { id } | BetEventData::Accepted { id } => id,
            BetEventData::Finished(f) => &f.id,
        }
    }

    /// Identity used to drop redelivered logs.
    pub fn key(&self) -> EventKey {
        EventKey {
            kind: self.kind(),
            bet_id: self.bet_id().clone(),
            position: self.position,
        }
    }
}

/// Dedup identity: (kind, id, block, log index).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub kind: EventKind,
    pub bet_id: BetId,
    pub position: LogPosition,
}

/// Which way the creator expects the price to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Higher,
    Lower,
}

impl From<bool> for Direction {
    fn from(higher: bool) -> Self {
        if higher {
            Direction::Higher
        } else {
            Direction::Lower
        }
    }
}

/// Derived bet status. Exactly one value per bet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetStatus {
    Waiting,
    Accepted,
    Deleted,
    Finished,
}

impl BetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetStatus::Waiting => "waiting",
            BetStatus::Accepted => "accepted",
            BetStatus::Deleted => "deleted",
            BetStatus::Finished => "finished",
        }
    }
}

impl fmt::Display for BetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bet as derived from its events. Never stored on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bet {
    #[serde(with = "decimal_string")]
    pub id: BetId,
    pub creator: String,
    #[serde(with = "decimal_string")]
    pub amount: BigUint,
    pub deadline_timestamp: u64,
    /// 18-decimal fixed point; `None` when the event carried an empty string.
    #[serde(with = "option_decimal_string")]
    pub target_price: Option<BigUint>,
    pub direction: Direction,
    pub status: BetStatus,
    /// Position of the Created event this record was built from.
    pub created_at: LogPosition,
}

impl Bet {
    pub fn deadline_utc(&self) -> Option<DateTime<Utc>> {
        let secs = i64::try_from(self.deadline_timestamp).ok()?;
        Utc.timestamp_opt(secs, 0).single()
    }

    pub fn is_created_by(&self, address: &str) -> bool {
        self.creator.eq_ignore_ascii_case(address)
    }
}

/// A settled bet, as listed from BetFinished events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishedBet {
    #[serde(with = "decimal_string")]
    pub bet_id: BetId,
    pub winner: String,
    pub loser: String,
    #[serde(with = "decimal_string")]
    pub amount: BigUint,
    pub position: LogPosition,
}
