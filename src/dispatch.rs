//! Ledger action planning and the dispatch seam
//!
//! The indexer never signs or submits. It turns a bet plus a decision into a
//! fully formed [`ActionRequest`] (calldata, value, target) and hands it to an
//! [`ActionDispatcher`] owned by the caller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

use crate::abi;
use crate::error::DispatchError;
use crate::models::{Bet, BetId, BetStatus};
use crate::oracle::{OracleRound, RoundId};
use crate::units::{self, decimal_string, LEDGER_DECIMALS};

const DELETE_BET: &str = "deleteBet(uint256)";
const ACCEPT_BET: &str = "acceptBet(uint256)";
const FINISH_BET: &str = "finishBet(uint256,uint256)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Delete,
    Accept,
    Finish,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Delete => "delete",
            ActionKind::Accept => "accept",
            ActionKind::Finish => "finish",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outbound ledger write, ready for a signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionRequest {
    Delete {
        #[serde(with = "decimal_string")]
        bet_id: BetId,
    },
    /// Payable: `payment` must equal the bet amount.
    Accept {
        #[serde(with = "decimal_string")]
        bet_id: BetId,
        #[serde(with = "decimal_string")]
        payment: BigUint,
    },
    Finish {
        #[serde(with = "decimal_string")]
        bet_id: BetId,
        /// Settlement price at 18 decimals.
        #[serde(with = "decimal_string")]
        resolved_price: BigUint,
        /// Oracle round the price came from.
        round_id: RoundId,
    },
}

impl ActionRequest {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionRequest::Delete { .. } => ActionKind::Delete,
            ActionRequest::Accept { .. } => ActionKind::Accept,
            ActionRequest::Finish { .. } => ActionKind::Finish,
        }
    }

    pub fn bet_id(&self) -> &BetId {
        match self {
            ActionRequest::Delete { bet_id }
            | ActionRequest::Accept { bet_id, .. }
            | ActionRequest::Finish { bet_id, .. } => bet_id,
        }
    }

    /// Selector plus ABI-encoded arguments.
    pub fn calldata(&self) -> Vec<u8> {
        match self {
            ActionRequest::Delete { bet_id } => {
                abi::encode_call(abi::selector(DELETE_BET), &[abi::encode_uint(bet_id)])
            }
            ActionRequest::Accept { bet_id, .. } => {
                abi::encode_call(abi::selector(ACCEPT_BET), &[abi::encode_uint(bet_id)])
            }
            ActionRequest::Finish {
                bet_id,
                resolved_price,
                ..
            } => abi::encode_call(
                abi::selector(FINISH_BET),
                &[abi::encode_uint(bet_id), abi::encode_uint(resolved_price)],
            ),
        }
    }

    /// Wei attached to the call.
    pub fn value(&self) -> BigUint {
        match self {
            ActionRequest::Accept { payment, .. } => payment.clone(),
            ActionRequest::Delete { .. } | ActionRequest::Finish { .. } => BigUint::default(),
        }
    }

    /// Unsigned `eth_sendTransaction` parameters. `from` is left to the signer.
    pub fn to_transaction(&self, contract: &str) -> Value {
        json!({
            "to": contract,
            "data": format!("0x{}", hex::encode(self.calldata())),
            "value": format!("0x{}", self.value().to_str_radix(16)),
        })
    }
}

/// Actions the ledger would accept for `bet`.
///
/// With a viewer, a waiting bet offers Delete to its creator and Accept to
/// everyone else. Without one, both are listed.
pub fn available_actions(bet: &Bet, viewer: Option<&str>) -> Vec<ActionKind> {
    match bet.status {
        BetStatus::Waiting => match viewer {
            Some(v) if bet.is_created_by(v) => vec![ActionKind::Delete],
            Some(_) => vec![ActionKind::Accept],
            None => vec![ActionKind::Delete, ActionKind::Accept],
        },
        BetStatus::Accepted => vec![ActionKind::Finish],
        BetStatus::Deleted | BetStatus::Finished => Vec::new(),
    }
}

pub fn plan_delete(bet: &Bet) -> Result<ActionRequest, DispatchError> {
    require_status(bet, ActionKind::Delete, BetStatus::Waiting)?;
    Ok(ActionRequest::Delete {
        bet_id: bet.id.clone(),
    })
}

pub fn plan_accept(bet: &Bet) -> Result<ActionRequest, DispatchError> {
    require_status(bet, ActionKind::Accept, BetStatus::Waiting)?;
    Ok(ActionRequest::Accept {
        bet_id: bet.id.clone(),
        payment: bet.amount.clone(),
    })
}

/// Settle `bet` at `round`'s answer, rescaled from `feed_decimals` to 18.
pub fn plan_finish(
    bet: &Bet,
    round: &OracleRound,
    feed_decimals: u8,
) -> Result<ActionRequest, DispatchError> {
    require_status(bet, ActionKind::Finish, BetStatus::Accepted)?;
    let answer = u128::try_from(round.answer).map_err(|_| DispatchError::NegativeAnswer {
        round_id: round.round_id.0,
        answer: round.answer,
    })?;
    Ok(ActionRequest::Finish {
        bet_id: bet.id.clone(),
        resolved_price: units::rescale(
            &BigUint::from(answer),
            feed_decimals as u32,
            LEDGER_DECIMALS,
        ),
        round_id: round.round_id,
    })
}

fn require_status(bet: &Bet, action: ActionKind, expected: BetStatus) -> Result<(), DispatchError> {
    if bet.status == expected {
        Ok(())
    } else {
        Err(DispatchError::ActionNotAvailable {
            bet_id: bet.id.to_string(),
            action: action.as_str(),
            status: bet.status.to_string(),
        })
    }
}

// =============================================================================
// Dispatch
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct DispatchReceipt {
    pub request_id: String,
    pub action: ActionKind,
    #[serde(with = "decimal_string")]
    pub bet_id: BetId,
    pub transaction: Value,
    pub dry_run: bool,
    pub submitted_at: DateTime<Utc>,
}

/// Submission collaborator: signs and sends, or records.
#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    async fn dispatch(&self, request: ActionRequest) -> Result<DispatchReceipt, DispatchError>;
}

/// Logs and records requests without submitting anything.
#[derive(Debug)]
pub struct DryRunDispatcher {
    contract: String,
    next_id: AtomicU64,
    sent: Mutex<Vec<ActionRequest>>,
}

impl DryRunDispatcher {
    pub fn new(contract: impl Into<String>) -> Self {
        Self {
            contract: contract.into(),
            next_id: AtomicU64::new(1),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Every request dispatched so far, in order.
    pub fn requests(&self) -> Vec<ActionRequest> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl ActionDispatcher for DryRunDispatcher {
    async fn dispatch(&self, request: ActionRequest) -> Result<DispatchReceipt, DispatchError> {
        let transaction = request.to_transaction(&self.contract);
        let request_id = format!("dry-run:{}", self.next_id.fetch_add(1, Ordering::Relaxed));

        info!(
            request_id = %request_id,
            action = %request.kind(),
            bet_id = %request.bet_id(),
            to = %self.contract,
            data = %transaction["data"],
            value = %transaction["value"],
            "Dry-run dispatch"
        );

        let receipt = DispatchReceipt {
            request_id,
            action: request.kind(),
            bet_id: request.bet_id().clone(),
            transaction,
            dry_run: true,
            submitted_at: Utc::now(),
        };
        self.sent.lock().push(request);
        Ok(receipt)
    }
}
