//! Error taxonomy
//!
//! Reconciliation is pure and cannot fail. Ingestion and oracle resolution are the
//! only fallible paths, and each reports a typed failure so callers can tell
//! retry-worthy conditions apart from terminal ones.

use std::fmt;

use crate::models::EventKind;

// =============================================================================
// Transport
// =============================================================================

/// A remote call (log fetch, round fetch) failed after the transport's own retries.
///
/// Always transient from the caller's point of view: the same call may succeed later.
#[derive(Debug, Clone)]
pub enum TransportError {
    /// HTTP-level failure (connect, timeout, non-success status).
    Http { method: String, message: String },
    /// The node answered with a JSON-RPC error object.
    Rpc { method: String, message: String },
    /// The node answered but the result could not be decoded.
    Decode { method: String, message: String },
}

impl TransportError {
    pub fn method(&self) -> &str {
        match self {
            Self::Http { method, .. } | Self::Rpc { method, .. } | Self::Decode { method, .. } => {
                method
            }
        }
    }

    /// Whether another attempt at the transport layer is worthwhile.
    ///
    /// Decode failures repeat deterministically for the same response shape.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Decode { .. })
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http { method, message } => write!(f, "{} transport failure: {}", method, message),
            Self::Rpc { method, message } => write!(f, "{} RPC error: {}", method, message),
            Self::Decode { method, message } => {
                write!(f, "{} returned an undecodable result: {}", method, message)
            }
        }
    }
}

impl std::error::Error for TransportError {}

// =============================================================================
// Invalid input
// =============================================================================

/// A malformed field in an event payload.
///
/// Reported and skipped; never aborts an ingestion or reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidInput {
    pub kind: EventKind,
    /// Bet id when it could be decoded.
    pub bet_id: Option<String>,
    pub field: &'static str,
    pub reason: String,
}

impl InvalidInput {
    pub fn new(kind: EventKind, field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            kind,
            bet_id: None,
            field,
            reason: reason.into(),
        }
    }

    pub fn with_bet_id(mut self, bet_id: impl ToString) -> Self {
        self.bet_id = Some(bet_id.to_string());
        self
    }
}

impl fmt::Display for InvalidInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.bet_id {
            Some(id) => write!(
                f,
                "invalid {} in {} event for bet {}: {}",
                self.field, self.kind, id, self.reason
            ),
            None => write!(f, "invalid {} in {} event: {}", self.field, self.kind, self.reason),
        }
    }
}

impl std::error::Error for InvalidInput {}

// =============================================================================
// Oracle resolution
// =============================================================================

/// Why a settlement round could not be resolved.
#[derive(Debug, Clone)]
pub enum ResolveError {
    /// The freshest round is not newer than the target; retry later.
    NotYetResolvable {
        target_timestamp: u64,
        latest_updated_at: u64,
    },
    /// The current phase holds no round older than the target.
    RoundNotFound {
        target_timestamp: u64,
        first_round_id: u128,
        latest_round_id: u128,
    },
    /// The caller abandoned the search between probes.
    Cancelled { probes: u32 },
    /// A round fetch failed.
    Transport(TransportError),
}

impl ResolveError {
    /// True when the same request may succeed later without any change by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotYetResolvable { .. } | Self::Transport(_))
    }
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotYetResolvable {
                target_timestamp,
                latest_updated_at,
            } => write!(
                f,
                "target {} is not yet covered by the oracle (latest round updated at {})",
                target_timestamp, latest_updated_at
            ),
            Self::RoundNotFound {
                target_timestamp,
                first_round_id,
                latest_round_id,
            } => write!(
                f,
                "no round before {} in phase rounds {}..={}",
                target_timestamp, first_round_id, latest_round_id
            ),
            Self::Cancelled { probes } => write!(f, "round search cancelled after {} probes", probes),
            Self::Transport(e) => write!(f, "round fetch failed: {}", e),
        }
    }
}

impl std::error::Error for ResolveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for ResolveError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

// =============================================================================
// Dispatch
// =============================================================================

/// A ledger request that cannot be formed from the given bet and inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The bet's status does not permit this action.
    ActionNotAvailable { bet_id: String, action: &'static str, status: String },
    /// Oracle reported a negative price.
    NegativeAnswer { round_id: u128, answer: i128 },
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ActionNotAvailable { bet_id, action, status } => {
                write!(f, "cannot {} bet {} while it is {}", action, bet_id, status)
            }
            Self::NegativeAnswer { round_id, answer } => {
                write!(f, "round {} reported a negative answer {}", round_id, answer)
            }
        }
    }
}

impl std::error::Error for DispatchError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let not_yet = ResolveError::NotYetResolvable {
            target_timestamp: 10,
            latest_updated_at: 10,
        };
        let not_found = ResolveError::RoundNotFound {
            target_timestamp: 1,
            first_round_id: 1,
            latest_round_id: 5,
        };
        assert!(not_yet.is_retryable());
        assert!(!not_found.is_retryable());
        assert!(!ResolveError::Cancelled { probes: 2 }.is_retryable());

        let decode = TransportError::Decode {
            method: "eth_call".to_string(),
            message: "short".to_string(),
        };
        assert!(!decode.is_retryable());
        assert!(ResolveError::from(decode).is_retryable());
    }

    #[test]
    fn test_invalid_input_display() {
        let e = InvalidInput::new(EventKind::Created, "targetPrice", "not a number").with_bet_id(7);
        assert_eq!(
            e.to_string(),
            "invalid targetPrice in BetCreated event for bet 7: not a number"
        );
    }
}
