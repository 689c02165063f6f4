//! Offline round source backed by a fixed set of rounds.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use super::round::{OracleRound, RoundId};
use super::source::RoundSource;
use crate::error::TransportError;

/// On-disk layout of a rounds replay file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundsFile {
    pub decimals: u8,
    pub rounds: Vec<OracleRound>,
}

/// Serves rounds from memory and counts `getRoundData` probes.
pub struct ReplayRoundSource {
    decimals: u8,
    rounds: BTreeMap<RoundId, OracleRound>,
    probes: AtomicU32,
}

impl ReplayRoundSource {
    pub fn new(decimals: u8, rounds: impl IntoIterator<Item = OracleRound>) -> Self {
        Self {
            decimals,
            rounds: rounds.into_iter().map(|r| (r.round_id, r)).collect(),
            probes: AtomicU32::new(0),
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rounds file: {}", path.display()))?;
        let file: RoundsFile = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse rounds file: {}", path.display()))?;
        Ok(Self::new(file.decimals, file.rounds))
    }

    /// Number of `getRoundData` calls served so far.
    pub fn probes(&self) -> u32 {
        self.probes.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }
}

#[async_trait]
impl RoundSource for ReplayRoundSource {
    async fn decimals(&self) -> Result<u8, TransportError> {
        Ok(self.decimals)
    }

    async fn latest_round_data(&self) -> Result<OracleRound, TransportError> {
        self.rounds
            .values()
            .next_back()
            .cloned()
            .ok_or_else(|| TransportError::Rpc {
                method: "latestRoundData".to_string(),
                message: "no rounds in replay set".to_string(),
            })
    }

    async fn get_round_data(&self, round_id: RoundId) -> Result<OracleRound, TransportError> {
        self.probes.fetch_add(1, Ordering::Relaxed);
        self.rounds
            .get(&round_id)
            .cloned()
            .ok_or_else(|| TransportError::Rpc {
                method: "getRoundData".to_string(),
                message: format!("execution reverted: No data present for round {}", round_id),
            })
    }
}
