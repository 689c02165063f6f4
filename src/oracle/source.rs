//! Price feed access
//!
//! [`RoundSource`] is the oracle read interface the resolver depends on.
//! [`ChainlinkRoundSource`] speaks AggregatorV3Interface over `eth_call`.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::round::{OracleRound, RoundId};
use crate::abi::{self, AbiReader};
use crate::error::TransportError;
use crate::rpc::JsonRpcClient;

/// `decimals()`
const DECIMALS_SELECTOR: [u8; 4] = [0x31, 0x3c, 0xe5, 0x67];
/// `latestRoundData()`
const LATEST_ROUND_DATA_SELECTOR: [u8; 4] = [0xfe, 0xaf, 0x96, 0x8c];
/// `getRoundData(uint80)`
const GET_ROUND_DATA_SELECTOR: [u8; 4] = [0x9a, 0x6f, 0xc8, 0xf5];

/// Read side of a price feed. One remote read per call.
#[async_trait]
pub trait RoundSource: Send + Sync {
    async fn decimals(&self) -> Result<u8, TransportError>;
    async fn latest_round_data(&self) -> Result<OracleRound, TransportError>;
    async fn get_round_data(&self, round_id: RoundId) -> Result<OracleRound, TransportError>;
}

/// Chainlink aggregator proxy reached through a JSON-RPC node.
pub struct ChainlinkRoundSource {
    rpc: Arc<JsonRpcClient>,
    feed_address: String,
}

impl ChainlinkRoundSource {
    pub fn new(rpc: Arc<JsonRpcClient>, feed_address: impl Into<String>) -> Self {
        Self {
            rpc,
            feed_address: feed_address.into(),
        }
    }

    pub fn feed_address(&self) -> &str {
        &self.feed_address
    }
}

#[async_trait]
impl RoundSource for ChainlinkRoundSource {
    async fn decimals(&self) -> Result<u8, TransportError> {
        let bytes = self
            .rpc
            .eth_call(&self.feed_address, &abi::encode_call(DECIMALS_SELECTOR, &[]))
            .await?;
        let value = AbiReader::new(&bytes)
            .uint_u64(0)
            .map_err(|e| decode_err("decimals", e))?;
        u8::try_from(value).map_err(|_| decode_err("decimals", format!("{} exceeds uint8", value)))
    }

    async fn latest_round_data(&self) -> Result<OracleRound, TransportError> {
        let bytes = self
            .rpc
            .eth_call(
                &self.feed_address,
                &abi::encode_call(LATEST_ROUND_DATA_SELECTOR, &[]),
            )
            .await?;
        decode_round_data(&bytes).map_err(|e| decode_err("latestRoundData", e))
    }

    async fn get_round_data(&self, round_id: RoundId) -> Result<OracleRound, TransportError> {
        let call = abi::encode_call(GET_ROUND_DATA_SELECTOR, &[abi::encode_u128(round_id.0)]);
        let bytes = self.rpc.eth_call(&self.feed_address, &call).await?;
        let round = decode_round_data(&bytes).map_err(|e| decode_err("getRoundData", e))?;

        if round.round_id != round_id {
            return Err(decode_err(
                "getRoundData",
                format!("round id mismatch: requested {} got {}", round_id, round.round_id),
            ));
        }

        debug!(round_id = %round_id, updated_at = round.updated_at, "Fetched historical round");
        Ok(round)
    }
}

/// Decode `(roundId, answer, startedAt, updatedAt, answeredInRound)`.
pub fn decode_round_data(bytes: &[u8]) -> Result<OracleRound, String> {
    let r = AbiReader::new(bytes);
    if r.word_count() < 5 {
        return Err(format!("response too short: {} bytes, expected 160", bytes.len()));
    }
    Ok(OracleRound {
        round_id: RoundId(r.uint_u128(0)?),
        answer: r.int_i128(1)?,
        started_at: r.uint_u64(2)?,
        updated_at: r.uint_u64(3)?,
        answered_in_round: r.uint_u128(4)?,
    })
}

fn decode_err(method: &str, message: impl Into<String>) -> TransportError {
    TransportError::Decode {
        method: method.to_string(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selectors_match_signatures() {
        assert_eq!(DECIMALS_SELECTOR, abi::selector("decimals()"));
        assert_eq!(LATEST_ROUND_DATA_SELECTOR, abi::selector("latestRoundData()"));
        assert_eq!(GET_ROUND_DATA_SELECTOR, abi::selector("getRoundData(uint80)"));
    }

    #[test]
    fn test_decode_round_data() {
        let round_id = RoundId::from_parts(2, 77);
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&abi::encode_u128(round_id.0));
        bytes.extend_from_slice(&abi::encode_u128(185_012_345_678));
        bytes.extend_from_slice(&abi::encode_u128(1_700_000_000));
        bytes.extend_from_slice(&abi::encode_u128(1_700_000_012));
        bytes.extend_from_slice(&abi::encode_u128(round_id.0));

        let round = decode_round_data(&bytes).unwrap();
        assert_eq!(round.round_id, round_id);
        assert_eq!(round.answer, 185_012_345_678);
        assert_eq!(round.started_at, 1_700_000_000);
        assert_eq!(round.updated_at, 1_700_000_012);
        assert!(!round.is_stale());
    }

    #[test]
    fn test_decode_round_data_too_short() {
        assert!(decode_round_data(&[0u8; 64]).is_err());
    }
}
