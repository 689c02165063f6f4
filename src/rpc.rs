//! Ethereum JSON-RPC transport
//!
//! The only place that retries. Everything above this layer treats a call as a
//! single operation that either returns or fails with a [`TransportError`].

use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use crate::abi;
use crate::error::TransportError;

/// Upper bound for a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// HTTP endpoint of the node.
    pub endpoint: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Extra attempts after the first failure.
    pub max_retries: u32,
    /// First backoff delay; doubles per attempt.
    pub retry_delay: Duration,
}

impl RpcConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// Response envelope from a JSON-RPC node
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<Value>,
}

/// A log entry as returned by `eth_getLogs`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: Option<String>,
    pub log_index: Option<String>,
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub removed: bool,
}

pub struct JsonRpcClient {
    client: reqwest::Client,
    config: RpcConfig,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(config: RpcConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TransportError::Http {
                method: "client_init".to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            config,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    /// Issue a call, retrying transient failures with exponential backoff.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let mut attempt = 0u32;
        loop {
            match self.request_once(method, &params).await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = backoff_delay(self.config.retry_delay, attempt);
                    warn!(
                        method,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "RPC call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn request_once(&self, method: &str, params: &Value) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id
        });

        let http_err = |e: reqwest::Error| TransportError::Http {
            method: method.to_string(),
            message: e.to_string(),
        };

        let response: JsonRpcResponse = self
            .client
            .post(&self.config.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(http_err)?
            .error_for_status()
            .map_err(http_err)?
            .json()
            .await
            .map_err(http_err)?;

        if let Some(err) = response.error {
            return Err(TransportError::Rpc {
                method: method.to_string(),
                message: err.to_string(),
            });
        }

        debug!(method, id, "RPC call ok");
        response.result.ok_or_else(|| TransportError::Decode {
            method: method.to_string(),
            message: "no result in RPC response".to_string(),
        })
    }

    /// `eth_call` against the latest block, returning raw return data.
    pub async fn eth_call(&self, to: &str, data: &[u8]) -> Result<Vec<u8>, TransportError> {
        let params = serde_json::json!([
            { "to": to, "data": format!("0x{}", hex::encode(data)) },
            "latest"
        ]);
        let result = self.request("eth_call", params).await?;
        let hex_str = result.as_str().ok_or_else(|| decode_err("eth_call", "result is not a string"))?;
        abi::decode_hex(hex_str).map_err(|e| decode_err("eth_call", &e))
    }

    pub async fn block_number(&self) -> Result<u64, TransportError> {
        let result = self.request("eth_blockNumber", serde_json::json!([])).await?;
        let hex_str = result
            .as_str()
            .ok_or_else(|| decode_err("eth_blockNumber", "result is not a string"))?;
        abi::parse_quantity(hex_str).map_err(|e| decode_err("eth_blockNumber", &e))
    }

    /// `eth_getLogs` for one contract and one topic0 over an inclusive block range.
    pub async fn get_logs(
        &self,
        address: &str,
        topic0: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, TransportError> {
        let params = serde_json::json!([{
            "address": address,
            "topics": [topic0],
            "fromBlock": abi::encode_quantity(from_block),
            "toBlock": abi::encode_quantity(to_block)
        }]);
        let result = self.request("eth_getLogs", params).await?;
        serde_json::from_value(result).map_err(|e| decode_err("eth_getLogs", &e.to_string()))
    }
}

fn decode_err(method: &str, message: &str) -> TransportError {
    TransportError::Decode {
        method: method.to_string(),
        message: message.to_string(),
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.min(16)).min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(4000));
        assert_eq!(backoff_delay(base, 10), MAX_BACKOFF);
    }

    #[test]
    fn test_raw_log_deserializes_node_shape() {
        let json = serde_json::json!({
            "address": "0x5fbdb2315678afecb367f032d93f642f64180aa3",
            "topics": ["0x01"],
            "data": "0x",
            "blockNumber": "0x10",
            "logIndex": "0x2",
            "transactionHash": "0xdead",
            "blockHash": "0xbeef"
        });
        let log: RawLog = serde_json::from_value(json).unwrap();
        assert_eq!(log.block_number.as_deref(), Some("0x10"));
        assert!(!log.removed);
    }
}
