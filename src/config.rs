//! Environment-driven configuration.

use anyhow::{anyhow, Context, Result};
use std::str::FromStr;
use std::time::Duration;

use crate::ingest::RpcLogSourceConfig;
use crate::oracle::SearchStrategy;
use crate::rpc::RpcConfig;

/// Sepolia ETH/USD aggregator proxy.
pub const DEFAULT_ORACLE_FEED: &str = "0x694AA1769357215DE4FAC081bf1f309aDC325306";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexerConfig {
    pub rpc_url: Option<String>,
    pub contract_address: Option<String>,
    /// Lower bound for historical replay.
    pub deploy_block: u64,
    pub oracle_feed_address: String,
    pub poll_interval: Duration,
    pub log_block_range: u64,
    pub rpc_retries: u32,
    pub rpc_retry_delay: Duration,
    pub search_strategy: SearchStrategy,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            rpc_url: None,
            contract_address: None,
            deploy_block: 0,
            oracle_feed_address: DEFAULT_ORACLE_FEED.to_string(),
            poll_interval: Duration::from_millis(4000),
            log_block_range: 5000,
            rpc_retries: 3,
            rpc_retry_delay: Duration::from_millis(500),
            search_strategy: SearchStrategy::Binary,
        }
    }
}

impl IndexerConfig {
    /// Read the process environment. Call after `.env` files are loaded.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset and empty values keep their defaults.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut cfg = Self::default();

        cfg.rpc_url = var("DUEL_RPC_URL").or_else(|| var("RPC_URL"));
        cfg.contract_address = var("DUEL_CONTRACT_ADDRESS");

        if let Some(v) = var("DUEL_DEPLOY_BLOCK").or_else(|| var("NEXT_PUBLIC_DEPLOY_BLOCK")) {
            cfg.deploy_block = parse("DUEL_DEPLOY_BLOCK", &v)?;
        }
        if let Some(v) = var("ORACLE_FEED_ADDRESS") {
            cfg.oracle_feed_address = v;
        }
        if let Some(v) = var("DUEL_POLL_INTERVAL_MS") {
            cfg.poll_interval = Duration::from_millis(parse("DUEL_POLL_INTERVAL_MS", &v)?);
        }
        if let Some(v) = var("DUEL_LOG_BLOCK_RANGE") {
            let range: u64 = parse("DUEL_LOG_BLOCK_RANGE", &v)?;
            if range == 0 {
                return Err(anyhow!("DUEL_LOG_BLOCK_RANGE must be positive"));
            }
            cfg.log_block_range = range;
        }
        if let Some(v) = var("DUEL_RPC_RETRIES") {
            cfg.rpc_retries = parse("DUEL_RPC_RETRIES", &v)?;
        }
        if let Some(v) = var("DUEL_RPC_RETRY_DELAY_MS") {
            cfg.rpc_retry_delay = Duration::from_millis(parse("DUEL_RPC_RETRY_DELAY_MS", &v)?);
        }
        if let Some(v) = var("ORACLE_SEARCH") {
            cfg.search_strategy = v.parse().map_err(|e: String| anyhow!("ORACLE_SEARCH: {}", e))?;
        }

        Ok(cfg)
    }

    pub fn require_rpc_url(&self) -> Result<&str> {
        self.rpc_url
            .as_deref()
            .context("No RPC endpoint configured (set DUEL_RPC_URL or pass --rpc-url)")
    }

    pub fn require_contract(&self) -> Result<&str> {
        self.contract_address
            .as_deref()
            .context("No contract address configured (set DUEL_CONTRACT_ADDRESS or pass --contract)")
    }

    pub fn rpc_config(&self) -> Result<RpcConfig> {
        let mut rpc = RpcConfig::new(self.require_rpc_url()?);
        rpc.max_retries = self.rpc_retries;
        rpc.retry_delay = self.rpc_retry_delay;
        Ok(rpc)
    }

    pub fn log_source_config(&self) -> Result<RpcLogSourceConfig> {
        let mut source = RpcLogSourceConfig::new(self.require_contract()?);
        source.block_range = self.log_block_range;
        source.poll_interval = self.poll_interval;
        Ok(source)
    }
}

fn parse<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse::<T>()
        .with_context(|| format!("Invalid value for {}: {:?}", key, raw))
}
