use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use crate::feed::ColdStart;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing required env var: {0}")]
    MissingEnv(String),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// JSON-RPC HTTP endpoint - overridden by env MINTWATCH_RPC_URL
    #[serde(default)]
    pub rpc_url: String,
    /// Chain id stamped into every transaction.
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    /// Sending key - loaded from env MINTWATCH_PRIVATE_KEY only
    #[serde(skip)]
    pub private_key: String,
    /// Destination of each transaction. Empty = the sending account itself.
    #[serde(default)]
    pub recipient: String,
    /// Hex calldata carried by each transaction.
    #[serde(default)]
    pub payload: String,
    /// Value attached to each transaction, in wei.
    #[serde(default)]
    pub value_wei: u64,
    /// Percentage applied to the node-reported gas price (100 = unchanged).
    #[serde(default = "default_gas_price_multiplier")]
    pub gas_price_multiplier_pct: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Transactions per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pause between batches in milliseconds.
    #[serde(default = "default_batch_interval_ms")]
    pub batch_interval_ms: u64,
    /// Upper bound of the pause after consecutive fully-failed batches.
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    /// Stop after this many batches. None = run until shutdown.
    #[serde(default)]
    pub max_batches: Option<u64>,
    #[serde(default = "default_receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,
    #[serde(default = "default_receipt_poll_ms")]
    pub receipt_poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_feed_url")]
    pub url: String,
    #[serde(default = "default_ticker")]
    pub ticker: String,
    /// Activity category selector sent as `type`.
    #[serde(default = "default_activity_type")]
    pub activity_type: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub cold_start: ColdStart,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_chain_id() -> u64 {
    1088
}
fn default_gas_price_multiplier() -> u64 {
    100
}
fn default_batch_size() -> usize {
    3
}
fn default_batch_interval_ms() -> u64 {
    2_000
}
fn default_max_backoff_secs() -> u64 {
    60
}
fn default_receipt_timeout_secs() -> u64 {
    120
}
fn default_receipt_poll_ms() -> u64 {
    1_000
}
fn default_feed_url() -> String {
    "https://www.okx.com/priapi/v1/nft/brc/detail/activity".to_string()
}
fn default_ticker() -> String {
    "Dovi".to_string()
}
fn default_activity_type() -> u32 {
    21
}
fn default_page_size() -> u32 {
    20
}
fn default_poll_interval_secs() -> u64 {
    60
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: String::new(),
            chain_id: default_chain_id(),
            private_key: String::new(),
            recipient: String::new(),
            payload: String::new(),
            value_wei: 0,
            gas_price_multiplier_pct: default_gas_price_multiplier(),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            batch_size: default_batch_size(),
            batch_interval_ms: default_batch_interval_ms(),
            max_backoff_secs: default_max_backoff_secs(),
            max_batches: None,
            receipt_timeout_secs: default_receipt_timeout_secs(),
            receipt_poll_interval_ms: default_receipt_poll_ms(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: default_feed_url(),
            ticker: default_ticker(),
            activity_type: default_activity_type(),
            page_size: default_page_size(),
            poll_interval_secs: default_poll_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            cold_start: ColdStart::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Load config from a TOML file, then overlay environment variables for secrets.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&contents)?;
        config.overlay_env();
        Ok(config)
    }

    /// Load a default config with env-only secrets (no file needed).
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.overlay_env();
        config
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    // Secrets never come from the config file.
    fn overlay_env(&mut self) {
        if let Ok(key) = std::env::var("MINTWATCH_PRIVATE_KEY") {
            self.chain.private_key = key;
        }
        if let Ok(url) = std::env::var("MINTWATCH_RPC_URL") {
            self.chain.rpc_url = url;
        }
    }

    /// Checks the settings the dispatcher cannot start without.
    pub fn validate_dispatcher(&self) -> Result<(), ConfigError> {
        if self.chain.private_key.is_empty() {
            return Err(ConfigError::MissingEnv("MINTWATCH_PRIVATE_KEY".to_string()));
        }
        if self.chain.rpc_url.is_empty() {
            return Err(ConfigError::MissingEnv("MINTWATCH_RPC_URL".to_string()));
        }
        if self.dispatcher.batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "dispatcher.batch_size",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
