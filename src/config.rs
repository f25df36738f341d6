//! Configuration management for the staking era exporter.
//!
//! Supports built-in network defaults, TOML config files, and environment
//! overrides. The resulting [`ExporterConfig`] is built once at startup and
//! passed by reference into the pipeline.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Hard ceiling on the number of eras a single run may export
pub const MAX_ERAS: u32 = 84;

/// Largest `decimal_places` whose unit fits in a `u128`
pub const MAX_DECIMAL_PLACES: u8 = 38;

/// Rejected user input. Raised before any network interaction.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Chain {0} doesn't exist")]
    UnknownChain(String),

    #[error("Number of eras must be between 1 and {max}, got {requested}")]
    EraCountOutOfRange { requested: u32, max: u32 },
}

/// Main exporter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Networks the exporter knows how to reach
    #[serde(default = "default_chains")]
    pub chains: Vec<ChainConfig>,

    /// Directory CSV reports are written into
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    /// Number of past eras the chain keeps staking history for
    #[serde(default = "default_history_depth")]
    pub history_depth: u32,

    /// Upper bound accepted for `--number`
    #[serde(default = "default_max_eras")]
    pub max_eras: u32,

    /// Validators enriched concurrently within one era
    #[serde(default = "default_max_concurrent_lookups")]
    pub max_concurrent_lookups: usize,
}

/// Per-network connection and display settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainConfig {
    pub name: String,

    /// WebSocket endpoint as published by the network
    pub ws_endpoint: String,

    /// Explicit HTTP JSON-RPC endpoint; derived from `ws_endpoint` when absent
    #[serde(default)]
    pub rpc_url: Option<String>,

    /// Token symbol (e.g. "KSM")
    pub denom: String,

    /// Decimal places of one token unit
    pub decimal_places: u8,

    /// SS58 address prefix used when rendering addresses
    #[serde(default)]
    pub ss58_prefix: u16,
}

impl ChainConfig {
    /// HTTP JSON-RPC endpoint for this network
    pub fn http_endpoint(&self) -> String {
        if let Some(url) = &self.rpc_url {
            return url.clone();
        }
        if let Some(rest) = self.ws_endpoint.strip_prefix("wss://") {
            format!("https://{}", rest)
        } else if let Some(rest) = self.ws_endpoint.strip_prefix("ws://") {
            format!("http://{}", rest)
        } else {
            self.ws_endpoint.clone()
        }
    }

    /// Render a raw balance in whole tokens, e.g. `1.5 KSM`
    pub fn format_balance(&self, amount: u128) -> String {
        let Some(unit) = 10u128.checked_pow(self.decimal_places as u32) else {
            return format!("{} {}", amount, self.denom);
        };
        let whole = amount / unit;
        let fraction = amount % unit;
        if fraction == 0 {
            return format!("{} {}", whole, self.denom);
        }

        let digits = format!("{:0width$}", fraction, width = self.decimal_places as usize);
        format!("{}.{} {}", whole, digits.trim_end_matches('0'), self.denom)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum requests per second
    #[serde(default = "default_rps")]
    pub requests_per_second: u32,

    /// Maximum in-flight HTTP requests
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Batch size for JSON-RPC batch calls
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum retry attempts for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff (ms)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Per-request timeout (s)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rps(),
            max_in_flight: default_max_in_flight(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            chains: default_chains(),
            export_dir: default_export_dir(),
            rate_limits: RateLimitConfig::default(),
            history_depth: default_history_depth(),
            max_eras: default_max_eras(),
            max_concurrent_lookups: default_max_concurrent_lookups(),
        }
    }
}

// Default value functions
fn default_chains() -> Vec<ChainConfig> {
    vec![
        ChainConfig {
            name: "kusama".to_string(),
            ws_endpoint: "wss://kusama-rpc.polkadot.io".to_string(),
            rpc_url: None,
            denom: "KSM".to_string(),
            decimal_places: 12,
            ss58_prefix: 2,
        },
        ChainConfig {
            name: "polkadot".to_string(),
            ws_endpoint: "wss://rpc.polkadot.io".to_string(),
            rpc_url: None,
            denom: "DOT".to_string(),
            decimal_places: 10,
            ss58_prefix: 0,
        },
    ]
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("export")
}

fn default_history_depth() -> u32 {
    84
}

fn default_max_eras() -> u32 {
    MAX_ERAS
}

fn default_max_concurrent_lookups() -> usize {
    64
}

fn default_rps() -> u32 {
    50 // Public endpoints throttle aggressively
}

fn default_max_in_flight() -> usize {
    32
}

fn default_batch_size() -> usize {
    100
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl ExporterConfig {
    /// Load built-in defaults with environment overrides
    pub fn load() -> Self {
        dotenvy::dotenv().ok();

        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Load from a TOML config file with environment overrides
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let contents = std::fs::read_to_string(path)?;
        let mut config: Self = ::toml::from_str(&contents)?;

        // Environment variables override file settings
        config.apply_env_overrides();

        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("STAKING_EXPORT_DIR") {
            self.export_dir = PathBuf::from(dir);
        }
        for chain in &mut self.chains {
            let var = format!("{}_RPC_URL", chain.name.to_uppercase());
            if let Ok(url) = std::env::var(&var) {
                chain.rpc_url = Some(url);
            }
        }
    }

    /// Look up a configured network by name
    pub fn find_chain(&self, name: &str) -> Result<&ChainConfig, ValidationError> {
        self.chains
            .iter()
            .find(|chain| chain.name == name)
            .ok_or_else(|| ValidationError::UnknownChain(name.to_string()))
    }

    /// Validate cross-field settings
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chains.is_empty() {
            anyhow::bail!("at least one chain must be configured");
        }
        if self.max_eras == 0 || self.max_eras > MAX_ERAS {
            anyhow::bail!("max_eras must be between 1 and {}", MAX_ERAS);
        }
        if self.max_concurrent_lookups == 0 {
            anyhow::bail!("max_concurrent_lookups must be > 0");
        }
        for chain in &self.chains {
            if chain.decimal_places > MAX_DECIMAL_PLACES {
                anyhow::bail!(
                    "chain {}: decimal_places must be at most {}",
                    chain.name,
                    MAX_DECIMAL_PLACES
                );
            }
        }
        Ok(())
    }
}
