//! Application configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: `Default` implementations and `set_default` calls
//! 2. **Config file**: TOML file named by the `GATEWAY_CONFIG` env var
//! 3. **Environment variables**: `GATEWAY__SECTION__KEY` overrides single fields
//!
//! # Example
//!
//! ```toml
//! default_chain_id = 1
//!
//! [portal]
//! base_url = "https://portal.example.com/datasets/{dataset}"
//! api_key = "secret"
//! timeout_ms = 10000
//!
//! [[chains]]
//! chain_id = 1
//! dataset = "ethereum-mainnet"
//! ```

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, path::Path, time::Duration};

use crate::portal::ndjson::NdjsonLimits;

/// HTTP server configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port number to listen on. Must be greater than 0. Defaults to `8545`.
    pub bind_port: u16,

    /// Largest accepted JSON-RPC request body. Defaults to 1 MiB.
    #[serde(default = "default_max_request_body_bytes")]
    pub max_request_body_bytes: usize,

    /// Request timeout in seconds. Defaults to `60`.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_max_request_body_bytes() -> usize {
    1024 * 1024
}

fn default_request_timeout_seconds() -> u64 {
    60
}

/// Portal access settings shared by every dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    /// Portal root, or a template containing `{dataset}`.
    pub base_url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,

    /// Per-call timeout, covering the whole response body.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_metadata_ttl_ms")]
    pub metadata_ttl_ms: u64,

    #[serde(default = "default_max_ndjson_line_bytes")]
    pub max_ndjson_line_bytes: usize,

    #[serde(default = "default_max_ndjson_bytes")]
    pub max_ndjson_bytes: usize,

    /// Consecutive failures before the breaker opens. `0` disables the breaker.
    #[serde(default = "default_circuit_breaker_threshold")]
    pub circuit_breaker_threshold: u32,

    #[serde(default = "default_circuit_breaker_reset_ms")]
    pub circuit_breaker_reset_ms: u64,

    /// Resume requests allowed when a stream stops short of `toBlock`.
    #[serde(default = "default_stream_retry_limit")]
    pub stream_retry_limit: u32,

    /// Stream requests allowed while stripping unknown fields.
    #[serde(default = "default_negotiation_attempts")]
    pub negotiation_attempts: u32,
}

fn default_api_key_header() -> String {
    "X-Api-Key".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_metadata_ttl_ms() -> u64 {
    300_000
}

fn default_max_ndjson_line_bytes() -> usize {
    8 * 1024 * 1024
}

fn default_max_ndjson_bytes() -> usize {
    64 * 1024 * 1024
}

fn default_circuit_breaker_threshold() -> u32 {
    5
}

fn default_circuit_breaker_reset_ms() -> u64 {
    30_000
}

fn default_stream_retry_limit() -> u32 {
    3
}

fn default_negotiation_attempts() -> u32 {
    5
}

impl PortalConfig {
    /// Portal settings with every default applied.
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            api_key_header: default_api_key_header(),
            timeout_ms: default_timeout_ms(),
            metadata_ttl_ms: default_metadata_ttl_ms(),
            max_ndjson_line_bytes: default_max_ndjson_line_bytes(),
            max_ndjson_bytes: default_max_ndjson_bytes(),
            circuit_breaker_threshold: default_circuit_breaker_threshold(),
            circuit_breaker_reset_ms: default_circuit_breaker_reset_ms(),
            stream_retry_limit: default_stream_retry_limit(),
            negotiation_attempts: default_negotiation_attempts(),
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    #[must_use]
    pub fn metadata_ttl(&self) -> Duration {
        Duration::from_millis(self.metadata_ttl_ms)
    }

    #[must_use]
    pub fn circuit_breaker_reset(&self) -> Duration {
        Duration::from_millis(self.circuit_breaker_reset_ms)
    }

    #[must_use]
    pub fn ndjson_limits(&self) -> NdjsonLimits {
        NdjsonLimits {
            max_line_bytes: self.max_ndjson_line_bytes,
            max_bytes: self.max_ndjson_bytes,
        }
    }
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self::with_base_url("https://portal.sqd.dev/datasets")
    }
}

/// Maps an EVM chain id to a portal dataset name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub dataset: String,
}

/// Prometheus metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub prometheus_port: Option<u16>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true, prometheus_port: Some(9090) }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). Defaults to `"info"`.
    pub level: String,
    /// Output format: `"json"` or `"pretty"`. Defaults to `"pretty"`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string() }
    }
}

/// Root application configuration.
///
/// Environment overrides use the `GATEWAY` prefix with `__` as the separator, for example
/// `GATEWAY__PORTAL__TIMEOUT_MS=5000`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub portal: PortalConfig,

    #[serde(default)]
    pub chains: Vec<ChainConfig>,

    /// Chain served on `/` when the path carries no chain id.
    #[serde(default)]
    pub default_chain_id: Option<u64>,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            bind_port: 8545,
            max_request_body_bytes: default_max_request_body_bytes(),
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            portal: PortalConfig::default(),
            chains: vec![ChainConfig { chain_id: 1, dataset: "ethereum-mainnet".to_string() }],
            default_chain_id: Some(1),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file with environment variable overrides.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be parsed or the merged values do not
    /// deserialize.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let portal = PortalConfig::default();

        let config_builder = Config::builder()
            .set_default("server.bind_address", default_bind_address())?
            .set_default("server.bind_port", 8545)?
            .set_default("portal.base_url", portal.base_url)?
            .set_default("portal.timeout_ms", portal.timeout_ms)?
            .set_default("portal.circuit_breaker_threshold", portal.circuit_breaker_threshold)?
            .set_default("metrics.enabled", true)?
            .set_default("metrics.prometheus_port", 9090)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("GATEWAY").separator("__").try_parsing(true))
            .build()?;

        config_builder.try_deserialize()
    }

    /// Loads configuration from `config/config.toml`, or the path in `GATEWAY_CONFIG`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration cannot be loaded or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("GATEWAY_CONFIG").unwrap_or_else(|_| "config/config.toml".to_string());
        Self::from_file(&config_path)
    }

    /// Returns the parsed socket address for the HTTP server.
    ///
    /// # Errors
    ///
    /// Returns an error string if the address cannot be parsed.
    pub fn socket_addr(&self) -> Result<std::net::SocketAddr, String> {
        format!("{}:{}", self.server.bind_address, self.server.bind_port)
            .parse()
            .map_err(|_| {
                format!(
                    "Invalid socket address: {}:{}",
                    self.server.bind_address, self.server.bind_port
                )
            })
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_seconds)
    }

    /// Dataset configured for `chain_id`.
    #[must_use]
    pub fn dataset_for(&self, chain_id: u64) -> Option<&str> {
        self.chains.iter().find(|c| c.chain_id == chain_id).map(|c| c.dataset.as_str())
    }

    /// Validates the configuration for correctness and consistency.
    ///
    /// # Errors
    ///
    /// Returns a descriptive error string if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        let base_url = self.portal.base_url.trim();
        if base_url.is_empty() {
            return Err("Portal base URL must not be empty".to_string());
        }
        if !base_url.starts_with("http") {
            return Err(format!("Invalid portal base URL: {base_url}"));
        }

        if self.portal.timeout_ms == 0 {
            return Err("Portal timeout must be greater than 0".to_string());
        }

        if self.portal.metadata_ttl_ms == 0 {
            return Err("Metadata TTL must be greater than 0".to_string());
        }

        if self.portal.max_ndjson_line_bytes == 0 || self.portal.max_ndjson_bytes == 0 {
            return Err("NDJSON limits must be greater than 0".to_string());
        }

        if self.portal.negotiation_attempts == 0 {
            return Err("Negotiation attempts must be greater than 0".to_string());
        }

        if self.portal.api_key_header.trim().is_empty() {
            return Err("API key header name must not be empty".to_string());
        }

        if self.server.bind_port == 0 {
            return Err("Bind port must be greater than 0".to_string());
        }

        if self.server.request_timeout_seconds == 0 {
            return Err("Request timeout must be greater than 0".to_string());
        }

        let mut seen = HashSet::new();
        for chain in &self.chains {
            if !seen.insert(chain.chain_id) {
                return Err(format!("Duplicate chain id: {}", chain.chain_id));
            }
            if chain.dataset.trim().is_empty() {
                return Err(format!("Empty dataset for chain {}", chain.chain_id));
            }
        }

        if let Some(default_chain) = self.default_chain_id {
            if self.dataset_for(default_chain).is_none() {
                return Err(format!("Default chain {default_chain} has no dataset configured"));
            }
        }

        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err("Logging format must be 'json' or 'pretty'".to_string());
        }

        Ok(())
    }
}
