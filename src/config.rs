// src/config.rs
//! Runtime settings.
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! `credential-ledger.{toml,json,yaml}` file, then `CREDLEDGER__*`
//! environment variables (`CREDLEDGER__LEDGER__MODE=sandbox`). A `.env`
//! file is loaded into the environment first.

use crate::error::{CredentialError, Result};
use crate::models::Address;
use crate::storage::{RetryPolicy, DEFAULT_GATEWAY};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Account that published the `credential_nft` module on testnet.
pub const DEFAULT_MODULE_ADDRESS: &str = "0x262e014c482dbed31f46796ed1acd3ebe69a8d4572c5177a7774ef9add39d029";
pub const DEFAULT_NODE_URL: &str = "https://fullnode.testnet.aptoslabs.com";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub ledger: LedgerSettings,
    #[serde(default)]
    pub signer: SignerSettings,
    #[serde(default)]
    pub content: ContentSettings,
    #[serde(default)]
    pub index: IndexSettings,
    #[serde(default)]
    pub attempts: AttemptSettings,
    #[serde(default)]
    pub reconciler: ReconcilerSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: SocketAddr,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerMode {
    /// A real node over its REST API, signing through the remote agent.
    Rest,
    /// In-process contract simulation.
    Sandbox,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    pub mode: LedgerMode,
    pub node_url: String,
    pub module_address: String,
    /// Account holding the credential store; the module account when unset.
    pub store_address: Option<String>,
    pub confirmation_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            mode: LedgerMode::Rest,
            node_url: DEFAULT_NODE_URL.to_string(),
            module_address: DEFAULT_MODULE_ADDRESS.to_string(),
            store_address: None,
            confirmation_timeout_secs: 60,
            poll_interval_ms: 1000,
        }
    }
}

impl LedgerSettings {
    pub fn module_address(&self) -> Result<Address> {
        Address::parse(&self.module_address)
    }

    pub fn store_address(&self) -> Result<Address> {
        match &self.store_address {
            Some(store) => Address::parse(store),
            None => self.module_address(),
        }
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SignerSettings {
    /// Wallet bridge endpoint. Required in `rest` mode.
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentProvider {
    Ipfs,
    Pinata,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContentSettings {
    pub provider: ContentProvider,
    /// IPFS HTTP API or Pinata API base URL.
    pub api_url: Option<String>,
    pub pinata_jwt: Option<String>,
    pub gateway: String,
    pub retry: RetryPolicy,
}

impl Default for ContentSettings {
    fn default() -> Self {
        Self {
            provider: ContentProvider::Ipfs,
            api_url: None,
            pinata_jwt: None,
            gateway: DEFAULT_GATEWAY.to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    Postgrest,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub backend: IndexBackend,
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub retry: RetryPolicy,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            backend: IndexBackend::Memory,
            url: None,
            api_key: None,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AttemptSettings {
    /// Directory for attempt records. In-memory when unset.
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconcilerSettings {
    pub enabled: bool,
    /// Seconds between full sweeps; 0 disables the schedule but keeps
    /// on-demand runs.
    pub interval_secs: u64,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
        }
    }
}

impl ReconcilerSettings {
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_secs > 0).then(|| Duration::from_secs(self.interval_secs))
    }
}

impl Settings {
    /// Loads `.env`, the optional settings file, and the environment.
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();
        let config = Config::builder()
            .add_source(File::with_name("credential-ledger").required(false))
            .add_source(
                Environment::with_prefix("CREDLEDGER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(config_error)?;
        Self::from_config(config)
    }

    /// Deserializes and validates an already-built configuration.
    pub fn from_config(config: Config) -> Result<Self> {
        let settings: Settings = config.try_deserialize().map_err(config_error)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.ledger.module_address()?;
        self.ledger.store_address()?;
        if self.ledger.confirmation_timeout_secs == 0 {
            return Err(invalid("ledger.confirmation_timeout_secs must be positive"));
        }
        if self.ledger.mode == LedgerMode::Rest {
            if self.ledger.node_url.trim().is_empty() {
                return Err(invalid("ledger.node_url is required in rest mode"));
            }
            if is_blank(&self.signer.url) {
                return Err(invalid("signer.url is required in rest mode"));
            }
        }
        if self.content.gateway.trim().is_empty() {
            return Err(invalid("content.gateway must not be empty"));
        }
        if self.content.provider == ContentProvider::Pinata && is_blank(&self.content.pinata_jwt) {
            return Err(invalid("content.pinata_jwt is required for the pinata provider"));
        }
        if self.index.backend == IndexBackend::Postgrest && (is_blank(&self.index.url) || is_blank(&self.index.api_key)) {
            return Err(invalid("index.url and index.api_key are required for the postgrest backend"));
        }
        Ok(())
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).map_or(true, str::is_empty)
}

fn invalid(message: &str) -> CredentialError {
    CredentialError::InputValidation(format!("configuration: {message}"))
}

fn config_error(err: config::ConfigError) -> CredentialError {
    CredentialError::InputValidation(format!("configuration: {err}"))
}
