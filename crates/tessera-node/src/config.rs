//! Node configuration.
//!
//! Values come from three layers, later ones winning: built-in defaults, an
//! optional YAML file, and `TESSERA_*` environment variables. Nested keys use a
//! double underscore, e.g. `TESSERA_API__LISTEN_ADDR=0.0.0.0:8000`.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tessera_consensus::{ReconnectPolicy, RemoteBridgeConfig, SocketProxyConfig, SoloConfig};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The sources could not be read or merged.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A value is out of range or inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// The configuration could not be rendered.
    #[error("failed to render configuration: {0}")]
    Render(#[from] serde_yaml::Error),
}

/// Configuration for a Tessera node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Directory holding the key file and the peers file.
    pub data_dir: PathBuf,
    /// Logging settings.
    pub log: LogConfig,
    /// HTTP API settings.
    pub api: ApiConfig,
    /// State executor settings.
    pub state: StateConfig,
    /// Key and peer files.
    pub identity: IdentityConfig,
    /// Solo ordering service settings.
    pub solo: SoloSection,
    /// Application side of the remote topology.
    pub remote: RemoteSection,
    /// Ordering service side of the remote topology.
    pub sequencer: SequencerSection,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            log: LogConfig::default(),
            api: ApiConfig::default(),
            state: StateConfig::default(),
            identity: IdentityConfig::default(),
            solo: SoloSection::default(),
            remote: RemoteSection::default(),
            sequencer: SequencerSection::default(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level for `tessera` targets (trace, debug, info, warn, error).
    pub level: String,
    /// `pretty` or `json`.
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// HTTP API settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Listen address.
    pub listen_addr: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
        }
    }
}

/// State executor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Genesis document; an empty genesis is used when unset.
    pub genesis_file: Option<PathBuf>,
    /// Committed blocks whose records and receipts are kept for queries.
    pub history_limit: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            genesis_file: None,
            history_limit: tessera_state::DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// Key and peer files. Unset paths resolve inside `data_dir`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Hex-encoded Ed25519 seed.
    pub key_file: Option<PathBuf>,
    /// JSON peer list.
    pub peers_file: Option<PathBuf>,
}

/// Solo ordering service settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoloSection {
    /// Milliseconds between block cuts.
    pub block_interval_ms: u64,
    /// Maximum transactions per block.
    pub max_txs_per_block: usize,
}

impl Default for SoloSection {
    fn default() -> Self {
        Self {
            block_interval_ms: 500,
            max_txs_per_block: 1000,
        }
    }
}

/// Application side of the remote topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSection {
    /// Address of the sequencer's proxy listener.
    pub engine_addr: String,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Frame write timeout in milliseconds.
    pub write_timeout_ms: u64,
    /// Give up after this many failed connection attempts; unset retries forever.
    pub reconnect_max_attempts: Option<u32>,
    /// Delay after the first failed attempt, in milliseconds.
    pub reconnect_initial_delay_ms: u64,
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            engine_addr: "127.0.0.1:1338".to_string(),
            connect_timeout_ms: 1000,
            write_timeout_ms: 1000,
            reconnect_max_attempts: None,
            reconnect_initial_delay_ms: 100,
        }
    }
}

/// Ordering service side of the remote topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerSection {
    /// Address the proxy listens on for the application.
    pub listen_addr: String,
    /// How long to wait for the application to answer, in milliseconds.
    pub request_timeout_ms: u64,
    /// Height the application is at when the sequencer starts.
    pub initial_height: u64,
}

impl Default for SequencerSection {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:1338".to_string(),
            request_timeout_ms: 30_000,
            initial_height: 0,
        }
    }
}

impl NodeConfig {
    /// Loads the configuration from `path` (if it exists) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let config: NodeConfig = builder
            .add_source(
                config::Environment::with_prefix("TESSERA")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Checks values that would otherwise fail later, after tasks are spawned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.solo.block_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "solo.block_interval_ms must be positive".into(),
            ));
        }
        if self.solo.max_txs_per_block == 0 {
            return Err(ConfigError::Invalid(
                "solo.max_txs_per_block must be positive".into(),
            ));
        }
        if self.state.history_limit == 0 {
            return Err(ConfigError::Invalid(
                "state.history_limit must be positive".into(),
            ));
        }
        for (name, value) in [
            ("remote.connect_timeout_ms", self.remote.connect_timeout_ms),
            ("remote.write_timeout_ms", self.remote.write_timeout_ms),
            ("sequencer.request_timeout_ms", self.sequencer.request_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        if self.remote.engine_addr.is_empty() {
            return Err(ConfigError::Invalid("remote.engine_addr is empty".into()));
        }
        if self.sequencer.listen_addr.is_empty() {
            return Err(ConfigError::Invalid("sequencer.listen_addr is empty".into()));
        }
        if !matches!(self.log.format.to_lowercase().as_str(), "pretty" | "json") {
            return Err(ConfigError::Invalid(format!(
                "log.format must be pretty or json, got {}",
                self.log.format
            )));
        }
        Ok(())
    }

    /// Renders the effective configuration as YAML.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Path of the key file.
    pub fn key_file(&self) -> PathBuf {
        self.identity
            .key_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("priv_key"))
    }

    /// Path of the peers file.
    pub fn peers_file(&self) -> PathBuf {
        self.identity
            .peers_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("peers.json"))
    }

    /// Solo engine configuration.
    pub fn solo_config(&self) -> SoloConfig {
        SoloConfig {
            block_interval: Duration::from_millis(self.solo.block_interval_ms),
            max_txs_per_block: self.solo.max_txs_per_block,
        }
    }

    /// Remote bridge configuration.
    pub fn remote_bridge_config(&self) -> RemoteBridgeConfig {
        RemoteBridgeConfig {
            engine_addr: self.remote.engine_addr.clone(),
            connect_timeout: Duration::from_millis(self.remote.connect_timeout_ms),
            write_timeout: Duration::from_millis(self.remote.write_timeout_ms),
            reconnect: ReconnectPolicy {
                max_attempts: self.remote.reconnect_max_attempts,
                initial_delay: Duration::from_millis(self.remote.reconnect_initial_delay_ms),
                ..ReconnectPolicy::default()
            },
        }
    }

    /// Socket proxy configuration.
    pub fn socket_proxy_config(&self) -> SocketProxyConfig {
        SocketProxyConfig {
            request_timeout: Duration::from_millis(self.sequencer.request_timeout_ms),
            initial_height: self.sequencer.initial_height,
        }
    }
}
