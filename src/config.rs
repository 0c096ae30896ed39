//! Steward configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::acquire::Toolchain;
use crate::logs::{DEFAULT_MAX_CHARS, DEFAULT_RETAIN_CHARS};
use crate::node::STOP_GRACE_PERIOD;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub steward: StewardConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub build: Toolchain,
    #[serde(default)]
    pub state_sync: StateSyncConfig,
    #[serde(default)]
    pub gas: GasConfig,
    #[serde(default)]
    pub logs: LogConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },
}

impl Config {
    /// Load from a TOML file, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StewardConfig {
    /// Root for binaries, sources and node homes
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Root of the chain-registry checkout
    #[serde(default = "default_registry_path")]
    pub registry_path: PathBuf,

    /// Moniker passed to `<daemon> init`
    #[serde(default = "default_moniker")]
    pub moniker: String,

    /// Load chains found under `testnets/`
    #[serde(default)]
    pub include_testnets: bool,
}

impl Default for StewardConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            registry_path: default_registry_path(),
            moniker: default_moniker(),
            include_testnets: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Grace window between the interrupt signal and a forced kill
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,

    /// Reaper tick
    #[serde(default = "default_reap_interval")]
    pub reap_interval_secs: u64,
}

impl SupervisorConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs.max(1))
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stop_grace_secs: default_stop_grace(),
            reap_interval_secs: default_reap_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSyncConfig {
    /// Blocks between the latest height and the trust height
    #[serde(default = "default_trust_offset")]
    pub trust_offset: u64,

    /// Value written to `discovery_time`
    #[serde(default = "default_discovery_time")]
    pub discovery_time: String,

    /// Timeout for each RPC query
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,
}

impl Default for StateSyncConfig {
    fn default() -> Self {
        Self {
            trust_offset: default_trust_offset(),
            discovery_time: default_discovery_time(),
            rpc_timeout_secs: default_rpc_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasConfig {
    /// Used when a chain lists no fee tokens
    #[serde(default = "default_min_gas_price")]
    pub default_minimum_gas_price: String,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            default_minimum_gas_price: default_min_gas_price(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,

    #[serde(default = "default_retain_chars")]
    pub retain_chars: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            retain_chars: default_retain_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            http_port: default_http_port(),
        }
    }
}

// Defaults
fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".chain-steward")
}
fn default_registry_path() -> PathBuf { PathBuf::from(".") }
fn default_moniker() -> String { "chain-steward".to_string() }
fn default_stop_grace() -> u64 { STOP_GRACE_PERIOD.as_secs() }
fn default_reap_interval() -> u64 { 1 }
fn default_trust_offset() -> u64 { 2000 }
fn default_discovery_time() -> String { "30s".to_string() }
fn default_rpc_timeout() -> u64 { 30 }
fn default_min_gas_price() -> String { "0.0025stake".to_string() }
fn default_max_chars() -> usize { DEFAULT_MAX_CHARS }
fn default_retain_chars() -> usize { DEFAULT_RETAIN_CHARS }
fn default_true() -> bool { true }
fn default_http_port() -> u16 { 8080 }
