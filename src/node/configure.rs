//! Node home initialization and config patching
//!
//! Both `config.toml` and `app.toml` are edited by rewriting whole lines in
//! place. Files are never regenerated, so anything the daemon wrote at init
//! time survives.

use std::time::Duration;
use tokio::process::Command;

use super::command::run_logged;
use super::statesync::{rewrite_state_sync, select_rpc_endpoint, trust_height, is_key_line};
use super::{Node, NodeError, RpcClient, StateSyncParams};
use crate::config::{StateSyncConfig, StewardConfig};

const MIN_GAS_PRICES_KEY: &str = "minimum-gas-prices";

/// Prepares a node's home directory before first start
#[derive(Debug, Clone)]
pub struct ProcessConfigurator {
    moniker: String,
    rpc: RpcClient,
    trust_offset: u64,
    discovery_time: String,
}

impl ProcessConfigurator {
    pub fn new(steward: &StewardConfig, state_sync: &StateSyncConfig) -> Result<Self, NodeError> {
        Ok(Self {
            moniker: steward.moniker.clone(),
            rpc: RpcClient::new(Duration::from_secs(state_sync.rpc_timeout_secs))?,
            trust_offset: state_sync.trust_offset,
            discovery_time: state_sync.discovery_time.clone(),
        })
    }

    /// Run `<daemon> init <moniker> --home <home> --chain-id <id>`
    ///
    /// Skipped when the home already holds a `config.toml`.
    pub async fn initialize(&self, node: &Node) -> Result<(), NodeError> {
        let config_toml = node.paths.config_toml();
        if config_toml.exists() {
            node.note(format!(
                "Node already initialized at {}",
                node.paths.home.display()
            ));
            return Ok(());
        }

        tokio::fs::create_dir_all(&node.paths.home).await?;
        node.note(format!(
            "Initializing node with chain ID: {}",
            node.descriptor.chain_id
        ));

        let mut cmd = Command::new(&node.paths.binary);
        cmd.arg("init")
            .arg(&self.moniker)
            .arg("--home")
            .arg(&node.paths.home)
            .arg("--chain-id")
            .arg(&node.descriptor.chain_id);

        let output = run_logged(cmd, node.log()).await.map_err(|e| {
            NodeError::Process(format!("failed to run {} init: {}", node.daemon_name(), e))
        })?;
        if !output.success() {
            return Err(NodeError::Process(format!(
                "{} init {}",
                node.daemon_name(),
                output.describe_failure()
            )));
        }

        node.note("Node initialized successfully");
        Ok(())
    }

    /// Set `minimum-gas-prices` in `app.toml`
    ///
    /// The key must already be present; it is never appended.
    pub async fn set_minimum_gas_price(&self, node: &Node, price: &str) -> Result<(), NodeError> {
        let app_toml = node.paths.app_toml();
        let content = tokio::fs::read_to_string(&app_toml).await.map_err(|e| {
            NodeError::Config(format!("failed to read {}: {}", app_toml.display(), e))
        })?;

        let updated = replace_min_gas_prices(&content, price).ok_or_else(|| {
            NodeError::Config(format!(
                "{} not found in {}",
                MIN_GAS_PRICES_KEY,
                app_toml.display()
            ))
        })?;

        tokio::fs::write(&app_toml, updated).await.map_err(|e| {
            NodeError::Config(format!("failed to write {}: {}", app_toml.display(), e))
        })?;
        node.note(format!("Set minimum gas prices to {}", price));
        Ok(())
    }

    /// Point `[statesync]` at a trusted checkpoint from a live RPC endpoint
    pub async fn configure_state_sync(&self, node: &mut Node) -> Result<(), NodeError> {
        let rpc = select_rpc_endpoint(&node.descriptor.apis.rpc)
            .map(str::to_string)
            .ok_or_else(|| {
                NodeError::Network(format!("chain {} lists no RPC endpoints", node.chain_name()))
            })?;
        node.note(format!("Using RPC endpoint: {}", rpc));

        let latest = self.rpc.latest_height(&rpc).await?;
        let height = trust_height(latest, self.trust_offset);
        node.note(format!("Latest height: {}, trust height: {}", latest, height));

        let hash = self.rpc.block_hash(&rpc, height).await?;
        node.note(format!("Trust hash: {}", hash));

        let seed = node
            .descriptor
            .peers
            .seeds
            .first()
            .map(|peer| peer.connection_string());
        let params = StateSyncParams {
            rpc,
            trust_height: height,
            trust_hash: hash,
            seed,
        };

        let config_toml = node.paths.config_toml();
        let content = tokio::fs::read_to_string(&config_toml).await.map_err(|e| {
            NodeError::Config(format!("failed to read {}: {}", config_toml.display(), e))
        })?;
        let updated = rewrite_state_sync(&content, &params, &self.discovery_time)?;
        tokio::fs::write(&config_toml, updated).await.map_err(|e| {
            NodeError::Config(format!("failed to write {}: {}", config_toml.display(), e))
        })?;

        node.note("State sync configured");
        node.state_sync = Some(params);
        Ok(())
    }
}

fn replace_min_gas_prices(content: &str, price: &str) -> Option<String> {
    let mut found = false;
    let lines: Vec<String> = content
        .lines()
        .map(|line| {
            if is_key_line(line.trim_start(), MIN_GAS_PRICES_KEY) {
                found = true;
                format!("{} = \"{}\"", MIN_GAS_PRICES_KEY, price)
            } else {
                line.to_string()
            }
        })
        .collect();

    if !found {
        return None;
    }
    let mut result = lines.join("\n");
    if content.ends_with('\n') {
        result.push('\n');
    }
    Some(result)
}
