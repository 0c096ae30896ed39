//! Chain catalog
//!
//! Chain descriptors come from a chain-registry checkout: one `chain.json`
//! per chain, mainnets at `<root>/<chain>/chain.json` and testnets at
//! `<root>/testnets/<chain>/chain.json`. Descriptors are immutable once loaded
//! and handed out as `Arc<ChainDescriptor>`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// SDK version assumed when a descriptor does not say
const ASSUMED_SDK_VERSION: &str = "0.46.0";

/// A chain's `chain.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainDescriptor {
    pub chain_name: String,
    pub status: String,
    pub network_type: String,
    pub pretty_name: String,
    pub chain_id: String,
    pub daemon_name: String,
    pub node_home: String,
    pub codebase: Codebase,
    pub peers: Peers,
    pub apis: Apis,
    pub fees: Fees,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Codebase {
    pub git_repo: String,
    pub recommended_version: String,
    pub compatible_versions: Vec<String>,
    /// Precompiled binaries keyed by `<os>/<arch>`
    pub binaries: BTreeMap<String, String>,
    pub sdk: Option<SdkInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Peers {
    pub seeds: Vec<Peer>,
    pub persistent_peers: Vec<Peer>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Peer {
    pub id: String,
    pub address: String,
    pub provider: Option<String>,
}

impl Peer {
    /// `<id>@<address>`, or the bare address when no id is recorded
    pub fn connection_string(&self) -> String {
        if self.id.is_empty() {
            self.address.clone()
        } else {
            format!("{}@{}", self.id, self.address)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Apis {
    pub rpc: Vec<Endpoint>,
    pub rest: Vec<Endpoint>,
    pub grpc: Vec<Endpoint>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoint {
    pub address: String,
    pub provider: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Fees {
    pub fee_tokens: Vec<FeeToken>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeToken {
    pub denom: String,
    pub fixed_min_gas_price: Option<f64>,
    pub low_gas_price: Option<f64>,
    pub average_gas_price: Option<f64>,
}

impl ChainDescriptor {
    /// Pretty name, or the chain name when none is set
    pub fn display_name(&self) -> &str {
        if self.pretty_name.is_empty() {
            &self.chain_name
        } else {
            &self.pretty_name
        }
    }

    pub fn is_live_mainnet(&self) -> bool {
        self.status == "live" && self.network_type == "mainnet"
    }

    /// Precompiled binary URL for a `<os>/<arch>` platform key
    pub fn binary_url(&self, platform: &str) -> Option<&str> {
        self.codebase
            .binaries
            .get(platform)
            .map(String::as_str)
            .filter(|url| !url.is_empty())
    }

    /// Cosmos SDK version the chain is built against
    pub fn sdk_version(&self) -> String {
        if let Some(version) = self.codebase.sdk.as_ref().and_then(|sdk| sdk.version.clone()) {
            return version;
        }

        self.codebase
            .compatible_versions
            .iter()
            .find(|v| v.contains("sdk"))
            .cloned()
            .unwrap_or_else(|| ASSUMED_SDK_VERSION.to_string())
    }

    /// Chains on SDK 0.45 or newer refuse to start without a minimum gas price
    pub fn needs_minimum_gas_price(&self) -> bool {
        let (major, minor) = parse_major_minor(&self.sdk_version());
        major >= 1 || minor >= 45
    }

    /// Minimum gas price derived from the first fee token, e.g. `0.0025uatom`
    pub fn minimum_gas_price(&self) -> Option<String> {
        let token = self.fees.fee_tokens.first()?;
        if token.denom.is_empty() {
            return None;
        }
        let price = token
            .low_gas_price
            .or(token.average_gas_price)
            .or(token.fixed_min_gas_price)?;
        Some(format!("{}{}", price, token.denom))
    }
}

/// Parse `v0.47.3`, `0.50`, or `sdk-v0.45.1` into `(major, minor)`
fn parse_major_minor(version: &str) -> (u32, u32) {
    let digits = version
        .find(|c: char| c.is_ascii_digit())
        .map(|start| &version[start..])
        .unwrap_or("");
    let mut parts = digits.split('.');
    let number = |part: Option<&str>| -> u32 {
        part.map(|p| p.chars().take_while(char::is_ascii_digit).collect::<String>())
            .and_then(|p| p.parse().ok())
            .unwrap_or(0)
    };
    let major = number(parts.next());
    let minor = number(parts.next());
    (major, minor)
}

/// Source of chain descriptors
pub trait ChainCatalog: Send + Sync {
    /// Look up a chain by its registry name
    fn chain(&self, name: &str) -> Option<Arc<ChainDescriptor>>;

    /// Every known chain
    fn chains(&self) -> Vec<Arc<ChainDescriptor>>;

    /// Live mainnets, sorted by name
    fn live_mainnets(&self) -> Vec<Arc<ChainDescriptor>> {
        let mut chains: Vec<_> = self
            .chains()
            .into_iter()
            .filter(|c| c.is_live_mainnet())
            .collect();
        chains.sort_by(|a, b| a.chain_name.cmp(&b.chain_name));
        chains
    }

    fn by_pretty_name(&self, pretty_name: &str) -> Option<Arc<ChainDescriptor>> {
        self.chains()
            .into_iter()
            .find(|c| c.pretty_name == pretty_name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("registry path {0} does not exist")]
    Missing(String),

    #[error("failed to walk registry path: {0}")]
    Walk(String),
}

/// Catalog backed by a chain-registry directory tree
#[derive(Debug, Default)]
pub struct RegistryCatalog {
    chains: BTreeMap<String, Arc<ChainDescriptor>>,
}

impl RegistryCatalog {
    /// Build a catalog from already-decoded descriptors
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = ChainDescriptor>) -> Self {
        let chains = descriptors
            .into_iter()
            .map(|d| (d.chain_name.clone(), Arc::new(d)))
            .collect();
        Self { chains }
    }

    /// Walk `root` and decode every `chain.json`
    ///
    /// Files that fail to parse are logged and skipped.
    pub fn load(root: &Path, include_testnets: bool) -> Result<Self, CatalogError> {
        if !root.exists() {
            return Err(CatalogError::Missing(root.display().to_string()));
        }

        let mut chains = BTreeMap::new();
        let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
            entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with('.')
        });

        for entry in walker {
            let entry = entry.map_err(|e| CatalogError::Walk(e.to_string()))?;
            if !entry.file_type().is_file() || entry.file_name() != "chain.json" {
                continue;
            }

            let path = entry.path();
            if !include_testnets && is_testnet_entry(path) {
                continue;
            }

            match parse_chain_json(path) {
                Ok(chain) if !chain.chain_name.is_empty() => {
                    debug!(chain = %chain.chain_name, path = %path.display(), "Loaded chain");
                    chains.insert(chain.chain_name.clone(), Arc::new(chain));
                }
                Ok(_) => {
                    warn!(path = %path.display(), "Skipping chain.json without chain_name");
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to parse chain.json");
                }
            }
        }

        info!(count = chains.len(), root = %root.display(), "Chain registry loaded");
        Ok(Self { chains })
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

impl ChainCatalog for RegistryCatalog {
    fn chain(&self, name: &str) -> Option<Arc<ChainDescriptor>> {
        self.chains.get(name).cloned()
    }

    fn chains(&self) -> Vec<Arc<ChainDescriptor>> {
        self.chains.values().cloned().collect()
    }
}

/// `testnets/<chain>/chain.json`
fn is_testnet_entry(path: &Path) -> bool {
    path.parent()
        .and_then(Path::parent)
        .and_then(Path::file_name)
        .map(|name| name == "testnets")
        .unwrap_or(false)
}

fn parse_chain_json(path: &Path) -> Result<ChainDescriptor, String> {
    let data = std::fs::read_to_string(path).map_err(|e| format!("failed to read: {}", e))?;
    serde_json::from_str(&data).map_err(|e| format!("failed to decode: {}", e))
}
