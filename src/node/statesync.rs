//! State sync bootstrap
//!
//! A fresh node can skip replaying history by syncing from a snapshot trusted
//! at a recent height. The trusted height and its block hash come from a live
//! RPC endpoint and are written into the `[statesync]` section of
//! `config.toml`.

use serde::Deserialize;
use std::time::Duration;

use super::NodeError;
use crate::catalog::Endpoint;

/// Checkpoint written into `[statesync]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSyncParams {
    pub rpc: String,
    pub trust_height: u64,
    pub trust_hash: String,
    /// First seed peer, `<id>@<address>`
    pub seed: Option<String>,
}

/// Prefer an https endpoint, else take the first one listed
pub fn select_rpc_endpoint(endpoints: &[Endpoint]) -> Option<&str> {
    endpoints
        .iter()
        .find(|e| e.address.starts_with("https://"))
        .or_else(|| endpoints.iter().find(|e| !e.address.is_empty()))
        .map(|e| e.address.as_str())
}

pub fn trust_height(latest: u64, offset: u64) -> u64 {
    latest.saturating_sub(offset).max(1)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StatusResponse {
    result: Option<StatusResult>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StatusResult {
    sync_info: Option<SyncInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SyncInfo {
    latest_block_height: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BlockResponse {
    result: Option<BlockResult>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BlockResult {
    block_id: Option<BlockId>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BlockId {
    hash: Option<String>,
}

/// Minimal Tendermint RPC client
#[derive(Debug, Clone)]
pub struct RpcClient {
    client: reqwest::Client,
}

impl RpcClient {
    pub fn new(timeout: Duration) -> Result<Self, NodeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NodeError::Network(e.to_string()))?;
        Ok(Self { client })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, NodeError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| NodeError::Network(format!("{}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(NodeError::Network(format!(
                "{} returned HTTP {}",
                url,
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| NodeError::Network(format!("invalid JSON from {}: {}", url, e)))
    }

    /// `GET <rpc>/status` -> `result.sync_info.latest_block_height`
    pub async fn latest_height(&self, rpc: &str) -> Result<u64, NodeError> {
        let url = format!("{}/status", rpc.trim_end_matches('/'));
        let status: StatusResponse = self.get_json(&url).await?;

        let height = status
            .result
            .and_then(|r| r.sync_info)
            .and_then(|s| s.latest_block_height)
            .ok_or_else(|| NodeError::Network(format!("{} has no latest_block_height", url)))?;

        height
            .trim()
            .parse()
            .map_err(|_| NodeError::Network(format!("invalid block height {:?} from {}", height, url)))
    }

    /// `GET <rpc>/block?height=N` -> `result.block_id.hash`
    pub async fn block_hash(&self, rpc: &str, height: u64) -> Result<String, NodeError> {
        let url = format!("{}/block?height={}", rpc.trim_end_matches('/'), height);
        let block: BlockResponse = self.get_json(&url).await?;

        block
            .result
            .and_then(|r| r.block_id)
            .and_then(|b| b.hash)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| NodeError::Network(format!("{} has no block_id.hash", url)))
    }
}

const STATESYNC_SECTION: &str = "[statesync]";

/// Rewrite the `[statesync]` section of a `config.toml`
///
/// Only lines inside that section are touched. Keys missing from the section
/// are added at its end.
pub fn rewrite_state_sync(
    content: &str,
    params: &StateSyncParams,
    discovery_time: &str,
) -> Result<String, NodeError> {
    let replacements = [
        ("enable", "true".to_string()),
        ("rpc_servers", format!("\"{},{}\"", params.rpc, params.rpc)),
        ("trust_height", params.trust_height.to_string()),
        ("trust_hash", format!("\"{}\"", params.trust_hash)),
        ("discovery_time", format!("\"{}\"", discovery_time)),
    ];

    let mut out: Vec<String> = Vec::new();
    let mut in_section = false;
    let mut found_section = false;
    let mut written = [false; 5];

    let flush_missing = |out: &mut Vec<String>, written: &mut [bool; 5]| {
        // Keep the section's trailing blank lines after the inserted keys
        let mut blanks = 0;
        while out.last().map(|l| l.trim().is_empty()).unwrap_or(false) {
            out.pop();
            blanks += 1;
        }
        for (i, (key, value)) in replacements.iter().enumerate() {
            if !written[i] {
                out.push(format!("{} = {}", key, value));
                written[i] = true;
            }
        }
        out.extend(std::iter::repeat(String::new()).take(blanks));
    };

    for line in content.lines() {
        let trimmed = line.trim_start();

        if trimmed.starts_with('[') {
            if in_section {
                flush_missing(&mut out, &mut written);
            }
            in_section = trimmed.trim_end() == STATESYNC_SECTION;
            found_section |= in_section;
            out.push(line.to_string());
            continue;
        }

        if in_section {
            if let Some(i) = replacements.iter().position(|(key, _)| is_key_line(trimmed, key)) {
                let indent = &line[..line.len() - trimmed.len()];
                out.push(format!("{}{} = {}", indent, replacements[i].0, replacements[i].1));
                written[i] = true;
                continue;
            }
        }

        out.push(line.to_string());
    }

    if in_section {
        flush_missing(&mut out, &mut written);
    }

    if !found_section {
        return Err(NodeError::Config("config.toml has no [statesync] section".into()));
    }

    let mut result = out.join("\n");
    if content.ends_with('\n') {
        result.push('\n');
    }
    Ok(result)
}

/// `key = ...` or `key=...`, but not `key_suffix = ...`
pub(crate) fn is_key_line(trimmed: &str, key: &str) -> bool {
    trimmed
        .strip_prefix(key)
        .map(|rest| rest.trim_start().starts_with('='))
        .unwrap_or(false)
}
