//! Table of running nodes
//!
//! At most one node per chain. A chain is *reserved* while its start pipeline
//! runs and only *committed* once its process has been spawned, so a failed
//! start never leaves an entry behind. The lock is held only for the
//! check-and-mutate step itself; slow work (downloads, builds, waiting on a
//! child) happens outside it.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

use crate::node::{Node, NodeError, NodeStatus};

/// Snapshot of one registered node
#[derive(Debug, Clone, Serialize)]
pub struct NodeSummary {
    pub chain: String,
    pub status: NodeStatus,
    pub pid: Option<u32>,
    pub uptime_secs: Option<u64>,
    pub state_sync_rpc: Option<String>,
}

#[derive(Default)]
struct RegistryInner {
    nodes: HashMap<String, Node>,
    starting: HashSet<String>,
}

#[derive(Default)]
pub struct NodeRegistry {
    inner: Mutex<RegistryInner>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `chain` for a start pipeline
    pub async fn reserve(&self, chain: &str) -> Result<(), NodeError> {
        let mut inner = self.inner.lock().await;
        if inner.nodes.contains_key(chain) {
            return Err(NodeError::State(format!("{} is already running", chain)));
        }
        if !inner.starting.insert(chain.to_string()) {
            return Err(NodeError::State(format!("{} is already starting", chain)));
        }
        Ok(())
    }

    /// Drop a reservation after a failed start
    pub async fn release(&self, chain: &str) {
        self.inner.lock().await.starting.remove(chain);
    }

    /// Register a started node, consuming its reservation
    pub async fn commit(&self, node: Node) -> Result<(), NodeError> {
        let chain = node.chain_name().to_string();
        let mut inner = self.inner.lock().await;
        inner.starting.remove(&chain);
        if inner.nodes.contains_key(&chain) {
            return Err(NodeError::State(format!("{} is already registered", chain)));
        }
        inner.nodes.insert(chain, node);
        Ok(())
    }

    /// Take a node out of the table
    pub async fn remove(&self, chain: &str) -> Option<Node> {
        self.inner.lock().await.nodes.remove(chain)
    }

    /// Status of `chain`; unregistered chains are not running
    pub async fn status(&self, chain: &str) -> NodeStatus {
        let mut inner = self.inner.lock().await;
        match inner.nodes.get_mut(chain) {
            Some(node) => node.status(),
            None => NodeStatus::NotRunning,
        }
    }

    pub async fn summaries(&self) -> Vec<NodeSummary> {
        let mut inner = self.inner.lock().await;
        let mut summaries: Vec<_> = inner
            .nodes
            .iter_mut()
            .map(|(chain, node)| {
                let status = node.status();
                let (pid, uptime_secs) = match &node.process {
                    crate::node::ProcessState::Running(running) => {
                        (Some(running.pid), Some(running.started_at.elapsed().as_secs()))
                    }
                    _ => (None, None),
                };
                NodeSummary {
                    chain: chain.clone(),
                    status,
                    pid,
                    uptime_secs,
                    state_sync_rpc: node.state_sync.as_ref().map(|s| s.rpc.clone()),
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.chain.cmp(&b.chain));
        summaries
    }

    /// Probe every node and evict those no longer running
    pub async fn reap(&self) -> Vec<(Node, NodeStatus)> {
        let mut inner = self.inner.lock().await;
        let dead: Vec<(String, NodeStatus)> = inner
            .nodes
            .iter_mut()
            .filter_map(|(chain, node)| {
                let status = node.status();
                (status != NodeStatus::Running).then(|| (chain.clone(), status))
            })
            .collect();

        dead.into_iter()
            .filter_map(|(chain, status)| inner.nodes.remove(&chain).map(|node| (node, status)))
            .collect()
    }

    /// Take every node out of the table
    pub async fn drain(&self) -> Vec<Node> {
        let mut inner = self.inner.lock().await;
        inner.nodes.drain().map(|(_, node)| node).collect()
    }

    pub async fn contains(&self, chain: &str) -> bool {
        self.inner.lock().await.nodes.contains_key(chain)
    }

    pub async fn is_starting(&self, chain: &str) -> bool {
        self.inner.lock().await.starting.contains(chain)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.nodes.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
