//! Node lifecycle
//!
//! A [`Node`] is one chain's daemon on this machine: its binary path, its home
//! directory, the handle of the running process and the log it writes to.
//! Configuration of the home directory lives in [`configure`], process control
//! in [`supervisor`].

pub(crate) mod command;
pub mod configure;
pub mod statesync;
pub mod supervisor;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::catalog::ChainDescriptor;
use crate::logs::LogSink;

pub use configure::ProcessConfigurator;
pub use statesync::{RpcClient, StateSyncParams};
pub use supervisor::{NodeStatus, ProcessState, RunningProcess, STOP_GRACE_PERIOD};

/// Node errors
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("Binary acquisition failed: {0}")]
    Acquisition(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Invalid state: {0}")]
    State(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for NodeError {
    fn from(e: std::io::Error) -> Self {
        NodeError::Io(e.to_string())
    }
}

/// Filesystem layout for one chain under the data directory
#[derive(Debug, Clone)]
pub struct NodePaths {
    pub data_dir: PathBuf,
    /// `<data_dir>/bin/<daemon_name>`
    pub binary: PathBuf,
    /// `<data_dir>/<chain_name>`
    pub home: PathBuf,
}

impl NodePaths {
    pub fn new(data_dir: &Path, chain: &ChainDescriptor) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            binary: data_dir.join("bin").join(&chain.daemon_name),
            home: data_dir.join(&chain.chain_name),
        }
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.data_dir.join("bin")
    }

    /// Working directory for source builds of `chain`
    pub fn source_dir(&self, chain: &str) -> PathBuf {
        self.data_dir.join("source").join(chain)
    }

    pub fn config_toml(&self) -> PathBuf {
        self.home.join("config").join("config.toml")
    }

    pub fn app_toml(&self) -> PathBuf {
        self.home.join("config").join("app.toml")
    }
}

/// One chain's daemon
pub struct Node {
    pub descriptor: Arc<ChainDescriptor>,
    pub paths: NodePaths,
    pub process: ProcessState,
    /// Set once state sync has been configured
    pub state_sync: Option<StateSyncParams>,
    pub(crate) log: Arc<LogSink>,
}

impl Node {
    pub fn new(
        descriptor: Arc<ChainDescriptor>,
        data_dir: &Path,
        log: Arc<LogSink>,
    ) -> Result<Self, NodeError> {
        if descriptor.chain_name.is_empty() {
            return Err(NodeError::Config("chain descriptor has no chain_name".into()));
        }
        if descriptor.daemon_name.is_empty() {
            return Err(NodeError::Config(format!(
                "chain {} has no daemon_name",
                descriptor.chain_name
            )));
        }

        let paths = NodePaths::new(data_dir, &descriptor);
        Ok(Self {
            descriptor,
            paths,
            process: ProcessState::NotStarted,
            state_sync: None,
            log,
        })
    }

    pub fn chain_name(&self) -> &str {
        &self.descriptor.chain_name
    }

    pub fn daemon_name(&self) -> &str {
        &self.descriptor.daemon_name
    }

    pub fn log(&self) -> &Arc<LogSink> {
        &self.log
    }

    /// Write a line to both tracing and the chain's log
    pub(crate) fn note(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        info!(chain = %self.descriptor.chain_name, "{}", message);
        self.log.line(message);
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("chain", &self.descriptor.chain_name)
            .field("binary", &self.paths.binary)
            .field("home", &self.paths.home)
            .field("process", &self.process)
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_paths_layout() {
        let dir = TempDir::new().unwrap();
        let node = test_support::node(dir.path(), "osmosis", "osmosisd");

        assert_eq!(node.paths.binary, dir.path().join("bin/osmosisd"));
        assert_eq!(node.paths.home, dir.path().join("osmosis"));
        assert_eq!(node.paths.config_toml(), dir.path().join("osmosis/config/config.toml"));
        assert_eq!(node.paths.source_dir("osmosis"), dir.path().join("source/osmosis"));
        assert!(matches!(node.process, ProcessState::NotStarted));
    }

    #[test]
    fn test_missing_daemon_name_rejected() {
        let dir = TempDir::new().unwrap();
        let descriptor = Arc::new(test_support::descriptor("juno", ""));
        let log = Arc::new(LogSink::new("juno", 100, 50));

        let err = Node::new(descriptor, dir.path(), log).unwrap_err();
        assert!(matches!(err, NodeError::Config(_)));
    }
}
