//! Orchestration of many chains
//!
//! The [`Steward`] is the single context object shared by the CLI, the HTTP
//! API and the background reaper. Start and stop requests each run on their
//! own task; the reaper evicts nodes whose process has died.
//!
//! Start pipeline per chain:
//! acquire binary -> init home -> minimum gas price -> state sync -> start

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::acquire::BinaryAcquirer;
use crate::catalog::{ChainCatalog, ChainDescriptor};
use crate::config::Config;
use crate::logs::LogBook;
use crate::node::{Node, NodeError, NodeStatus, ProcessConfigurator};
use crate::registry::{NodeRegistry, NodeSummary};

/// Pipeline phase, named in failure reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Prepare,
    Acquire,
    Initialize,
    StateSync,
    Start,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Prepare => write!(f, "node preparation"),
            Phase::Acquire => write!(f, "binary acquisition"),
            Phase::Initialize => write!(f, "node initialization"),
            Phase::StateSync => write!(f, "state sync configuration"),
            Phase::Start => write!(f, "node startup"),
        }
    }
}

type ReaperHandle = (mpsc::Sender<()>, JoinHandle<()>);

pub struct Steward {
    config: Config,
    catalog: Arc<dyn ChainCatalog>,
    logs: LogBook,
    registry: NodeRegistry,
    acquirer: BinaryAcquirer,
    configurator: ProcessConfigurator,
    selected: RwLock<Option<String>>,
    reaper: Mutex<Option<ReaperHandle>>,
}

impl Steward {
    pub fn new(config: Config, catalog: Arc<dyn ChainCatalog>) -> Result<Self, NodeError> {
        let acquirer = BinaryAcquirer::new(config.build.clone())?;
        Self::with_acquirer(config, catalog, acquirer)
    }

    /// Use a preconfigured acquirer, e.g. one pinned to another platform
    pub fn with_acquirer(
        config: Config,
        catalog: Arc<dyn ChainCatalog>,
        acquirer: BinaryAcquirer,
    ) -> Result<Self, NodeError> {
        let configurator = ProcessConfigurator::new(&config.steward, &config.state_sync)?;
        Ok(Self {
            logs: LogBook::new(&config.logs),
            config,
            catalog,
            registry: NodeRegistry::new(),
            acquirer,
            configurator,
            selected: RwLock::new(None),
            reaper: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<dyn ChainCatalog> {
        &self.catalog
    }

    pub fn logs(&self) -> &LogBook {
        &self.logs
    }

    /// Start `chain` on its own task
    pub fn request_start(self: &Arc<Self>, chain: &str) -> JoinHandle<Result<(), NodeError>> {
        let steward = Arc::clone(self);
        let chain = chain.to_string();
        tokio::spawn(async move { steward.start_chain(&chain).await })
    }

    /// Stop `chain` on its own task
    pub fn request_stop(self: &Arc<Self>, chain: &str) -> JoinHandle<Result<(), NodeError>> {
        let steward = Arc::clone(self);
        let chain = chain.to_string();
        tokio::spawn(async move { steward.stop_chain(&chain).await })
    }

    /// Run the full start pipeline for `chain` and register the node
    ///
    /// On failure nothing is registered and the error is written to the
    /// chain's log.
    pub async fn start_chain(&self, chain: &str) -> Result<(), NodeError> {
        let descriptor = self
            .catalog
            .chain(chain)
            .ok_or_else(|| NodeError::Config(format!("unknown chain: {}", chain)))?;

        let log = self.logs.sink(chain);
        if let Err(e) = self.registry.reserve(chain).await {
            warn!(chain, error = %e, "Start rejected");
            log.line(format!("Start rejected: {}", e));
            return Err(e);
        }

        match self.run_pipeline(descriptor).await {
            Ok(node) => {
                self.registry.commit(node).await?;
                info!(chain, "Node registered");
                Ok(())
            }
            Err((phase, e)) => {
                error!(chain, %phase, error = %e, "Start pipeline failed");
                log.line("===== ERROR =====");
                log.line(format!("{} failed: {}", phase, e));
                self.registry.release(chain).await;
                Err(e)
            }
        }
    }

    async fn run_pipeline(&self, descriptor: Arc<ChainDescriptor>) -> Result<Node, (Phase, NodeError)> {
        let log = self.logs.sink(&descriptor.chain_name);
        let mut node = Node::new(descriptor, &self.config.steward.data_dir, log)
            .map_err(|e| (Phase::Prepare, e))?;

        node.note("======== BINARY ACQUISITION PHASE ========");
        let acquisition = self
            .acquirer
            .ensure_binary(&node)
            .await
            .map_err(|e| (Phase::Acquire, e))?;
        debug!(chain = %node.chain_name(), ?acquisition, "Binary ready");

        node.note("======== NODE INITIALIZATION PHASE ========");
        self.configurator
            .initialize(&node)
            .await
            .map_err(|e| (Phase::Initialize, e))?;

        if node.descriptor.needs_minimum_gas_price() {
            node.note("======== SETTING MINIMUM GAS PRICES ========");
            let price = node
                .descriptor
                .minimum_gas_price()
                .unwrap_or_else(|| self.config.gas.default_minimum_gas_price.clone());
            if let Err(e) = self.configurator.set_minimum_gas_price(&node, &price).await {
                warn!(chain = %node.chain_name(), error = %e, "Could not set minimum gas prices");
                node.log().line(format!("Warning: Failed to set minimum gas prices: {}", e));
            }
        }

        node.note("======== STATE SYNC CONFIGURATION PHASE ========");
        self.configurator
            .configure_state_sync(&mut node)
            .await
            .map_err(|e| (Phase::StateSync, e))?;

        node.note("======== NODE STARTUP PHASE ========");
        node.start().map_err(|e| (Phase::Start, e))?;
        node.note("======== NODE STARTED SUCCESSFULLY ========");
        Ok(node)
    }

    /// Stop and unregister `chain`
    ///
    /// A chain that is not registered (including one still starting) is left
    /// alone.
    pub async fn stop_chain(&self, chain: &str) -> Result<(), NodeError> {
        let Some(mut node) = self.registry.remove(chain).await else {
            debug!(chain, "Stop requested for a chain that is not running");
            return Ok(());
        };

        node.note("======== STOPPING NODE ========");
        let result = node.stop(self.config.supervisor.stop_grace()).await;
        match &result {
            Ok(()) => node.note("Node stopped successfully"),
            Err(e) => {
                warn!(chain, error = %e, "Node did not stop cleanly");
                node.log().line(format!("Error stopping node: {}", e));
            }
        }
        result
    }

    /// Choose which chain's log is being watched
    pub async fn select(&self, chain: &str) -> Result<(), NodeError> {
        if self.catalog.chain(chain).is_none() {
            return Err(NodeError::Config(format!("unknown chain: {}", chain)));
        }
        *self.selected.write().await = Some(chain.to_string());
        Ok(())
    }

    pub async fn selected(&self) -> Option<String> {
        self.selected.read().await.clone()
    }

    /// Log of the selected chain
    pub async fn selected_log(&self) -> Option<(String, String)> {
        let chain = self.selected().await?;
        let contents = self.log(&chain).unwrap_or_default();
        Some((chain, contents))
    }

    pub fn log(&self, chain: &str) -> Option<String> {
        self.logs.get(chain).map(|sink| sink.contents())
    }

    pub async fn status(&self, chain: &str) -> NodeStatus {
        self.registry.status(chain).await
    }

    pub async fn nodes(&self) -> Vec<NodeSummary> {
        self.registry.summaries().await
    }

    /// Evict every registered node that is no longer running
    pub async fn reap(&self) -> usize {
        let evicted = self.registry.reap().await;
        let count = evicted.len();
        let grace = self.config.supervisor.stop_grace();

        let stops = evicted.into_iter().map(|(mut node, status)| async move {
            let chain = node.chain_name().to_string();
            node.log()
                .line(format!("Node status check: {} (chain: {})", status, chain));
            node.note("Node is no longer running. Removing from active nodes.");

            // Unknown leaves the child attached and possibly alive
            if node.process.is_running() {
                if let Err(e) = node.stop(grace).await {
                    warn!(chain = %chain, error = %e, "Evicted node did not stop cleanly");
                }
            }
        });
        futures::future::join_all(stops).await;
        count
    }

    /// Run [`Steward::reap`] on the configured interval until shutdown
    pub fn spawn_reaper(self: &Arc<Self>) {
        let mut slot = self.reaper.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let steward = Arc::clone(self);
        let period = self.config.supervisor.reap_interval();

        let handle = tokio::spawn(async move {
            let mut tick = interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = period.as_secs(), "Reaper started");

            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let evicted = steward.reap().await;
                        if evicted > 0 {
                            info!(evicted, "Reaped dead nodes");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Reaper shutting down");
                        break;
                    }
                }
            }
        });

        *slot = Some((shutdown_tx, handle));
    }

    /// Stop the reaper and every running node
    pub async fn shutdown(&self) {
        let reaper = self
            .reaper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((tx, handle)) = reaper {
            let _ = tx.send(()).await;
            let _ = handle.await;
        }

        let grace = self.config.supervisor.stop_grace();
        let nodes = self.registry.drain().await;
        info!(count = nodes.len(), "Stopping all nodes");

        let stops = nodes.into_iter().map(|mut node| async move {
            node.note("======== STOPPING NODE ========");
            if let Err(e) = node.stop(grace).await {
                warn!(chain = %node.chain_name(), error = %e, "Node did not stop cleanly");
            }
        });
        futures::future::join_all(stops).await;
    }

    /// Wait for a chain to reach `Running`, polling every 100ms
    pub async fn wait_until_running(&self, chain: &str, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.status(chain).await == NodeStatus::Running {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        false
    }
}
