//! chain-steward: run chain-registry nodes on this machine
//!
//! Subcommands:
//! - `serve` (default): HTTP API plus the background reaper
//! - `chains`: list live mainnets from the registry
//! - `run <chain>...`: start chains and follow the first one's log

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use chain_steward::{ChainCatalog, Config, RegistryCatalog, Steward};

#[derive(Parser)]
#[command(name = "chain-steward")]
#[command(about = "Provision and supervise chain-registry node daemons")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "chain-steward.toml")]
    config: String,

    /// Data directory for binaries, sources and node homes
    #[arg(short, long, env = "CHAIN_STEWARD_DATA_DIR")]
    data_dir: Option<String>,

    /// Root of a chain-registry checkout
    #[arg(short, long, env = "CHAIN_STEWARD_REGISTRY")]
    registry: Option<String>,

    /// HTTP API port (overrides config file)
    #[arg(long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API and supervise nodes until interrupted
    Serve,
    /// List live mainnets
    Chains,
    /// Start one or more chains and follow the first one's log
    Run {
        #[arg(required = true)]
        chains: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("chain_steward=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(std::path::Path::new(&cli.config))?;

    // Apply CLI overrides
    if let Some(data_dir) = cli.data_dir {
        config.steward.data_dir = PathBuf::from(data_dir);
    }
    if let Some(registry) = cli.registry {
        config.steward.registry_path = PathBuf::from(registry);
    }
    if let Some(port) = cli.port {
        config.api.http_port = port;
    }

    info!("Data dir: {}", config.steward.data_dir.display());
    info!("Registry: {}", config.steward.registry_path.display());

    let catalog = RegistryCatalog::load(
        &config.steward.registry_path,
        config.steward.include_testnets,
    )?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Chains => {
            for chain in catalog.live_mainnets() {
                println!(
                    "{:<24} {:<28} {}",
                    chain.chain_name,
                    chain.display_name(),
                    chain.chain_id
                );
            }
            Ok(())
        }
        Command::Serve => serve(config, Arc::new(catalog)).await,
        Command::Run { chains } => run(config, Arc::new(catalog), chains).await,
    }
}

async fn serve(config: Config, catalog: Arc<dyn ChainCatalog>) -> anyhow::Result<()> {
    let api = config.api.clone();
    let steward = Arc::new(Steward::new(config, catalog)?);
    steward.spawn_reaper();

    if api.enabled {
        let shutdown = async {
            let _ = tokio::signal::ctrl_c().await;
        };
        if let Err(e) = chain_steward::api::serve(steward.clone(), api.http_port, shutdown).await {
            error!("API server error: {}", e);
        }
    } else {
        info!("API disabled, waiting for interrupt");
        tokio::signal::ctrl_c().await?;
    }

    info!("Shutting down");
    steward.shutdown().await;
    Ok(())
}

async fn run(config: Config, catalog: Arc<dyn ChainCatalog>, chains: Vec<String>) -> anyhow::Result<()> {
    let steward = Arc::new(Steward::new(config, catalog)?);
    steward.spawn_reaper();

    let followed = chains[0].clone();
    steward.select(&followed).await?;
    let mut live = steward.logs().sink(&followed).subscribe();

    for chain in &chains {
        let handle = steward.request_start(chain);
        let chain = chain.clone();
        tokio::spawn(async move {
            match handle.await {
                Ok(Ok(())) => info!(chain = %chain, "Node running"),
                Ok(Err(e)) => error!(chain = %chain, error = %e, "Node failed to start"),
                Err(e) => error!(chain = %chain, error = %e, "Start task panicked"),
            }
        });
    }

    loop {
        tokio::select! {
            received = live.recv() => match received {
                Ok(text) => print!("{}", text),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Log output dropped"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("Shutting down");
    steward.shutdown().await;
    Ok(())
}
