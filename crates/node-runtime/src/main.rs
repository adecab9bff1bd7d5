//! # Shardline Node Runtime
//!
//! The main entry point for a Shardline devnet node.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration (defaults + `SC_*` environment overrides)
//! 2. Install the tracing subscriber
//! 3. Build the genesis committee and restore the latest snapshot
//! 4. Wire in-memory chains, loopback network and cross-shard sync
//! 5. Start the orchestrator, instruction handler and sync loops
//! 6. Run until Ctrl+C or a fatal committee-state error

use anyhow::{Context, Result};
use sc_telemetry::init_telemetry;
use tracing::{error, info};

use node_runtime::{NodeConfig, NodeContainer};

/// The node runtime wrapping every built component.
struct NodeRuntime {
    container: NodeContainer,
}

impl NodeRuntime {
    fn new(config: NodeConfig) -> Result<Self> {
        let container = NodeContainer::build(config).context("Failed to build node")?;
        Ok(Self { container })
    }

    async fn run(self) -> Result<()> {
        let container = self.container;
        info!("===========================================");
        info!("  Shardline Node Runtime v{}", env!("CARGO_PKG_VERSION"));
        info!("  Role: {}", container.config.node.role);
        info!("  Active shards: {}", container.config.committee.active_shards);
        info!("===========================================");

        let mut node = container.start();
        info!("Node is running. Press Ctrl+C to stop.");

        let outcome = tokio::select! {
            signal = tokio::signal::ctrl_c() => signal.context("Failed to listen for Ctrl+C"),
            fatal = node.fatal() => {
                error!("Fatal committee-state error: {}", fatal);
                Err(anyhow::Error::new(fatal))
            }
        };

        node.shutdown().await;
        outcome
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = NodeConfig::from_env().context("Invalid configuration")?;
    let _telemetry = init_telemetry(config.telemetry.clone()).context("Failed to initialize telemetry")?;

    NodeRuntime::new(config)?.run().await
}
