//! Driver construction for the orchestrator.

use std::collections::HashMap;
use std::sync::Arc;

use sc_01_signature_aggregation::ValidatorSecrets;
use sc_04_bft::{
    BftConfig, BftDriver, ChainCollaborator, Clock, ConsensusError, ConsensusNetwork, ConsensusResult, DriverHandle,
    SystemClock,
};
use shared_bus::EventPublisher;
use shared_types::ChainId;

/// Spawns a fresh driver task for a chain.
pub trait DriverFactory: Send + Sync {
    fn spawn_driver(&self, chain: ChainId) -> ConsensusResult<DriverHandle>;
}

/// Builds [`BftDriver`]s over a fixed set of chain collaborators that share
/// one network and one local identity.
pub struct BftDriverFactory<C, N>
where
    C: ChainCollaborator + 'static,
    N: ConsensusNetwork + 'static,
{
    config: BftConfig,
    chains: HashMap<ChainId, Arc<C>>,
    network: Arc<N>,
    secrets: Option<ValidatorSecrets>,
    clock: Arc<dyn Clock>,
    bus: Option<Arc<dyn EventPublisher>>,
}

impl<C, N> BftDriverFactory<C, N>
where
    C: ChainCollaborator + 'static,
    N: ConsensusNetwork + 'static,
{
    pub fn new(config: BftConfig, network: Arc<N>) -> Self {
        Self {
            config,
            chains: HashMap::new(),
            network,
            secrets: None,
            clock: Arc::new(SystemClock),
            bus: None,
        }
    }

    pub fn with_chain(mut self, chain: ChainId, collaborator: Arc<C>) -> Self {
        self.chains.insert(chain, collaborator);
        self
    }

    /// Without an identity the drivers only observe.
    pub fn with_identity(mut self, secrets: Option<ValidatorSecrets>) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<dyn EventPublisher>) -> Self {
        self.bus = Some(bus);
        self
    }
}

impl<C, N> DriverFactory for BftDriverFactory<C, N>
where
    C: ChainCollaborator + 'static,
    N: ConsensusNetwork + 'static,
{
    fn spawn_driver(&self, chain: ChainId) -> ConsensusResult<DriverHandle> {
        let collaborator = self
            .chains
            .get(&chain)
            .cloned()
            .ok_or_else(|| ConsensusError::InvalidConfig(format!("no chain adapter for {chain}")))?;

        let mut driver = BftDriver::new(self.config.clone(), chain, collaborator, Arc::clone(&self.network))?
            .with_clock(Arc::clone(&self.clock));
        if let Some(secrets) = &self.secrets {
            driver = driver.with_identity(secrets.clone())?;
        }
        if let Some(bus) = &self.bus {
            driver = driver.with_event_bus(Arc::clone(bus));
        }
        Ok(driver.spawn())
    }
}
