//! # Loopback Network
//!
//! [`ConsensusNetwork`] that feeds every outgoing message back into the
//! node's own inbound queue. A single-process devnet runs all committees
//! locally, so this is the whole gossip layer.

use async_trait::async_trait;
use sc_04_bft::ConsensusNetwork;
use shared_types::{ChainId, InboundMessage, NetworkError, WireMessage};
use tokio::sync::mpsc;
use tracing::trace;

pub struct LoopbackNetwork {
    inbound: mpsc::Sender<InboundMessage>,
}

impl LoopbackNetwork {
    pub fn new(inbound: mpsc::Sender<InboundMessage>) -> Self {
        Self { inbound }
    }

    async fn deliver(&self, chain: ChainId, message: WireMessage) -> Result<(), NetworkError> {
        trace!(%chain, kind = message.kind(), "Loopback delivery");
        self.inbound
            .send(InboundMessage { chain, message })
            .await
            .map_err(|_| NetworkError::ChannelClosed)
    }
}

/// Chain a broadcast message concerns.
fn target_chain(message: &WireMessage) -> ChainId {
    match message {
        WireMessage::Propose(propose) => propose.chain,
        WireMessage::Vote(vote) => vote.chain,
        WireMessage::RequestCrossShard(request) => ChainId::Shard(request.shard_from),
        WireMessage::CrossShardBlock(payload) => ChainId::Shard(payload.to_shard_id),
        WireMessage::RequestBeaconBlock { .. } | WireMessage::BeaconBlock(_) => ChainId::Beacon,
    }
}

#[async_trait]
impl ConsensusNetwork for LoopbackNetwork {
    async fn send_to_chain(&self, chain: ChainId, message: WireMessage) -> Result<(), NetworkError> {
        self.deliver(chain, message).await
    }

    async fn broadcast(&self, message: WireMessage) -> Result<(), NetworkError> {
        let chain = target_chain(&message);
        self.deliver(chain, message).await
    }
}
