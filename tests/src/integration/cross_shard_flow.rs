//! # Cross-Shard Flow
//!
//! A coin leaves shard 0 and is consumed by shard 1:
//!
//! ```text
//! shard 0 block (outputs) → LoopbackPeers + beacon confirmation
//!     → CrossShardSyncProcess(shard 1) → CrossShardPool → shard 1 block
//! ```
//!
//! The node validates the beacon chain; extra drivers hold the genesis
//! secrets of each shard's single committee member.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use node_runtime::adapters::InMemoryChain;
    use node_runtime::container::{NodeConfig, NodeRole};
    use node_runtime::orchestrator::{BftDriverFactory, DriverFactory};
    use node_runtime::{NodeContainer, RunningNode};
    use sc_04_bft::DriverHandle;
    use shared_bus::{EventFilter, EventPublisher, EventTopic, NodeEvent};
    use shared_types::{ChainId, Coin, ShardId};

    const GENESIS_MS: i64 = 1_700_000_000_000;

    fn two_shard_config() -> NodeConfig {
        let mut config = NodeConfig::for_testing();
        config.committee.active_shards = 2;
        config.genesis.active_shards = 2;
        config.genesis.timestamp_ms = Some(GENESIS_MS);
        config.node.role = NodeRole::Auto;
        config
    }

    struct Devnet {
        node: RunningNode,
        shards: Vec<Arc<InMemoryChain>>,
        drivers: Vec<DriverHandle>,
    }

    impl Devnet {
        /// Start the node, then one driver per shard under that shard's
        /// genesis member.
        fn start(container: NodeContainer) -> Self {
            let bus: Arc<dyn EventPublisher> = container.bus.clone();
            let network = Arc::clone(&container.network);
            let consensus = container.config.consensus.clone();
            let genesis = container.config.genesis.clone();
            let shards: Vec<Arc<InMemoryChain>> = container.shards.values().cloned().collect();

            let mut drivers = Vec::new();
            for (sid, chain) in &container.shards {
                let chain_id = ChainId::Shard(*sid);
                let member = (0..genesis.validator_count())
                    .find(|i| genesis.chain_of(*i) == Some(chain_id))
                    .expect("every shard has a genesis member");
                let handle = BftDriverFactory::new(consensus.clone(), Arc::clone(&network))
                    .with_chain(chain_id, Arc::clone(chain))
                    .with_identity(Some(genesis.validator_secrets(member).unwrap()))
                    .with_event_bus(Arc::clone(&bus))
                    .spawn_driver(chain_id)
                    .unwrap();
                drivers.push(handle);
            }

            Self {
                node: container.start(),
                shards,
                drivers,
            }
        }

        fn shard(&self, sid: ShardId) -> &Arc<InMemoryChain> {
            &self.shards[usize::from(sid)]
        }

        async fn shutdown(self) {
            for driver in self.drivers {
                driver.shutdown().await;
            }
            self.node.shutdown().await;
        }
    }

    async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
        let waited = tokio::time::timeout(Duration::from_secs(30), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "timed out waiting for {what}");
    }

    #[tokio::test]
    async fn test_output_of_shard_zero_consumed_by_shard_one() {
        let container = NodeContainer::build(two_shard_config()).unwrap();
        let mut validated = container
            .bus
            .subscribe(EventFilter::topics(vec![EventTopic::CrossShard]));
        let pool = Arc::clone(&container.pools[&1]);
        container.shards[&0]
            .queue_output(1, Coin(b"coin-for-shard-1".to_vec()))
            .unwrap();
        let devnet = Devnet::start(container);

        let event = tokio::time::timeout(Duration::from_secs(30), async {
            loop {
                match validated.recv().await {
                    Some(NodeEvent::CrossShardPayloadValidated {
                        from_shard,
                        to_shard,
                        height,
                        hash,
                    }) => break (from_shard, to_shard, height, hash),
                    Some(_) => continue,
                    None => panic!("bus closed"),
                }
            }
        })
        .await
        .expect("payload validated by shard 1's sync");
        let (from, to, source_height, hash) = event;
        assert_eq!((from, to), (0, 1));
        assert!(source_height >= 1);

        let shard_one = Arc::clone(devnet.shard(1));
        wait_until("shard 1 to consume the payload", || {
            shard_one.last_consumed(0) >= source_height
        })
        .await;
        // Consumed payloads leave the pool.
        assert!(!pool.has(&hash));

        let sync = devnet
            .node
            .sync_handles()
            .iter()
            .find(|handle| Arc::ptr_eq(handle.pool(), &pool))
            .expect("shard 1 is synced");
        let status = sync.status().await.unwrap();
        assert_eq!(status.shard_id, 1);
        assert!(status.validated >= 1);
        assert_eq!(status.rejected, 0);

        devnet.shutdown().await;
    }

    #[tokio::test]
    async fn test_unreachable_peers_delay_but_do_not_lose_payloads() {
        let container = NodeContainer::build(two_shard_config()).unwrap();
        let peers = Arc::clone(&container.peers);
        peers.set_reachable(false);
        container.shards[&1]
            .queue_output(0, Coin(b"coin-for-shard-0".to_vec()))
            .unwrap();
        let devnet = Devnet::start(container);

        // Shard 1 publishes, but shard 0's sync cannot fetch.
        let shard_one = Arc::clone(devnet.shard(1));
        wait_until("shard 1 to publish its output", || {
            (1..=shard_one.tip_height()).any(|h| peers.payload(1, 0, h).is_some())
        })
        .await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(devnet.shard(0).last_consumed(1), 0);

        peers.set_reachable(true);
        let shard_zero = Arc::clone(devnet.shard(0));
        wait_until("shard 0 to consume the payload", || shard_zero.last_consumed(1) >= 1).await;

        devnet.shutdown().await;
    }
}
