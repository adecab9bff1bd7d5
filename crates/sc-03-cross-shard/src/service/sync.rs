//! # Cross-Shard Sync Process
//!
//! One actor per local shard. Each iteration it asks the beacon view which
//! source heights carry outputs for this shard, records a request for every
//! confirmed one it does not hold yet, and pulls the payloads from peers.
//!
//! ```text
//!            Poke / PayloadArrived / Status / Shutdown
//! SyncHandle ──────────────────────────────────────────► actor loop
//!                                                        │  owns outstanding requests
//!    worker task ◄── mpsc::Receiver<payload> ◄── peers ◄─┘  request_cross_shard
//!        │
//!        └─ pool.add_pending ──► PayloadArrived ──► validate ──► pool.mark_validated
//! ```
//!
//! Only the actor touches the request map. Workers only insert pending
//! payloads and report them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use shared_bus::{EventPublisher, NodeEvent};
use shared_types::{hex_short, BeaconBody, CrossShardPayload, CrossShardRequest, ShardId};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::config::SyncConfig;
use crate::domain::errors::{CrossShardError, CrossShardResult};
use crate::domain::pool::CrossShardPool;
use crate::domain::request::OutstandingRequest;
use crate::metrics;
use crate::ports::outbound::{BeaconView, CrossShardPeers, ShardView};

#[derive(Debug)]
pub enum SyncCommand {
    /// Run an iteration now.
    Poke,
    /// A pending payload for `(from_shard, height)` entered the pool.
    PayloadArrived { from_shard: ShardId, height: u64 },
    Status(oneshot::Sender<SyncStatus>),
    Shutdown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
    pub shard_id: ShardId,
    /// `(from_shard, height)` of every outstanding request.
    pub outstanding: Vec<(ShardId, u64)>,
    pub iterations: u64,
    pub requests_sent: u64,
    pub validated: u64,
    pub rejected: u64,
    pub expired: u64,
    pub backing_off: bool,
}

/// Cloneable handle to a running sync process.
#[derive(Clone)]
pub struct SyncHandle {
    commands: mpsc::Sender<SyncCommand>,
    pool: Arc<CrossShardPool>,
}

impl SyncHandle {
    pub fn poke(&self) -> CrossShardResult<()> {
        match self.commands.try_send(SyncCommand::Poke) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(CrossShardError::Stopped),
        }
    }

    /// Hand over a payload received by gossip. It stays pending until a
    /// beacon confirmation validates it.
    pub async fn deliver(&self, payload: CrossShardPayload) -> CrossShardResult<()> {
        let height = payload.source_block_height();
        let from_shard = payload
            .from_shard_id()
            .ok_or_else(|| CrossShardError::unverified(height, "source header is not a shard header"))?;
        self.pool.add_pending(payload)?;
        self.commands
            .send(SyncCommand::PayloadArrived { from_shard, height })
            .await
            .map_err(|_| CrossShardError::Stopped)
    }

    pub async fn status(&self) -> CrossShardResult<SyncStatus> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(SyncCommand::Status(reply))
            .await
            .map_err(|_| CrossShardError::Stopped)?;
        rx.await.map_err(|_| CrossShardError::Stopped)
    }

    /// Ask the loop to drain and exit. Await the join handle returned by
    /// [`CrossShardSyncProcess::spawn`] to wait for it.
    pub async fn stop(&self) {
        let _ = self.commands.send(SyncCommand::Shutdown).await;
    }

    pub fn pool(&self) -> &Arc<CrossShardPool> {
        &self.pool
    }
}

pub struct CrossShardSyncProcess<B, S, P>
where
    B: BeaconView + 'static,
    S: ShardView + 'static,
    P: CrossShardPeers + 'static,
{
    config: SyncConfig,
    beacon: Arc<B>,
    shard: Arc<S>,
    peers: Arc<P>,
    pool: Arc<CrossShardPool>,
    bus: Option<Arc<dyn EventPublisher>>,
    local: ShardId,
    outstanding: BTreeMap<(ShardId, u64), OutstandingRequest>,
    workers: JoinSet<()>,
    status: SyncStatus,
}

impl<B, S, P> CrossShardSyncProcess<B, S, P>
where
    B: BeaconView + 'static,
    S: ShardView + 'static,
    P: CrossShardPeers + 'static,
{
    pub fn new(
        config: SyncConfig,
        beacon: Arc<B>,
        shard: Arc<S>,
        peers: Arc<P>,
        pool: Arc<CrossShardPool>,
    ) -> Self {
        let local = shard.shard_id();
        Self {
            config,
            beacon,
            shard,
            peers,
            pool,
            bus: None,
            local,
            outstanding: BTreeMap::new(),
            workers: JoinSet::new(),
            status: SyncStatus {
                shard_id: local,
                ..SyncStatus::default()
            },
        }
    }

    /// Publish `CrossShardPayloadValidated` events on `bus`.
    pub fn with_event_bus(mut self, bus: Arc<dyn EventPublisher>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn spawn(self) -> (SyncHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(self.config.command_capacity);
        let handle = SyncHandle {
            commands: tx.clone(),
            pool: Arc::clone(&self.pool),
        };
        let notify = tx.downgrade();
        drop(tx);
        let join = tokio::spawn(self.run(rx, notify));
        (handle, join)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<SyncCommand>, notify: mpsc::WeakSender<SyncCommand>) {
        info!(shard = self.local, "[xshard] Sync process started");
        let mut wake = Instant::now();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SyncCommand::Poke) => wake = Instant::now(),
                    Some(SyncCommand::PayloadArrived { from_shard, height }) => {
                        self.validate_pending(from_shard, height).await;
                    }
                    Some(SyncCommand::Status(reply)) => {
                        let _ = reply.send(self.snapshot());
                    }
                    Some(SyncCommand::Shutdown) | None => break,
                },
                _ = tokio::time::sleep_until(wake) => {
                    let pause = self.iterate(&notify).await;
                    wake = Instant::now() + pause;
                }
                Some(joined) = self.workers.join_next(), if !self.workers.is_empty() => {
                    if let Err(err) = joined {
                        if err.is_panic() {
                            warn!(shard = self.local, "[xshard] Pull worker panicked");
                        }
                    }
                }
            }
        }

        self.drain(&mut commands).await;
    }

    /// One discovery, expiry and request pass. Returns how long to sleep.
    async fn iterate(&mut self, notify: &mpsc::WeakSender<SyncCommand>) -> Duration {
        self.status.iterations += 1;
        let mut back_off = false;

        let active = self.beacon.active_shards().await;
        for from in 0..active {
            let Ok(from) = ShardId::try_from(from) else { break };
            if from == self.local {
                continue;
            }
            if let Err(err) = self.discover(from).await {
                back_off |= err.should_back_off();
                warn!(shard = self.local, from, "[xshard] Discovery failed: {}", err);
            }
        }

        let pool = &self.pool;
        self.outstanding.retain(|_, request| !pool.has(&request.hash));
        self.expire();
        let stale = self.pool.expire_pending(self.config.request_deadline);
        if stale > 0 {
            debug!(shard = self.local, stale, "[xshard] Dropped stale pending payloads");
        }

        if let Err(err) = self.issue_requests(notify).await {
            back_off |= err.should_back_off();
            warn!(shard = self.local, "[xshard] Request failed: {}", err);
        }

        self.status.backing_off = back_off;
        metrics::set_sizes(self.outstanding.len(), self.pool.len());

        if back_off || self.outstanding.is_empty() {
            self.config.idle_sleep
        } else {
            self.config.active_sleep
        }
    }

    /// Record requests for confirmed heights of `from` not yet held.
    async fn discover(&mut self, from: ShardId) -> CrossShardResult<()> {
        let last = self.shard.last_requested_height(from).await;
        let mut start = last.saturating_add(1);

        for _ in 0..self.config.max_heights_per_request {
            let height = self
                .beacon
                .next_cross_shard_height(from, self.local, start)
                .await?;
            if height == 0 || height < start {
                break;
            }
            start = height.saturating_add(1);
            if self.outstanding.contains_key(&(from, height)) {
                continue;
            }

            let Some(block) = self.beacon.confirming_block(from, height).await? else {
                debug!(from, height, "[xshard] Confirming beacon block not available yet");
                break;
            };
            let body = BeaconBody::decode(&block.body)?;
            let Some(entry) = body.shard_entry(from, height) else {
                return Err(CrossShardError::unverified(
                    height,
                    format!("beacon block {} has no entry for shard {}", block.height(), from),
                ));
            };
            if self.pool.has(&entry.hash) {
                continue;
            }

            let request = OutstandingRequest::new(from, height, entry.hash, block.height(), Instant::now());
            debug!(
                id = %request.id,
                from,
                height,
                beacon_height = block.height(),
                hash = %hex_short(&entry.hash),
                "[xshard] Recorded request"
            );
            self.outstanding.insert((from, height), request);
            // A gossiped copy may already be waiting.
            self.validate_pending(from, height).await;
        }
        Ok(())
    }

    fn expire(&mut self) {
        let now = Instant::now();
        let deadline = self.config.request_deadline;
        let expired: Vec<(ShardId, u64)> = self
            .outstanding
            .iter()
            .filter(|(_, request)| request.is_expired(now, deadline))
            .map(|(key, _)| *key)
            .collect();
        for key in expired {
            if let Some(request) = self.outstanding.remove(&key) {
                warn!(
                    id = %request.id,
                    from = request.from_shard,
                    height = request.height,
                    attempts = request.attempts,
                    "[xshard] Request expired"
                );
                self.status.expired += 1;
                metrics::record_expired();
            }
        }
    }

    async fn issue_requests(&mut self, notify: &mpsc::WeakSender<SyncCommand>) -> CrossShardResult<()> {
        let now = Instant::now();
        let mut by_source: BTreeMap<ShardId, Vec<u64>> = BTreeMap::new();
        for ((from, height), request) in &self.outstanding {
            if request.should_send(now, self.config.reissue_after) {
                by_source.entry(*from).or_default().push(*height);
            }
        }

        let mut result = Ok(());
        for (from, heights) in by_source {
            let request = CrossShardRequest {
                shard_from: from,
                shard_to: self.local,
                heights: heights.clone(),
            };
            let receiver = match self.peers.request_cross_shard(request).await {
                Ok(receiver) => receiver,
                Err(err) => {
                    result = Err(err.into());
                    continue;
                }
            };

            for height in &heights {
                if let Some(outstanding) = self.outstanding.get_mut(&(from, *height)) {
                    if outstanding.attempts > 0 {
                        debug!(id = %outstanding.id, from, height, "[xshard] Re-issuing request");
                    }
                    outstanding.mark_sent(now);
                }
            }
            self.status.requests_sent += 1;
            metrics::record_request();

            let Some(notify) = notify.upgrade() else { continue };
            let deadline = now + self.config.request_deadline;
            let pull = Pull {
                from,
                heights,
                deadline,
            };
            self.workers
                .spawn(receive_payloads(Arc::clone(&self.pool), receiver, notify, pull));
        }
        result
    }

    /// Validate pending payloads for `(from, height)` against the recorded
    /// confirmation. Without one the payloads stay pending.
    async fn validate_pending(&mut self, from: ShardId, height: u64) {
        let Some(request) = self.outstanding.get(&(from, height)).cloned() else {
            debug!(from, height, "[xshard] Holding payload without a confirmed request");
            return;
        };

        for payload in self.pool.pending_at(from, height) {
            let hash = payload.source_block_hash();
            match request.validate(&payload, self.local) {
                Ok(()) => {
                    self.pool.mark_validated(&payload);
                    self.outstanding.remove(&(from, height));
                    self.status.validated += 1;
                    metrics::record_payload("validated");
                    info!(
                        id = %request.id,
                        from,
                        height,
                        attempts = request.attempts,
                        "[xshard] Payload validated"
                    );
                    if let Some(bus) = &self.bus {
                        bus.publish(NodeEvent::CrossShardPayloadValidated {
                            from_shard: from,
                            to_shard: self.local,
                            height,
                            hash,
                        })
                        .await;
                    }
                    return;
                }
                Err(err) => {
                    self.pool.reject_pending(&payload);
                    self.status.rejected += 1;
                    metrics::record_payload("rejected");
                    warn!(id = %request.id, from, height, "[xshard] Rejected payload: {}", err);
                }
            }
        }
    }

    fn snapshot(&self) -> SyncStatus {
        SyncStatus {
            outstanding: self.outstanding.keys().copied().collect(),
            ..self.status.clone()
        }
    }

    async fn drain(&mut self, commands: &mut mpsc::Receiver<SyncCommand>) {
        commands.close();
        while let Ok(command) = commands.try_recv() {
            match command {
                SyncCommand::PayloadArrived { from_shard, height } => {
                    self.validate_pending(from_shard, height).await;
                }
                SyncCommand::Status(reply) => {
                    let _ = reply.send(self.snapshot());
                }
                SyncCommand::Poke | SyncCommand::Shutdown => {}
            }
        }
        self.workers.shutdown().await;
        let dropped = self.outstanding.len();
        self.outstanding.clear();
        info!(shard = self.local, dropped, "[xshard] Sync process stopped");
    }
}

/// What one pull asked peers for.
struct Pull {
    from: ShardId,
    heights: Vec<u64>,
    deadline: Instant,
}

/// Feed one peer response stream into the pool until it closes or the
/// request deadline passes. Payloads for heights the pull did not ask for
/// are dropped.
async fn receive_payloads(
    pool: Arc<CrossShardPool>,
    mut receiver: mpsc::Receiver<CrossShardPayload>,
    notify: mpsc::Sender<SyncCommand>,
    pull: Pull,
) {
    loop {
        let payload = match tokio::time::timeout_at(pull.deadline, receiver.recv()).await {
            Ok(Some(payload)) => payload,
            Ok(None) => break,
            Err(_) => {
                debug!("[xshard] Pull deadline reached");
                break;
            }
        };
        let Some(from_shard) = payload.from_shard_id() else { continue };
        let height = payload.source_block_height();
        if from_shard != pull.from || !pull.heights.contains(&height) {
            debug!(from = from_shard, height, "[xshard] Ignoring unrequested payload");
            continue;
        }
        match pool.add_pending(payload) {
            Ok(_) => {
                if notify
                    .send(SyncCommand::PayloadArrived { from_shard, height })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Err(err) => warn!(from = from_shard, height, "[xshard] Dropping received payload: {}", err),
        }
    }
}
