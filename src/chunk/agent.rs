//! Chunk Agent
//!
//! The autonomous loop every chunk server runs. On each tick it either registers
//! with the master or, once registered, reports its inventory and applies the
//! repair orders it gets back.

use dashmap::DashSet;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::store::BlockStore;
use super::sync::{SyncJob, SyncWorker};
use crate::config::ChunkConfig;
use crate::master::protocol::{HeartbeatMessage, HeartbeatResponse, RegistrationMessage};
use crate::membership::types::NodeId;
use crate::placement::types::{BlockId, SyncBlock, now_ms};
use crate::transport::{BlockTransport, MasterApi};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Unregistered,
    Registered(NodeId),
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Registered(NodeId),
    RegistrationFailed,
    Heartbeat { deleted: usize, queued: usize },
    HeartbeatFailed,
    /// The master no longer knows this node; it will register again.
    Forgotten,
}

pub struct ChunkAgent {
    config: ChunkConfig,
    state: Mutex<AgentState>,
    store: Arc<dyn BlockStore>,
    master: Arc<dyn MasterApi>,
    sync_worker: Arc<SyncWorker>,
    sync_tx: mpsc::Sender<SyncJob>,
    sync_rx: Mutex<Option<mpsc::Receiver<SyncJob>>>,
    in_flight: Arc<DashSet<BlockId>>,
}

impl ChunkAgent {
    pub fn new(
        config: ChunkConfig,
        store: Arc<dyn BlockStore>,
        master: Arc<dyn MasterApi>,
        transport: Arc<dyn BlockTransport>,
    ) -> Arc<Self> {
        let in_flight = Arc::new(DashSet::new());
        let (sync_tx, sync_rx) = mpsc::channel(config.sync_queue_capacity);
        let sync_worker = SyncWorker::new(
            store.clone(),
            transport,
            master.clone(),
            in_flight.clone(),
            config.transfer_timeout(),
        );

        Arc::new(Self {
            config,
            state: Mutex::new(AgentState::Unregistered),
            store,
            master,
            sync_worker,
            sync_tx,
            sync_rx: Mutex::new(Some(sync_rx)),
            in_flight,
        })
    }

    pub fn state(&self) -> AgentState {
        *self.state.lock()
    }

    pub fn node_id(&self) -> Option<NodeId> {
        match self.state() {
            AgentState::Registered(id) => Some(id),
            AgentState::Unregistered => None,
        }
    }

    /// Blocks queued for or undergoing synchronization.
    pub fn syncing(&self) -> usize {
        self.in_flight.len()
    }

    /// Spawns the sync workers and the heartbeat loop, then returns.
    pub async fn start(self: Arc<Self>) {
        self.start_sync_workers();

        let agent = self.clone();
        tokio::spawn(async move {
            agent.heartbeat_loop().await;
        });
        tracing::info!(
            "Chunk agent {} started (master {})",
            self.config.advertise_addr,
            self.config.master_addr
        );
    }

    /// Spawns the sync worker pool. Only the first call has any effect.
    pub fn start_sync_workers(&self) {
        if let Some(rx) = self.sync_rx.lock().take() {
            self.sync_worker.clone().spawn(rx, self.config.sync_workers);
        }
    }

    async fn heartbeat_loop(&self) {
        let mut interval = tokio::time::interval(self.config.heartbeat_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let outcome = self.tick().await;
            tracing::trace!("Tick: {:?}", outcome);
        }
    }

    /// Runs one step of the registration/heartbeat state machine.
    pub async fn tick(&self) -> TickOutcome {
        match self.state() {
            AgentState::Unregistered => self.try_register().await,
            AgentState::Registered(node_id) => self.send_heartbeat(node_id).await,
        }
    }

    async fn try_register(&self) -> TickOutcome {
        let msg = RegistrationMessage {
            addr: self.config.advertise_addr.clone(),
        };
        let result =
            tokio::time::timeout(self.config.heartbeat_timeout(), self.master.register(msg)).await;

        match result {
            Ok(Ok(node_id)) => {
                *self.state.lock() = AgentState::Registered(node_id);
                tracing::info!(
                    "Registered to master ({}) and got node id {}",
                    self.config.master_addr,
                    node_id
                );
                TickOutcome::Registered(node_id)
            }
            Ok(Err(e)) => {
                tracing::error!("Cannot register to master: {}", e);
                TickOutcome::RegistrationFailed
            }
            Err(_) => {
                tracing::error!("Registration to master timed out");
                TickOutcome::RegistrationFailed
            }
        }
    }

    async fn send_heartbeat(&self, node_id: NodeId) -> TickOutcome {
        // A wrong inventory would trigger spurious repairs, so skip the beat.
        let blocks = match self.store.list_blocks().await {
            Ok(blocks) => blocks,
            Err(e) => {
                tracing::error!("Cannot list chunk blocks: {}", e);
                return TickOutcome::HeartbeatFailed;
            }
        };
        let utilization = match self.store.utilization().await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Cannot compute utilization: {}", e);
                0
            }
        };

        let msg = HeartbeatMessage {
            node_id,
            addr: self.config.advertise_addr.clone(),
            blocks,
            utilization,
            timestamp: now_ms(),
        };
        let result =
            tokio::time::timeout(self.config.heartbeat_timeout(), self.master.heartbeat(msg)).await;

        match result {
            Ok(Ok(response)) => self.apply(node_id, response).await,
            Ok(Err(e)) if e.is_unknown_node() => {
                tracing::warn!("Master does not know {}; registering again", node_id);
                *self.state.lock() = AgentState::Unregistered;
                TickOutcome::Forgotten
            }
            Ok(Err(e)) => {
                tracing::error!("Cannot send heartbeat to master: {}", e);
                TickOutcome::HeartbeatFailed
            }
            Err(_) => {
                tracing::error!("Heartbeat to master timed out");
                TickOutcome::HeartbeatFailed
            }
        }
    }

    async fn apply(&self, node_id: NodeId, response: HeartbeatResponse) -> TickOutcome {
        let deleted = self.delete_dead_blocks(&response.dead_blocks).await;
        let queued = self.queue_sync_blocks(node_id, response.sync_blocks);
        TickOutcome::Heartbeat { deleted, queued }
    }

    /// Best effort: a failed delete is retried when the block is reported dead
    /// again.
    async fn delete_dead_blocks(&self, dead_blocks: &[BlockId]) -> usize {
        let mut deleted = 0;

        for block_id in dead_blocks {
            if self.in_flight.contains(block_id) {
                tracing::debug!("Keeping block {} while it is being synchronized", block_id);
                continue;
            }
            match self.store.delete_block(block_id).await {
                Ok(true) => {
                    deleted += 1;
                    tracing::info!("Deleted inconsistent dead block {}", block_id);
                }
                Ok(false) => {}
                Err(e) => tracing::error!("Cannot delete dead block {}: {}", block_id, e),
            }
        }
        deleted
    }

    /// Hands sync instructions to the worker pool without waiting on them.
    fn queue_sync_blocks(&self, node_id: NodeId, sync_blocks: Vec<SyncBlock>) -> usize {
        if !sync_blocks.is_empty() {
            tracing::info!("Received synchronize commands for {} blocks", sync_blocks.len());
        }

        let mut queued = 0;
        for block in sync_blocks {
            if !self.in_flight.insert(block.block_id.clone()) {
                continue;
            }
            let block_id = block.block_id.clone();
            match self.sync_tx.try_send(SyncJob { node_id, block }) {
                Ok(()) => queued += 1,
                Err(_) => {
                    tracing::debug!("Sync queue full, block {} deferred to a later heartbeat", block_id);
                    self.in_flight.remove(&block_id);
                }
            }
        }
        queued
    }
}
