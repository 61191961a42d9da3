//! Master Coordinator
//!
//! Owns the Node Registry and the Placement Engine and composes them into the
//! operations chunk agents and the front-end call.
//!
//! ## Responsibilities
//! - **Per-node serialization**: heartbeats and acknowledgements from the same
//!   node never interleave; different nodes proceed in parallel.
//! - **Health sweep**: once per heartbeat interval, silent nodes are declared
//!   unhealthy and their blocks flagged for re-placement.
//! - **Repair pool**: flagged blocks go through a bounded queue drained by a fixed
//!   number of workers, so a burst of failures applies back-pressure instead of
//!   spawning unbounded transfers.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc};

use super::protocol::*;
use crate::config::ClusterConfig;
use crate::error::Result;
use crate::membership::registry::NodeRegistry;
use crate::membership::types::{Node, NodeId, NodeReport};
use crate::placement::engine::PlacementEngine;
use crate::placement::types::{Blob, BlockId, File, FileId};
use crate::transport::{BlockTransport, MasterApi};

pub struct Master {
    pub registry: Arc<NodeRegistry>,
    pub engine: Arc<PlacementEngine>,
    config: ClusterConfig,
    node_locks: DashMap<NodeId, Arc<Mutex<()>>>,
    repair_tx: mpsc::Sender<BlockId>,
    repair_rx: Arc<Mutex<mpsc::Receiver<BlockId>>>,
    /// Blocks sitting in the repair queue, to avoid queueing one twice.
    queued: DashSet<BlockId>,
    /// Blocks whose last repair attempt failed; repeats are logged at debug.
    failing_repairs: DashSet<BlockId>,
}

impl Master {
    pub fn new(config: ClusterConfig, transport: Arc<dyn BlockTransport>) -> Arc<Self> {
        let registry = Arc::new(NodeRegistry::new(config.health_timeout()));
        let engine = Arc::new(PlacementEngine::new(registry.clone(), transport, &config));
        let (repair_tx, repair_rx) = mpsc::channel(config.repair_queue_capacity);

        Arc::new(Self {
            registry,
            engine,
            config,
            node_locks: DashMap::new(),
            repair_tx,
            repair_rx: Arc::new(Mutex::new(repair_rx)),
            queued: DashSet::new(),
            failing_repairs: DashSet::new(),
        })
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Spawns the health sweep, the repair workers and the status reporter,
    /// then returns.
    pub async fn start(self: Arc<Self>) {
        tracing::info!(
            "Starting master (R={}, block size {}, heartbeat interval {:?})",
            self.config.replication_factor,
            self.config.block_size,
            self.config.heartbeat_interval()
        );

        {
            let master = self.clone();
            tokio::spawn(async move {
                master.health_sweep_loop().await;
            });
        }

        for worker_id in 0..self.config.repair_workers {
            let master = self.clone();
            tokio::spawn(async move {
                master.repair_worker_loop(worker_id).await;
            });
        }

        if self.config.status_report_secs > 0 {
            let master = self.clone();
            tokio::spawn(async move {
                master.status_report_loop().await;
            });
        }

        tracing::info!("Master started with {} repair workers", self.config.repair_workers);
    }

    fn node_lock(&self, node_id: NodeId) -> Arc<Mutex<()>> {
        self.node_locks
            .entry(node_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn register(&self, msg: RegistrationMessage) -> Result<NodeId> {
        self.registry.register(&msg.addr)
    }

    /// Registry update, then diff, then response, all under the node's lock.
    pub async fn heartbeat(&self, msg: HeartbeatMessage) -> Result<HeartbeatResponse> {
        let lock = self.node_lock(msg.node_id);
        let _guard = lock.lock().await;

        let reported = msg.blocks.clone();
        self.registry.heartbeat(
            msg.node_id,
            NodeReport {
                addr: msg.addr,
                blocks: msg.blocks,
                utilization: msg.utilization,
                timestamp: msg.timestamp,
            },
        )?;

        let instructions = self.engine.reconcile(msg.node_id, &reported);

        if !instructions.no_live_source.is_empty() {
            tracing::warn!(
                "{} is missing {} blocks with no live source; flagged for re-placement",
                msg.node_id,
                instructions.no_live_source.len()
            );
            self.engine.flag_for_replacement(&instructions.no_live_source);
        }

        // The reporting node just proved it holds these, so it can act as source.
        for block_id in self.engine.under_replicated_among(&reported) {
            self.enqueue_repair(block_id);
        }

        if !instructions.dead_blocks.is_empty() || !instructions.sync_blocks.is_empty() {
            tracing::info!(
                "{}: {} dead blocks, {} blocks to sync",
                msg.node_id,
                instructions.dead_blocks.len(),
                instructions.sync_blocks.len()
            );
        }

        Ok(HeartbeatResponse {
            dead_blocks: instructions.dead_blocks,
            sync_blocks: instructions.sync_blocks,
        })
    }

    pub async fn sync_done(&self, msg: SyncDoneMessage) -> Result<SyncDoneResponse> {
        let lock = self.node_lock(msg.node_id);
        let _guard = lock.lock().await;

        let replica = self
            .engine
            .confirm_sync(msg.node_id, &msg.block_id, &msg.checksum)?;
        Ok(SyncDoneResponse { replica })
    }

    pub async fn ingest(&self, blob: Blob) -> Result<File> {
        self.engine.ingest(blob).await
    }

    /// Registers the file and ingests `content` in one call.
    pub async fn upload(&self, name: &str, content: Vec<u8>) -> Result<File> {
        let file = File::new(name, content.len() as u64);
        self.engine.add_file(file.clone());
        self.ingest(Blob::new(&file, content)).await
    }

    pub fn list_files(&self) -> Vec<File> {
        self.engine.list_files()
    }

    pub fn get_file(&self, file_id: &FileId) -> Option<File> {
        self.engine.get_file(file_id)
    }

    pub fn list_nodes(&self) -> Vec<Node> {
        self.registry.list_nodes()
    }

    /// One health sweep pass at `now`. Returns the nodes newly declared unhealthy.
    pub fn sweep(&self, now: Instant) -> Vec<NodeId> {
        let lost = self.registry.sweep(now);
        for node in &lost {
            for block_id in self.engine.mark_node_lost(*node) {
                self.enqueue_repair(block_id);
            }
        }
        lost
    }

    /// Queues a block for re-placement. Returns `false` if it was already queued
    /// or the queue is full; either way it stays flagged and a later heartbeat
    /// or sweep will offer it again.
    pub fn enqueue_repair(&self, block_id: BlockId) -> bool {
        if !self.queued.insert(block_id.clone()) {
            return false;
        }
        match self.repair_tx.try_send(block_id) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(block_id))
            | Err(mpsc::error::TrySendError::Closed(block_id)) => {
                tracing::debug!("Repair queue unavailable, deferring block {}", block_id);
                self.queued.remove(&block_id);
                false
            }
        }
    }

    async fn health_sweep_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.heartbeat_interval());

        loop {
            interval.tick().await;
            let lost = self.sweep(Instant::now());
            if !lost.is_empty() {
                let (total, healthy) = self.registry.counts();
                tracing::info!("Cluster now has {}/{} healthy nodes", healthy, total);
            }
        }
    }

    async fn repair_worker_loop(&self, worker_id: usize) {
        tracing::debug!("Repair worker {} started", worker_id);

        loop {
            let next = {
                let mut rx = self.repair_rx.lock().await;
                rx.recv().await
            };
            let Some(block_id) = next else {
                tracing::debug!("Repair queue closed, worker {} exiting", worker_id);
                return;
            };
            self.queued.remove(&block_id);

            if !self.engine.is_under_replicated(&block_id) {
                continue;
            }

            if let Ok(added) = self.repair(&block_id).await {
                if !added.is_empty() {
                    tracing::info!("Worker {} repaired block {}", worker_id, block_id);
                }
            }
        }
    }

    /// Runs one repair attempt for `block_id`.
    ///
    /// A block that keeps failing (no capacity, no live source) is re-queued on
    /// every heartbeat, so only the first failure in a row is logged as a warning.
    pub async fn repair(&self, block_id: &BlockId) -> Result<Vec<NodeId>> {
        let result = self.engine.repair_block(block_id).await;
        match &result {
            Ok(_) => {
                if self.failing_repairs.remove(block_id).is_some() {
                    tracing::info!("Repair of block {} is no longer failing", block_id);
                }
            }
            Err(e) if self.failing_repairs.insert(block_id.clone()) => {
                tracing::warn!("Could not repair block {}: {}", block_id, e);
            }
            Err(e) => {
                tracing::debug!("Repair of block {} still failing: {}", block_id, e);
            }
        }
        result
    }

    pub fn is_repair_failing(&self, block_id: &BlockId) -> bool {
        self.failing_repairs.contains(block_id)
    }

    async fn status_report_loop(&self) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.status_report_secs));

        loop {
            interval.tick().await;
            let (total, healthy) = self.registry.counts();
            tracing::info!(
                "Cluster stats: {}/{} healthy nodes, {} files, {} blocks, {} under-replicated",
                healthy,
                total,
                self.engine.list_files().len(),
                self.engine.block_count(),
                self.engine.under_replicated_blocks().len()
            );
            for node in self.registry.list_nodes() {
                tracing::debug!(
                    "  - {} addr={} health={:?} blocks={} utilization={}",
                    node.id,
                    node.addr,
                    node.health,
                    node.blocks.len(),
                    node.utilization
                );
            }
        }
    }
}

/// In-process access to the master, used when agents share the master's
/// runtime (tests, single-process clusters).
#[async_trait]
impl MasterApi for Master {
    async fn register(&self, msg: RegistrationMessage) -> Result<NodeId> {
        Master::register(self, msg)
    }

    async fn heartbeat(&self, msg: HeartbeatMessage) -> Result<HeartbeatResponse> {
        Master::heartbeat(self, msg).await
    }

    async fn sync_done(&self, msg: SyncDoneMessage) -> Result<()> {
        Master::sync_done(self, msg).await.map(|_| ())
    }
}
