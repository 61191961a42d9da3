//! Block Synchronization Workers
//!
//! Executes sync instructions handed off by the heartbeat loop. A fixed number of
//! workers drain one bounded queue, so large transfers never delay the next
//! heartbeat and a flood of instructions cannot spawn unbounded work.
//!
//! Each job: fetch from the designated source, verify the checksum, commit to the
//! local store, then acknowledge to the master so the node is counted as a
//! replica.

use dashmap::DashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};

use super::store::BlockStore;
use crate::error::{ClusterError, Result};
use crate::master::protocol::SyncDoneMessage;
use crate::membership::types::NodeId;
use crate::placement::types::{BlockId, SyncBlock};
use crate::transport::{BlockTransport, MasterApi};

#[derive(Debug, Clone)]
pub struct SyncJob {
    /// Identity the agent held when the instruction was issued.
    pub node_id: NodeId,
    pub block: SyncBlock,
}

pub struct SyncWorker {
    store: Arc<dyn BlockStore>,
    transport: Arc<dyn BlockTransport>,
    master: Arc<dyn MasterApi>,
    /// Blocks queued or being synced; shared with the heartbeat loop.
    in_flight: Arc<DashSet<BlockId>>,
    transfer_timeout: Duration,
}

impl SyncWorker {
    pub fn new(
        store: Arc<dyn BlockStore>,
        transport: Arc<dyn BlockTransport>,
        master: Arc<dyn MasterApi>,
        in_flight: Arc<DashSet<BlockId>>,
        transfer_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            transport,
            master,
            in_flight,
            transfer_timeout,
        })
    }

    /// Spawns `workers` tasks sharing `rx` and returns immediately.
    pub fn spawn(self: Arc<Self>, rx: mpsc::Receiver<SyncJob>, workers: usize) {
        let rx = Arc::new(Mutex::new(rx));
        for worker_id in 0..workers {
            let worker = self.clone();
            let rx = rx.clone();
            tokio::spawn(async move {
                worker.worker_loop(worker_id, rx).await;
            });
        }
        tracing::info!("Started {} sync workers", workers);
    }

    async fn worker_loop(&self, worker_id: usize, rx: Arc<Mutex<mpsc::Receiver<SyncJob>>>) {
        loop {
            let next = {
                let mut rx = rx.lock().await;
                rx.recv().await
            };
            let Some(job) = next else {
                tracing::debug!("Sync queue closed, worker {} exiting", worker_id);
                return;
            };

            let block_id = job.block.block_id.clone();
            match self.sync_block(&job).await {
                Ok(()) => tracing::info!(
                    "Synchronized block {} from {}",
                    block_id,
                    job.block.source
                ),
                // Re-offered by the master on a later heartbeat.
                Err(e) => tracing::warn!("Failed to synchronize block {}: {}", block_id, e),
            }
            self.in_flight.remove(&block_id);
        }
    }

    /// Runs one sync job to completion.
    pub async fn sync_block(&self, job: &SyncJob) -> Result<()> {
        let sync = &job.block;

        let message = tokio::time::timeout(
            self.transfer_timeout,
            self.transport.fetch_block(&sync.source_addr, &sync.block_id),
        )
        .await
        .map_err(|_| {
            ClusterError::Transport(format!(
                "fetching block {} from {} timed out",
                sync.block_id, sync.source_addr
            ))
        })??;

        if message.block_id != sync.block_id {
            return Err(ClusterError::Transport(format!(
                "{} answered with block {} instead of {}",
                sync.source_addr, message.block_id, sync.block_id
            )));
        }
        message.verify(Some(&sync.checksum))?;

        self.store.put_block(message).await?;

        self.master
            .sync_done(SyncDoneMessage {
                node_id: job.node_id,
                block_id: sync.block_id.clone(),
                checksum: sync.checksum.clone(),
            })
            .await
    }
}
