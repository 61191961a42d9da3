use dashmap::{DashMap, DashSet};
use futures::future::join_all;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::types::*;
use crate::chunk::protocol::BlockMessage;
use crate::config::ClusterConfig;
use crate::error::{ClusterError, Result};
use crate::membership::registry::NodeRegistry;
use crate::membership::types::NodeId;
use crate::transport::BlockTransport;

/// Owner of the authoritative file → blocks → replica-set tables.
pub struct PlacementEngine {
    files: DashMap<FileId, File>,
    blocks: DashMap<BlockId, Block>,
    /// Nodes that were pushed a block whose placement is not committed yet.
    /// They must not be told to delete it in the meantime.
    in_flight: DashMap<BlockId, BTreeSet<NodeId>>,
    /// Blocks below the replication factor, with the instant they were flagged.
    under_replicated: DashMap<BlockId, Instant>,
    /// Blocks a repair worker is currently re-placing.
    repairing: DashSet<BlockId>,
    registry: Arc<NodeRegistry>,
    transport: Arc<dyn BlockTransport>,
    block_size: usize,
    replication_factor: usize,
    transfer_timeout: Duration,
}

impl PlacementEngine {
    pub fn new(
        registry: Arc<NodeRegistry>,
        transport: Arc<dyn BlockTransport>,
        config: &ClusterConfig,
    ) -> Self {
        Self {
            files: DashMap::new(),
            blocks: DashMap::new(),
            in_flight: DashMap::new(),
            under_replicated: DashMap::new(),
            repairing: DashSet::new(),
            registry,
            transport,
            block_size: config.block_size,
            replication_factor: config.replication_factor,
            transfer_timeout: config.transfer_timeout(),
        }
    }

    pub fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Registers file metadata ahead of ingestion. Returns `false` if a file with
    /// the same identity already exists, in which case nothing changes.
    pub fn add_file(&self, file: File) -> bool {
        let mut inserted = false;
        self.files.entry(file.id.clone()).or_insert_with(|| {
            inserted = true;
            file
        });
        inserted
    }

    /// Splits the blob into blocks and places each on `replication_factor`
    /// healthy nodes.
    ///
    /// The file only gains its block sequence once every block is fully
    /// replicated; any failure marks the file `Failed` and leaves no block
    /// attached to it. Copies already pushed for an aborted ingestion become dead
    /// blocks on their nodes and are cleaned up by the next heartbeats.
    pub async fn ingest(&self, blob: Blob) -> Result<File> {
        self.add_file(File {
            id: blob.file_id.clone(),
            name: blob.name.clone(),
            length: blob.length,
            blocks: Vec::new(),
            state: FileState::Ingesting,
            created_at: now_ms(),
        });

        if let Some(file) = self.files.get(&blob.file_id)
            && file.is_available()
        {
            tracing::debug!("File {} already ingested", file.id);
            return Ok(file.clone());
        }

        tracing::info!(
            "Ingesting file {} ({}, {} bytes) with block size {}",
            blob.file_id,
            blob.name,
            blob.content.len(),
            self.block_size
        );

        let mut placed: Vec<Block> = Vec::new();
        for (index, chunk) in blob.content.chunks(self.block_size).enumerate() {
            let message = BlockMessage::new(BlockId::new(), chunk.to_vec());

            match self
                .place(&message, self.replication_factor, &BTreeSet::new())
                .await
            {
                Ok(replicas) => placed.push(Block {
                    id: message.block_id.clone(),
                    file_id: blob.file_id.clone(),
                    index,
                    checksum: message.checksum.clone(),
                    size: message.data.len() as u64,
                    replicas: replicas.into_iter().collect(),
                }),
                Err(e) => {
                    self.abort_ingestion(&blob.file_id, &placed, &e);
                    return Err(e);
                }
            }
        }

        self.commit_ingestion(&blob.file_id, placed)
    }

    fn commit_ingestion(&self, file_id: &FileId, placed: Vec<Block>) -> Result<File> {
        let block_ids: Vec<BlockId> = placed.iter().map(|block| block.id.clone()).collect();

        for block in placed {
            let targets: Vec<NodeId> = block.replicas.iter().copied().collect();
            let id = block.id.clone();
            self.blocks.insert(id.clone(), block);
            self.release_in_flight(&id, &targets);
        }

        let mut file = self
            .files
            .get_mut(file_id)
            .ok_or_else(|| ClusterError::UnknownFile(file_id.clone()))?;
        file.blocks = block_ids;
        file.state = FileState::Available;

        tracing::info!(
            "File {} ({}) available with {} blocks",
            file.id,
            file.name,
            file.blocks.len()
        );
        Ok(file.clone())
    }

    fn abort_ingestion(&self, file_id: &FileId, placed: &[Block], cause: &ClusterError) {
        for block in placed {
            let targets: Vec<NodeId> = block.replicas.iter().copied().collect();
            self.release_in_flight(&block.id, &targets);
        }

        if let Some(mut file) = self.files.get_mut(file_id) {
            file.state = FileState::Failed {
                reason: cause.to_string(),
            };
        }

        tracing::error!(
            "Ingestion of file {} aborted after {} placed blocks: {}",
            file_id,
            placed.len(),
            cause
        );
    }

    /// Selects `count` nodes outside `exclude` and pushes the block to all of
    /// them. On success the targets stay registered as in-flight until the
    /// caller commits them.
    async fn place(
        &self,
        message: &BlockMessage,
        count: usize,
        exclude: &BTreeSet<NodeId>,
    ) -> Result<Vec<NodeId>> {
        let targets = self.registry.select_nodes(count, exclude)?;
        self.in_flight
            .entry(message.block_id.clone())
            .or_default()
            .extend(targets.iter().copied());

        let results = join_all(targets.iter().map(|node| self.push_to(*node, message))).await;

        let failures: Vec<String> = targets
            .iter()
            .zip(results)
            .filter_map(|(node, result)| result.err().map(|e| format!("{}: {}", node, e)))
            .collect();

        if !failures.is_empty() {
            self.release_in_flight(&message.block_id, &targets);
            return Err(ClusterError::PlacementFailed {
                block: message.block_id.clone(),
                reason: failures.join("; "),
            });
        }

        tracing::debug!("Block {} pushed to {:?}", message.block_id, targets);
        Ok(targets)
    }

    async fn push_to(&self, node: NodeId, message: &BlockMessage) -> anyhow::Result<()> {
        let addr = self
            .registry
            .address_of(node)
            .ok_or_else(|| anyhow::anyhow!("{} has no known address", node))?;

        tokio::time::timeout(self.transfer_timeout, self.transport.push_block(&addr, message))
            .await
            .map_err(|_| anyhow::anyhow!("push to {} timed out", addr))?
    }

    fn release_in_flight(&self, block_id: &BlockId, nodes: &[NodeId]) {
        if let Some(mut pending) = self.in_flight.get_mut(block_id) {
            for node in nodes {
                pending.remove(node);
            }
        }
        self.in_flight.remove_if(block_id, |_, pending| pending.is_empty());
    }

    fn is_in_flight(&self, block_id: &BlockId, node: NodeId) -> bool {
        self.in_flight
            .get(block_id)
            .map(|pending| pending.contains(&node))
            .unwrap_or(false)
    }

    /// Diffs a node's reported inventory against the authoritative replica sets.
    ///
    /// Read-only: the same report against unchanged state always yields the same
    /// instructions. Output lists are sorted by block id.
    pub fn reconcile(&self, node: NodeId, reported: &[BlockId]) -> RepairInstructions {
        let reported: HashSet<&BlockId> = reported.iter().collect();

        let mut expected: Vec<Block> = self
            .blocks
            .iter()
            .filter(|entry| entry.value().replicas.contains(&node))
            .map(|entry| entry.value().clone())
            .collect();
        expected.sort_by(|a, b| a.id.cmp(&b.id));

        let expected_ids: HashSet<&BlockId> = expected.iter().map(|block| &block.id).collect();

        let mut dead_blocks: Vec<BlockId> = reported
            .iter()
            .filter(|id| !expected_ids.contains(*id) && !self.is_in_flight(id, node))
            .map(|id| (*id).clone())
            .collect();
        dead_blocks.sort();

        let mut sync_blocks = Vec::new();
        let mut no_live_source = Vec::new();

        for block in expected.iter().filter(|block| !reported.contains(&block.id)) {
            let source = block
                .replicas
                .iter()
                .filter(|replica| **replica != node && self.registry.is_healthy(**replica))
                .find_map(|replica| {
                    self.registry
                        .address_of(*replica)
                        .map(|addr| (*replica, addr))
                });

            match source {
                Some((source, source_addr)) => sync_blocks.push(SyncBlock {
                    block_id: block.id.clone(),
                    checksum: block.checksum.clone(),
                    size: block.size,
                    source,
                    source_addr,
                }),
                None => no_live_source.push(block.id.clone()),
            }
        }

        RepairInstructions {
            dead_blocks,
            sync_blocks,
            no_live_source,
        }
    }

    /// Handles a node's acknowledgement that it copied a block.
    ///
    /// Returns whether the node is part of the replica set afterwards. A node
    /// outside the set is only admitted while the set is below the replication
    /// factor; otherwise the copy stays unattributed and will be reported dead.
    pub fn confirm_sync(&self, node: NodeId, block_id: &BlockId, checksum: &str) -> Result<bool> {
        if !self.registry.contains(node) {
            return Err(ClusterError::UnknownNode(node));
        }

        let mut block = self
            .blocks
            .get_mut(block_id)
            .ok_or_else(|| ClusterError::UnknownBlock(block_id.clone()))?;

        if block.checksum != checksum {
            return Err(ClusterError::ChecksumMismatch {
                block: block_id.clone(),
                expected: block.checksum.clone(),
                actual: checksum.to_string(),
            });
        }

        if block.replicas.contains(&node) {
            tracing::debug!("{} confirmed restored copy of block {}", node, block_id);
            return Ok(true);
        }

        if block.replicas.len() >= self.replication_factor {
            tracing::debug!(
                "Ignoring sync of block {} by {}: replica set already complete",
                block_id,
                node
            );
            return Ok(false);
        }

        block.replicas.insert(node);
        tracing::info!(
            "{} joined replica set of block {} ({} replicas)",
            node,
            block_id,
            block.replicas.len()
        );

        if self.live_replicas(&block.replicas) >= self.replication_factor {
            self.under_replicated.remove(block_id);
        }
        Ok(true)
    }

    /// Flags every block replicated on `node` for re-placement. Called when the
    /// health sweep declares the node unhealthy.
    pub fn mark_node_lost(&self, node: NodeId) -> Vec<BlockId> {
        let mut affected: Vec<BlockId> = self
            .blocks
            .iter()
            .filter(|entry| entry.value().replicas.contains(&node))
            .map(|entry| entry.key().clone())
            .collect();
        affected.sort();

        self.flag_for_replacement(&affected);

        if !affected.is_empty() {
            tracing::warn!("{} lost: {} blocks under-replicated", node, affected.len());
        }
        affected
    }

    pub fn flag_for_replacement(&self, block_ids: &[BlockId]) {
        let now = Instant::now();
        for id in block_ids {
            self.under_replicated.entry(id.clone()).or_insert(now);
        }
    }

    pub fn is_under_replicated(&self, block_id: &BlockId) -> bool {
        self.under_replicated.contains_key(block_id)
    }

    /// Flagged blocks among `reported`, i.e. those the reporting node can serve
    /// as a source for.
    pub fn under_replicated_among(&self, reported: &[BlockId]) -> Vec<BlockId> {
        if self.under_replicated.is_empty() {
            return Vec::new();
        }
        reported
            .iter()
            .filter(|id| self.under_replicated.contains_key(*id))
            .cloned()
            .collect()
    }

    pub fn under_replicated_blocks(&self) -> Vec<BlockId> {
        let mut ids: Vec<BlockId> = self
            .under_replicated
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Restores one flagged block to the replication factor.
    ///
    /// Content is fetched (checksum-verified) from a healthy replica and pushed to
    /// freshly selected nodes through the same path as ingestion. On success the
    /// unhealthy members are replaced by the new nodes. Returns the nodes added;
    /// empty when there was nothing to do or another worker holds the block.
    pub async fn repair_block(&self, block_id: &BlockId) -> Result<Vec<NodeId>> {
        if !self.repairing.insert(block_id.clone()) {
            return Ok(Vec::new());
        }
        let _claim = RepairClaim {
            repairing: &self.repairing,
            block_id: block_id.clone(),
        };

        let block = self
            .blocks
            .get(block_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ClusterError::UnknownBlock(block_id.clone()))?;

        let (live, lost): (Vec<NodeId>, Vec<NodeId>) = block
            .replicas
            .iter()
            .partition(|node| self.registry.is_healthy(**node));

        if live.is_empty() {
            tracing::error!("Block {} has no healthy replica left", block_id);
            return Err(ClusterError::NoLiveSource(block_id.clone()));
        }

        let missing = self.replication_factor.saturating_sub(live.len());
        let targets = if missing == 0 {
            Vec::new()
        } else {
            let message = self.fetch_from_replicas(&block, &live).await?;
            self.place(&message, missing, &block.replicas).await?
        };

        // Each new target takes the place of one lost member, even if that member
        // came back while the push was running; its copy is then reported dead.
        let (replaced, remaining) = lost.split_at(targets.len().min(lost.len()));

        if let Some(mut entry) = self.blocks.get_mut(block_id) {
            for node in replaced {
                entry.replicas.remove(node);
            }
            entry.replicas.extend(targets.iter().copied());

            for node in remaining {
                if !self.registry.is_healthy(*node)
                    && self.live_replicas(&entry.replicas) >= self.replication_factor
                {
                    entry.replicas.remove(node);
                }
            }

            if self.live_replicas(&entry.replicas) >= self.replication_factor {
                self.under_replicated.remove(block_id);
            }
        }
        self.release_in_flight(block_id, &targets);

        if !targets.is_empty() {
            tracing::info!(
                "Re-placed block {} onto {:?} (replacing {:?})",
                block_id,
                targets,
                replaced
            );
        }
        Ok(targets)
    }

    async fn fetch_from_replicas(&self, block: &Block, sources: &[NodeId]) -> Result<BlockMessage> {
        for source in sources {
            let Some(addr) = self.registry.address_of(*source) else {
                continue;
            };

            let fetched = tokio::time::timeout(
                self.transfer_timeout,
                self.transport.fetch_block(&addr, &block.id),
            )
            .await;

            match fetched {
                Ok(Ok(message)) => match message.verify(Some(&block.checksum)) {
                    Ok(()) => return Ok(message),
                    Err(e) => tracing::warn!("Copy of block {} on {} is corrupt: {}", block.id, source, e),
                },
                Ok(Err(e)) => tracing::warn!("Failed to fetch block {} from {}: {}", block.id, source, e),
                Err(_) => tracing::warn!("Fetching block {} from {} timed out", block.id, source),
            }
        }

        Err(ClusterError::NoLiveSource(block.id.clone()))
    }

    fn live_replicas(&self, replicas: &BTreeSet<NodeId>) -> usize {
        replicas
            .iter()
            .filter(|node| self.registry.is_healthy(**node))
            .count()
    }

    /// Files ordered by creation time.
    pub fn list_files(&self) -> Vec<File> {
        let mut files: Vec<File> = self.files.iter().map(|entry| entry.value().clone()).collect();
        files.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        files
    }

    pub fn get_file(&self, file_id: &FileId) -> Option<File> {
        self.files.get(file_id).map(|entry| entry.value().clone())
    }

    pub fn get_block(&self, block_id: &BlockId) -> Option<Block> {
        self.blocks.get(block_id).map(|entry| entry.value().clone())
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

/// Releases a repair claim when the repair finishes, whatever the outcome.
struct RepairClaim<'a> {
    repairing: &'a DashSet<BlockId>,
    block_id: BlockId,
}

impl Drop for RepairClaim<'_> {
    fn drop(&mut self) {
        self.repairing.remove(&self.block_id);
    }
}
