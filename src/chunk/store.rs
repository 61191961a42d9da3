//! Local Block Stores
//!
//! The capability a chunk server uses to keep block bytes: list, measure, store,
//! read and delete. Stores verify a block's checksum before committing it, so a
//! corrupt transfer never lands on disk.

use async_trait::async_trait;
use dashmap::DashMap;
use std::io;
use std::path::{Path, PathBuf};

use super::protocol::BlockMessage;
use crate::error::Result;
use crate::placement::types::BlockId;

const DATA_EXT: &str = "blk";
const CHECKSUM_EXT: &str = "sum";

#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Identifiers of every block present, sorted.
    async fn list_blocks(&self) -> Result<Vec<BlockId>>;

    /// Total bytes of block data held.
    async fn utilization(&self) -> Result<u64>;

    /// Verifies and stores a block. Storing an existing block overwrites it.
    async fn put_block(&self, block: BlockMessage) -> Result<()>;

    async fn get_block(&self, block_id: &BlockId) -> Result<Option<BlockMessage>>;

    /// Returns `false` if the block was not present.
    async fn delete_block(&self, block_id: &BlockId) -> Result<bool>;
}

/// One data file plus one checksum sidecar per block, flat in `data_dir`.
pub struct FsBlockStore {
    data_dir: PathBuf,
}

impl FsBlockStore {
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&data_dir).await?;
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn path_for(&self, block_id: &BlockId, ext: &str) -> Result<PathBuf> {
        let valid = !block_id.0.is_empty()
            && block_id
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid block id {:?}", block_id.0),
            )
            .into());
        }
        Ok(self.data_dir.join(format!("{}.{}", block_id.0, ext)))
    }

    /// Write to a temp file, then rename into place.
    async fn atomic_write(dest: &Path, data: &[u8]) -> io::Result<()> {
        let tmp = dest.with_extension(format!(
            "{}.tmp",
            dest.extension().and_then(|e| e.to_str()).unwrap_or_default()
        ));
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, dest).await
    }
}

#[async_trait]
impl BlockStore for FsBlockStore {
    async fn list_blocks(&self) -> Result<Vec<BlockId>> {
        let mut entries = tokio::fs::read_dir(&self.data_dir).await?;
        let mut blocks = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(DATA_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                blocks.push(BlockId(stem.to_string()));
            }
        }

        blocks.sort();
        Ok(blocks)
    }

    async fn utilization(&self) -> Result<u64> {
        let mut entries = tokio::fs::read_dir(&self.data_dir).await?;
        let mut total = 0u64;

        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().and_then(|e| e.to_str()) == Some(DATA_EXT) {
                total += entry.metadata().await?.len();
            }
        }
        Ok(total)
    }

    async fn put_block(&self, block: BlockMessage) -> Result<()> {
        block.verify(None)?;
        let data_path = self.path_for(&block.block_id, DATA_EXT)?;
        let sum_path = self.path_for(&block.block_id, CHECKSUM_EXT)?;

        // Checksum first: a listed data file always has its sidecar.
        Self::atomic_write(&sum_path, block.checksum.as_bytes()).await?;
        Self::atomic_write(&data_path, &block.data).await?;

        tracing::debug!("Stored block {} ({} bytes)", block.block_id, block.data.len());
        Ok(())
    }

    async fn get_block(&self, block_id: &BlockId) -> Result<Option<BlockMessage>> {
        let data_path = self.path_for(block_id, DATA_EXT)?;
        let data = match tokio::fs::read(&data_path).await {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let checksum = tokio::fs::read_to_string(self.path_for(block_id, CHECKSUM_EXT)?).await?;

        Ok(Some(BlockMessage {
            block_id: block_id.clone(),
            data,
            checksum: checksum.trim().to_string(),
        }))
    }

    async fn delete_block(&self, block_id: &BlockId) -> Result<bool> {
        let existed = match tokio::fs::remove_file(self.path_for(block_id, DATA_EXT)?).await {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        match tokio::fs::remove_file(self.path_for(block_id, CHECKSUM_EXT)?).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(existed)
    }
}

/// Volatile store, used for tests and throwaway nodes.
#[derive(Default)]
pub struct MemoryBlockStore {
    blocks: DashMap<BlockId, BlockMessage>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, block_id: &BlockId) -> bool {
        self.blocks.contains_key(block_id)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn list_blocks(&self) -> Result<Vec<BlockId>> {
        let mut blocks: Vec<BlockId> = self.blocks.iter().map(|e| e.key().clone()).collect();
        blocks.sort();
        Ok(blocks)
    }

    async fn utilization(&self) -> Result<u64> {
        Ok(self.blocks.iter().map(|e| e.value().data.len() as u64).sum())
    }

    async fn put_block(&self, block: BlockMessage) -> Result<()> {
        block.verify(None)?;
        self.blocks.insert(block.block_id.clone(), block);
        Ok(())
    }

    async fn get_block(&self, block_id: &BlockId) -> Result<Option<BlockMessage>> {
        Ok(self.blocks.get(block_id).map(|e| e.value().clone()))
    }

    async fn delete_block(&self, block_id: &BlockId) -> Result<bool> {
        Ok(self.blocks.remove(block_id).is_some())
    }
}
