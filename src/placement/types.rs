use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;

use crate::membership::types::NodeId;

/// Unique identifier of a block, a UUID v4 string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub String);

impl BlockId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for BlockId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier of a file, a UUID v4 string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub String);

impl FileId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// SHA-256 of `data`, hex encoded.
pub fn checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum FileState {
    /// Metadata registered, blocks not yet placed.
    Ingesting,
    /// Every block reached the replication factor.
    Available,
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct File {
    pub id: FileId,
    pub name: String,
    pub length: u64,
    /// Ordered block sequence. Filled in one step when ingestion succeeds and
    /// never modified afterwards.
    pub blocks: Vec<BlockId>,
    pub state: FileState,
    pub created_at: u64,
}

impl File {
    pub fn new(name: impl Into<String>, length: u64) -> Self {
        Self {
            id: FileId::new(),
            name: name.into(),
            length,
            blocks: Vec::new(),
            state: FileState::Ingesting,
            created_at: now_ms(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.state == FileState::Available
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub file_id: FileId,
    /// Position within the owning file.
    pub index: usize,
    pub checksum: String,
    pub size: u64,
    /// Nodes authoritatively assigned to hold this block.
    pub replicas: BTreeSet<NodeId>,
}

/// One upload, consumed exactly once by ingestion.
#[derive(Debug, Clone)]
pub struct Blob {
    pub file_id: FileId,
    pub name: String,
    pub length: u64,
    pub content: Vec<u8>,
}

impl Blob {
    pub fn new(file: &File, content: Vec<u8>) -> Self {
        Self {
            file_id: file.id.clone(),
            name: file.name.clone(),
            length: content.len() as u64,
            content,
        }
    }
}

/// Instruction for a node to fetch a block it is expected to hold.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncBlock {
    pub block_id: BlockId,
    pub checksum: String,
    pub size: u64,
    pub source: NodeId,
    pub source_addr: String,
}

/// Result of diffing one node's report against the authoritative state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairInstructions {
    /// Held by the node but not attributed to it.
    pub dead_blocks: Vec<BlockId>,
    /// Attributed to the node but not held, with a live source to copy from.
    pub sync_blocks: Vec<SyncBlock>,
    /// Attributed to the node but not held, and no other healthy replica
    /// exists. These need re-placement rather than a node-to-node copy.
    pub no_live_source: Vec<BlockId>,
}

impl RepairInstructions {
    pub fn is_empty(&self) -> bool {
        self.dead_blocks.is_empty() && self.sync_blocks.is_empty() && self.no_live_source.is_empty()
    }
}

pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
