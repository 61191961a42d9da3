//! Error taxonomy shared by the master and the chunk agent.

use thiserror::Error;

use crate::membership::types::NodeId;
use crate::placement::types::{BlockId, FileId};

pub type Result<T> = std::result::Result<T, ClusterError>;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("node address must not be empty")]
    EmptyAddress,

    /// Heartbeat or acknowledgement from an identity the registry never issued.
    /// The agent recovers by registering again.
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    /// Not enough healthy nodes for an all-or-nothing placement.
    #[error("insufficient capacity: {needed} healthy nodes required, {available} eligible")]
    InsufficientCapacity { needed: usize, available: usize },

    #[error("placement of block {block} failed: {reason}")]
    PlacementFailed { block: BlockId, reason: String },

    /// No healthy replica is left to copy a block from.
    #[error("no live source for block {0}")]
    NoLiveSource(BlockId),

    #[error("unknown block {0}")]
    UnknownBlock(BlockId),

    #[error("unknown file {0}")]
    UnknownFile(FileId),

    #[error("checksum mismatch for block {block}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        block: BlockId,
        expected: String,
        actual: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("block store error: {0}")]
    Store(#[from] std::io::Error),
}

impl ClusterError {
    /// Stable machine-readable code carried in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ClusterError::EmptyAddress => "empty_address",
            ClusterError::UnknownNode(_) => "unknown_node",
            ClusterError::InsufficientCapacity { .. } => "insufficient_capacity",
            ClusterError::PlacementFailed { .. } => "placement_failed",
            ClusterError::NoLiveSource(_) => "no_live_source",
            ClusterError::UnknownBlock(_) => "unknown_block",
            ClusterError::UnknownFile(_) => "unknown_file",
            ClusterError::ChecksumMismatch { .. } => "checksum_mismatch",
            ClusterError::Transport(_) => "transport",
            ClusterError::Store(_) => "store",
        }
    }

    pub fn is_unknown_node(&self) -> bool {
        matches!(self, ClusterError::UnknownNode(_))
    }
}

impl From<anyhow::Error> for ClusterError {
    fn from(e: anyhow::Error) -> Self {
        ClusterError::Transport(e.to_string())
    }
}
