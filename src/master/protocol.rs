//! Master Network Protocol
//!
//! Endpoints and DTOs for the calls chunk agents make to the master, plus the
//! status and ingestion entry points consumed by the HTTP front-end. All bodies
//! are JSON.

use serde::{Deserialize, Serialize};

use crate::error::ClusterError;
use crate::membership::types::NodeId;
use crate::placement::types::{BlockId, SyncBlock};

// --- API Endpoints ---

pub const ENDPOINT_REGISTER: &str = "/register";
pub const ENDPOINT_HEARTBEAT: &str = "/heartbeat";
/// Acknowledges that a sync instruction was carried out.
pub const ENDPOINT_SYNC_DONE: &str = "/sync_done";
/// Raw request body is ingested as one file, named by the `name` query parameter.
pub const ENDPOINT_UPLOAD: &str = "/upload";
pub const ENDPOINT_FILES: &str = "/files";
pub const ENDPOINT_NODES: &str = "/nodes";

// --- Data Transfer Objects ---

/// First message from a chunk server, carrying the address it can be reached at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationMessage {
    pub addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub node_id: NodeId,
}

/// Periodic report of a chunk server's true local state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    pub node_id: NodeId,
    pub addr: String,
    pub blocks: Vec<BlockId>,
    /// Bytes stored locally.
    pub utilization: u64,
    /// Agent wall clock, ms since epoch.
    pub timestamp: u64,
}

/// Repair orders computed fresh for this heartbeat.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeartbeatResponse {
    pub dead_blocks: Vec<BlockId>,
    pub sync_blocks: Vec<SyncBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncDoneMessage {
    pub node_id: NodeId,
    pub block_id: BlockId,
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncDoneResponse {
    /// Whether the node is (now) part of the block's replica set.
    pub replica: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadQuery {
    pub name: String,
}

/// Body of every non-2xx response from the master.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    /// Set for `unknown_node` so the client can rebuild the typed error.
    pub node: Option<NodeId>,
}

impl ErrorResponse {
    pub fn from_error(err: &ClusterError) -> Self {
        let node = match err {
            ClusterError::UnknownNode(id) => Some(*id),
            _ => None,
        };
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            node,
        }
    }

    /// Rebuilds the error variants the agent reacts to; everything else is
    /// reported as a transport failure carrying the server's message.
    pub fn into_error(self) -> ClusterError {
        match (self.code.as_str(), self.node) {
            ("unknown_node", Some(id)) => ClusterError::UnknownNode(id),
            ("empty_address", _) => ClusterError::EmptyAddress,
            _ => ClusterError::Transport(self.message),
        }
    }
}
