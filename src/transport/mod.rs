//! Transport Abstractions
//!
//! The core talks to other processes only through the two traits defined here, so
//! the master and the agent can be driven in-process by tests and over HTTP in
//! production.
//!
//! - **`BlockTransport`**: moves block content to and from chunk servers
//!   (placement pushes, re-placement, sync fetches). Calls carry the transfer
//!   timeout.
//! - **`MasterApi`**: the calls a chunk agent makes to the master. Calls carry the
//!   heartbeat timeout.

pub mod http;
pub mod master_client;

use async_trait::async_trait;

use crate::chunk::protocol::BlockMessage;
use crate::error::Result;
use crate::master::protocol::{
    HeartbeatMessage, HeartbeatResponse, RegistrationMessage, SyncDoneMessage,
};
use crate::membership::types::NodeId;
use crate::placement::types::BlockId;

#[async_trait]
pub trait BlockTransport: Send + Sync {
    /// Stores `block` on the chunk server at `addr`.
    async fn push_block(&self, addr: &str, block: &BlockMessage) -> anyhow::Result<()>;

    /// Reads a block from the chunk server at `addr`.
    async fn fetch_block(&self, addr: &str, block_id: &BlockId) -> anyhow::Result<BlockMessage>;
}

#[async_trait]
pub trait MasterApi: Send + Sync {
    async fn register(&self, msg: RegistrationMessage) -> Result<NodeId>;

    async fn heartbeat(&self, msg: HeartbeatMessage) -> Result<HeartbeatResponse>;

    async fn sync_done(&self, msg: SyncDoneMessage) -> Result<()>;
}
