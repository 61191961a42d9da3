//! Block Transfer Protocol
//!
//! Endpoints served by every chunk server and the payload used both for initial
//! placement pushes and for sync fetches. Bodies are bincode-encoded
//! `BlockMessage`s sent as `application/octet-stream`.

use serde::{Deserialize, Serialize};

use crate::error::{ClusterError, Result};
use crate::placement::types::{BlockId, checksum};

/// `PUT` stores a block, `GET` reads one. Followed by `/{block_id}`.
pub const ENDPOINT_BLOCKS: &str = "/blocks";

pub const CONTENT_TYPE_BLOCK: &str = "application/octet-stream";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockMessage {
    pub block_id: BlockId,
    pub data: Vec<u8>,
    pub checksum: String,
}

impl BlockMessage {
    pub fn new(block_id: BlockId, data: Vec<u8>) -> Self {
        let checksum = checksum(&data);
        Self {
            block_id,
            data,
            checksum,
        }
    }

    /// Checks the payload against its own checksum and, if given, against the
    /// checksum the receiver expects.
    pub fn verify(&self, expected: Option<&str>) -> Result<()> {
        let actual = checksum(&self.data);
        let wanted = expected.unwrap_or(&self.checksum);
        if actual != wanted || actual != self.checksum {
            return Err(ClusterError::ChecksumMismatch {
                block: self.block_id.clone(),
                expected: wanted.to_string(),
                actual,
            });
        }
        Ok(())
    }

    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

pub fn block_url(addr: &str, block_id: &BlockId) -> String {
    format!("http://{}{}/{}", addr, ENDPOINT_BLOCKS, block_id)
}
