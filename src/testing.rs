//! In-process stand-ins for the network, shared by unit tests.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;

use crate::chunk::protocol::BlockMessage;
use crate::chunk::store::{BlockStore, MemoryBlockStore};
use crate::placement::types::BlockId;
use crate::transport::BlockTransport;

/// Routes block pushes and fetches to memory stores keyed by address.
#[derive(Default)]
pub struct InMemoryTransport {
    stores: DashMap<String, Arc<MemoryBlockStore>>,
    unreachable: DashSet<String>,
    /// Addresses that accept a connection but never answer.
    stalled: DashSet<String>,
}

impl InMemoryTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns the store behind `addr`, creating it on first use.
    pub fn store(&self, addr: &str) -> Arc<MemoryBlockStore> {
        self.stores
            .entry(addr.to_string())
            .or_insert_with(|| Arc::new(MemoryBlockStore::new()))
            .clone()
    }

    pub fn set_unreachable(&self, addr: &str, unreachable: bool) {
        if unreachable {
            self.unreachable.insert(addr.to_string());
        } else {
            self.unreachable.remove(addr);
        }
    }

    pub fn set_stalled(&self, addr: &str, stalled: bool) {
        if stalled {
            self.stalled.insert(addr.to_string());
        } else {
            self.stalled.remove(addr);
        }
    }

    async fn stall_if_needed(&self, addr: &str) {
        if self.stalled.contains(addr) {
            std::future::pending::<()>().await;
        }
    }

    /// Addresses whose store currently holds `block_id`, sorted.
    pub fn holders(&self, block_id: &BlockId) -> Vec<String> {
        let mut holders: Vec<String> = self
            .stores
            .iter()
            .filter(|entry| entry.value().contains(block_id))
            .map(|entry| entry.key().clone())
            .collect();
        holders.sort();
        holders
    }
}

#[async_trait]
impl BlockTransport for InMemoryTransport {
    async fn push_block(&self, addr: &str, block: &BlockMessage) -> anyhow::Result<()> {
        self.stall_if_needed(addr).await;
        if self.unreachable.contains(addr) {
            anyhow::bail!("{} is unreachable", addr);
        }
        self.store(addr).put_block(block.clone()).await?;
        Ok(())
    }

    async fn fetch_block(&self, addr: &str, block_id: &BlockId) -> anyhow::Result<BlockMessage> {
        self.stall_if_needed(addr).await;
        if self.unreachable.contains(addr) {
            anyhow::bail!("{} is unreachable", addr);
        }
        self.store(addr)
            .get_block(block_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("block {} not found on {}", block_id, addr))
    }
}

pub fn addr(n: usize) -> String {
    format!("10.0.0.{}:9000", n)
}
