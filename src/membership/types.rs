use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

use crate::placement::types::BlockId;

/// Registry-assigned identity of a chunk server.
///
/// Issued from a monotonic counter, so identifiers are never reused for the
/// lifetime of the registry and order by registration time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeHealth {
    Healthy,
    Unhealthy,
}

/// A registered chunk server as seen by the master.
///
/// `blocks` and `utilization` are whatever the node last reported; they are an
/// observation, not the authoritative placement (which lives in the placement
/// engine's replica sets).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub addr: String,
    pub blocks: Vec<BlockId>,
    pub health: NodeHealth,
    /// Bytes stored on the node, as last reported.
    pub utilization: u64,
    /// Agent-side wall clock (ms since epoch) of the last accepted report.
    pub reported_at: Option<u64>,

    #[serde(skip, default = "Instant::now")]
    pub last_heartbeat: Instant,
}

impl Node {
    pub fn new(id: NodeId, addr: impl Into<String>) -> Self {
        Self {
            id,
            addr: addr.into(),
            blocks: Vec::new(),
            health: NodeHealth::Healthy,
            utilization: 0,
            reported_at: None,
            last_heartbeat: Instant::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.health == NodeHealth::Healthy
    }

    /// Time since the last accepted heartbeat, measured against `now`.
    pub fn silence(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_heartbeat)
    }
}

/// What a chunk server reports on each heartbeat.
#[derive(Debug, Clone)]
pub struct NodeReport {
    pub addr: String,
    pub blocks: Vec<BlockId>,
    pub utilization: u64,
    pub timestamp: u64,
}
