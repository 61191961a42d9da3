use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::types::{Node, NodeHealth, NodeId, NodeReport};
use crate::error::{ClusterError, Result};

/// Authoritative record of cluster membership and per-node health.
///
/// Node records live in a sharded `DashMap`, so updates to different nodes do not
/// contend. Operations that need a consistent picture of the whole cluster
/// (placement's node selection and the health sweep) take the `view` lock
/// exclusively; per-node updates take it shared. The guard is never held across
/// an await point.
pub struct NodeRegistry {
    nodes: DashMap<NodeId, Node>,
    next_id: AtomicU64,
    view: RwLock<()>,
    health_timeout: Duration,
}

impl NodeRegistry {
    pub fn new(health_timeout: Duration) -> Self {
        Self {
            nodes: DashMap::new(),
            next_id: AtomicU64::new(1),
            view: RwLock::new(()),
            health_timeout,
        }
    }

    pub fn health_timeout(&self) -> Duration {
        self.health_timeout
    }

    /// Admits a new node and returns its freshly allocated identifier.
    pub fn register(&self, addr: &str) -> Result<NodeId> {
        let addr = addr.trim();
        if addr.is_empty() {
            return Err(ClusterError::EmptyAddress);
        }

        let _view = self.view.read();
        let id = NodeId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.nodes.insert(id, Node::new(id, addr));

        tracing::info!("Registered {} at {} (cluster size {})", id, addr, self.nodes.len());
        Ok(id)
    }

    /// Records a heartbeat. Returns `true` when the node had been declared
    /// unhealthy and is now back.
    pub fn heartbeat(&self, id: NodeId, report: NodeReport) -> Result<bool> {
        let _view = self.view.read();
        let mut node = self.nodes.get_mut(&id).ok_or(ClusterError::UnknownNode(id))?;

        node.last_heartbeat = Instant::now();
        node.utilization = report.utilization;
        node.reported_at = Some(report.timestamp);
        node.blocks = report.blocks;
        if !report.addr.is_empty() && node.addr != report.addr {
            tracing::info!("{} moved from {} to {}", id, node.addr, report.addr);
            node.addr = report.addr;
        }

        let recovered = node.health == NodeHealth::Unhealthy;
        if recovered {
            node.health = NodeHealth::Healthy;
            tracing::info!("{} is healthy again", id);
        }
        Ok(recovered)
    }

    /// Picks `count` distinct healthy nodes outside `exclude`, least loaded
    /// first with ties broken by id. All or nothing: never returns fewer.
    pub fn select_nodes(&self, count: usize, exclude: &BTreeSet<NodeId>) -> Result<Vec<NodeId>> {
        let _view = self.view.write();

        let mut candidates: Vec<(u64, NodeId)> = self
            .nodes
            .iter()
            .filter(|entry| entry.value().is_healthy() && !exclude.contains(entry.key()))
            .map(|entry| (entry.value().utilization, *entry.key()))
            .collect();

        if candidates.len() < count {
            return Err(ClusterError::InsufficientCapacity {
                needed: count,
                available: candidates.len(),
            });
        }

        candidates.sort_unstable();
        Ok(candidates.into_iter().take(count).map(|(_, id)| id).collect())
    }

    /// Flips every node silent for longer than the health timeout to
    /// unhealthy. Returns the nodes that changed state on this pass.
    pub fn sweep(&self, now: Instant) -> Vec<NodeId> {
        let _view = self.view.write();
        let mut newly_unhealthy = Vec::new();

        for mut entry in self.nodes.iter_mut() {
            let node = entry.value_mut();
            if node.health != NodeHealth::Healthy {
                continue;
            }

            let silence = node.silence(now);
            if silence > self.health_timeout {
                tracing::warn!(
                    "{} at {} declared unhealthy (no heartbeat for {:?})",
                    node.id,
                    node.addr,
                    silence
                );
                node.health = NodeHealth::Unhealthy;
                newly_unhealthy.push(node.id);
            }
        }

        newly_unhealthy.sort_unstable();
        newly_unhealthy
    }

    pub fn list_nodes(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self.nodes.iter().map(|entry| entry.value().clone()).collect();
        nodes.sort_by_key(|node| node.id);
        nodes
    }

    pub fn get_node(&self, id: NodeId) -> Option<Node> {
        self.nodes.get(&id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn is_healthy(&self, id: NodeId) -> bool {
        self.nodes
            .get(&id)
            .map(|entry| entry.value().is_healthy())
            .unwrap_or(false)
    }

    pub fn address_of(&self, id: NodeId) -> Option<String> {
        self.nodes.get(&id).map(|entry| entry.value().addr.clone())
    }

    /// (total, healthy) node counts.
    pub fn counts(&self) -> (usize, usize) {
        let total = self.nodes.len();
        let healthy = self.nodes.iter().filter(|entry| entry.value().is_healthy()).count();
        (total, healthy)
    }

    #[cfg(test)]
    pub(crate) fn set_utilization(&self, id: NodeId, utilization: u64) {
        if let Some(mut node) = self.nodes.get_mut(&id) {
            node.utilization = utilization;
        }
    }
}
