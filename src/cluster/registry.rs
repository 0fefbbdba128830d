use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use crate::cluster::node::{
    HeartbeatStats, NodeId, NodeLink, NodeRegistration, NodeState, NodeSummary,
};
use crate::error::{CoordinatorError, Result};

/// Known workers keyed by node id, plus the IP address → node ids index.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: BTreeMap<NodeId, NodeState>,
    ip_index: BTreeMap<String, BTreeSet<NodeId>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker. Fails if the id is already present.
    pub fn register(
        &mut self,
        registration: NodeRegistration,
        link: Option<NodeLink>,
        now: Instant,
    ) -> Result<&NodeState> {
        let node_id = registration.node_id.clone();
        if self.nodes.contains_key(&node_id) {
            return Err(CoordinatorError::DuplicateNode(node_id));
        }

        self.ip_index
            .entry(registration.ip_address.clone())
            .or_default()
            .insert(node_id.clone());

        tracing::info!(
            node_id = %node_id,
            ip_address = %registration.ip_address,
            "Node registered"
        );
        Ok(self
            .nodes
            .entry(node_id)
            .or_insert_with(|| NodeState::new(registration, link, now)))
    }

    /// Record a heartbeat. Returns false for unknown ids, which are expected
    /// when a heartbeat races with an unregister.
    pub fn heartbeat(&mut self, node_id: &str, stats: HeartbeatStats, now: Instant) -> bool {
        match self.nodes.get_mut(node_id) {
            Some(node) => {
                node.update_heartbeat(stats, now);
                true
            }
            None => {
                tracing::debug!(node_id, "Heartbeat from unknown node ignored");
                false
            }
        }
    }

    /// Remove a worker and drop it from the IP index.
    pub fn unregister(&mut self, node_id: &str) -> Result<NodeState> {
        let node = self
            .nodes
            .remove(node_id)
            .ok_or_else(|| CoordinatorError::UnknownNode(node_id.to_string()))?;

        let ip = &node.registration.ip_address;
        if let Some(names) = self.ip_index.get_mut(ip) {
            names.remove(node_id);
            if names.is_empty() {
                self.ip_index.remove(ip);
            }
        }
        Ok(node)
    }

    /// Ids of nodes silent for longer than `timeout` as of `now`.
    pub fn dead_nodes(&self, now: Instant, timeout: Duration) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| !n.is_alive(now, timeout))
            .map(|n| n.node_id().to_string())
            .collect()
    }

    pub fn get(&self, node_id: &str) -> Option<&NodeState> {
        self.nodes.get(node_id)
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().cloned().collect()
    }

    pub fn registrations(&self) -> Vec<NodeRegistration> {
        self.nodes
            .values()
            .map(|n| n.registration.clone())
            .collect()
    }

    pub fn summaries(&self, now: Instant) -> Vec<NodeSummary> {
        self.nodes
            .values()
            .map(|n| NodeSummary::of(n, now))
            .collect()
    }

    pub fn ip_address_node_map(&self) -> &BTreeMap<String, BTreeSet<NodeId>> {
        &self.ip_index
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
