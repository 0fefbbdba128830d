use std::time::{Duration, Instant};

use crate::cluster::{HeartbeatStats, NodeId, NodeLink, NodeRegistration, NodeState};
use crate::controller::ControllerState;
use crate::error::Result;
use crate::job::JobStatus;

impl ControllerState {
    pub fn register_node(
        &mut self,
        registration: NodeRegistration,
        link: Option<NodeLink>,
        now: Instant,
    ) -> Result<()> {
        self.nodes.register(registration, link, now)?;
        Ok(())
    }

    /// Heartbeats from unknown nodes are dropped: they race with unregister.
    pub fn heartbeat(&mut self, node_id: &str, stats: HeartbeatStats, now: Instant) -> bool {
        self.nodes.heartbeat(node_id, stats, now)
    }

    pub fn unregister_node(&mut self, node_id: &str) -> Result<()> {
        let node = self.nodes.unregister(node_id)?;
        tracing::info!(node_id, "Node unregistered");
        self.node_lost(node);
        Ok(())
    }

    /// Evict every node silent for longer than `timeout`. Returns the evicted ids.
    pub fn sweep_dead_nodes(&mut self, now: Instant, timeout: Duration) -> Vec<NodeId> {
        let dead = self.nodes.dead_nodes(now, timeout);
        for node_id in &dead {
            match self.nodes.unregister(node_id) {
                Ok(node) => {
                    tracing::warn!(
                        node_id = %node_id,
                        timeout_ms = timeout.as_millis() as u64,
                        "Node missed too many heartbeats, removing"
                    );
                    self.node_lost(node);
                }
                Err(e) => tracing::error!(node_id = %node_id, error = %e, "Sweep lost track of node"),
            }
        }
        dead
    }

    /// Cleanup shared by explicit unregistration and the sweep.
    fn node_lost(&mut self, node: NodeState) {
        let node_id = node.node_id().to_string();

        for job_id in self.jobs.jobs_with_pending_tasks_on(&node_id) {
            self.terminate_job(
                job_id,
                JobStatus::TerminatedFailure,
                Some(format!("Node {node_id} lost while running tasks")),
            );
        }
        self.jobs.forget_cleanup(&node_id);

        for app_name in self.applications.node_lost(&node_id) {
            self.applications.settle(&app_name);
        }

        self.partitions.remove_node(&node_id);
    }
}
