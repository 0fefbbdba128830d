use crate::cluster::NodeId;
use crate::error::{CoordinatorError, Result};
use crate::job::run::{JobRun, TaskPlacement};

/// Decides which tasks a job consists of and where they run.
///
/// Called once per job on the work queue thread, so it must not block.
pub trait TaskPlanner: Send {
    fn plan(&mut self, job: &JobRun, nodes: &[NodeId]) -> Result<Vec<TaskPlacement>>;
}

/// Places the same number of tasks on every registered node.
#[derive(Debug, Clone)]
pub struct BroadcastPlanner {
    tasks_per_node: usize,
}

impl BroadcastPlanner {
    pub fn new(tasks_per_node: usize) -> Self {
        Self {
            tasks_per_node: tasks_per_node.max(1),
        }
    }
}

impl Default for BroadcastPlanner {
    fn default() -> Self {
        Self::new(1)
    }
}

impl TaskPlanner for BroadcastPlanner {
    fn plan(&mut self, job: &JobRun, nodes: &[NodeId]) -> Result<Vec<TaskPlacement>> {
        if nodes.is_empty() {
            return Err(CoordinatorError::NoNodesAvailable(job.job_id));
        }
        let mut placements = Vec::with_capacity(nodes.len() * self.tasks_per_node);
        for node_id in nodes {
            for i in 0..self.tasks_per_node {
                placements.push(TaskPlacement::new(
                    format!("TID:{}:{}:{}", job.job_id.0, node_id, i),
                    node_id.clone(),
                ));
            }
        }
        Ok(placements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobId;

    #[test]
    fn broadcast_places_tasks_on_every_node() {
        let job = JobRun::new(JobId(4), String::new(), Vec::new(), 0);
        let nodes = vec!["nc1".to_string(), "nc2".to_string()];
        let placements = BroadcastPlanner::new(2).plan(&job, &nodes).unwrap();

        assert_eq!(placements.len(), 4);
        assert_eq!(placements.iter().filter(|p| p.node_id == "nc2").count(), 2);
        assert_eq!(placements[0].task_id, "TID:4:nc1:0");
    }

    #[test]
    fn broadcast_without_nodes_fails() {
        let job = JobRun::new(JobId(0), String::new(), Vec::new(), 0);
        let err = BroadcastPlanner::default().plan(&job, &[]).unwrap_err();
        assert_eq!(err, CoordinatorError::NoNodesAvailable(JobId(0)));
    }
}
