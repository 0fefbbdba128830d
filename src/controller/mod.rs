//! Coordinator state and every state transition that runs on the work queue.
//!
//! Nothing in here is shared: a [`ControllerState`] is moved onto the queue
//! thread at startup and only units of work ever touch it. Operations are
//! plain methods so they can be driven directly in tests.

mod apps;
mod datasets;
mod jobs;
mod nodes;
pub mod sweeper;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use crate::application::{ApplicationDetail, ApplicationInfo, Applications};
use crate::cluster::{NodeCommand, NodeId, NodeRegistration, NodeRegistry, NodeSummary};
use crate::config::CoordinatorConfig;
use crate::dataset::DatasetDirectory;
use crate::error::Result;
use crate::job::{BroadcastPlanner, JobId, JobLog, JobStore, JobSummary, TaskPlanner};
use crate::partition::PartitionMatchMaker;
use crate::work::WorkQueue;

pub use sweeper::spawn_sweeper;

pub type ControllerQueue = WorkQueue<ControllerState>;

pub struct ControllerState {
    nodes: NodeRegistry,
    jobs: JobStore,
    applications: Applications,
    datasets: DatasetDirectory,
    partitions: PartitionMatchMaker,
    planner: Box<dyn TaskPlanner>,
    job_log: Option<JobLog>,
}

impl ControllerState {
    pub fn new(config: Arc<CoordinatorConfig>) -> Self {
        Self::with_planner(config, Box::new(BroadcastPlanner::default()))
    }

    pub fn with_planner(config: Arc<CoordinatorConfig>, planner: Box<dyn TaskPlanner>) -> Self {
        Self {
            nodes: NodeRegistry::new(),
            jobs: JobStore::new(config.job_history_size),
            applications: Applications::new(config.app_inbox_size),
            datasets: DatasetDirectory::with_max_partitions(config.max_result_partitions),
            partitions: PartitionMatchMaker::new(),
            planner,
            job_log: None,
        }
    }

    pub fn set_job_log(&mut self, job_log: JobLog) {
        self.job_log = Some(job_log);
    }

    /// Take the job log back, leaving the state without one.
    pub fn take_job_log(&mut self) -> Option<JobLog> {
        self.job_log.take()
    }

    pub fn nodes(&self) -> &NodeRegistry {
        &self.nodes
    }

    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    pub fn datasets(&self) -> &DatasetDirectory {
        &self.datasets
    }

    pub fn partitions(&self) -> &PartitionMatchMaker {
        &self.partitions
    }

    pub fn node_registrations(&self) -> Vec<NodeRegistration> {
        self.nodes.registrations()
    }

    pub fn node_summaries(&self) -> Vec<NodeSummary> {
        self.nodes.summaries(Instant::now())
    }

    pub fn ip_address_node_map(&self) -> BTreeMap<String, BTreeSet<NodeId>> {
        self.nodes.ip_address_node_map().clone()
    }

    pub fn active_jobs(&self) -> Vec<JobSummary> {
        self.jobs.active_summaries()
    }

    pub fn archived_jobs(&self) -> Vec<JobSummary> {
        self.jobs.archived_summaries()
    }

    pub fn job_summary(&self, job_id: JobId) -> Option<JobSummary> {
        self.jobs.get(job_id).map(|run| run.summary())
    }

    pub fn applications(&self) -> Vec<ApplicationInfo> {
        self.applications.list()
    }

    /// One application with the messages relayed to it.
    pub fn application_detail(&self, name: &str) -> Result<ApplicationDetail> {
        Ok(ApplicationDetail {
            info: self.applications.info(name)?,
            inbox: self.applications.inbox(name)?,
        })
    }

    /// Push a command to a node if it is still registered.
    fn send_to(&self, node_id: &str, command: NodeCommand) -> bool {
        match self.nodes.get(node_id) {
            Some(node) => node.send(command),
            None => {
                tracing::debug!(node_id, "Dropping command for unregistered node");
                false
            }
        }
    }
}
