//! Match-making between nodes producing intermediate partitions and nodes
//! asking to read them.

use std::collections::{BTreeMap, HashMap};

use crate::cluster::{NetworkAddress, NodeId};
use crate::job::JobId;

pub type PartitionId = String;

#[derive(Debug, Clone, PartialEq)]
pub struct PartitionDescriptor {
    pub job_id: JobId,
    pub partition_id: PartitionId,
    pub node_id: NodeId,
    pub data_address: Option<NetworkAddress>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartitionRequest {
    pub job_id: JobId,
    pub partition_id: PartitionId,
    pub node_id: NodeId,
}

/// A requester that can now be told where its partition lives.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionMatch {
    pub provider: PartitionDescriptor,
    pub requester: NodeId,
}

#[derive(Debug, Default)]
struct JobPartitions {
    available: BTreeMap<PartitionId, Vec<PartitionDescriptor>>,
    requests: BTreeMap<PartitionId, Vec<PartitionRequest>>,
}

impl JobPartitions {
    fn is_empty(&self) -> bool {
        self.available.is_empty() && self.requests.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct PartitionMatchMaker {
    jobs: HashMap<JobId, JobPartitions>,
}

impl PartitionMatchMaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an available partition and match it against waiting requests.
    pub fn register_provider(&mut self, descriptor: PartitionDescriptor) -> Vec<PartitionMatch> {
        let job = self.jobs.entry(descriptor.job_id).or_default();
        let waiting = job
            .requests
            .remove(&descriptor.partition_id)
            .unwrap_or_default();

        let matches = waiting
            .into_iter()
            .map(|request| PartitionMatch {
                provider: descriptor.clone(),
                requester: request.node_id,
            })
            .collect();

        job.available
            .entry(descriptor.partition_id.clone())
            .or_default()
            .push(descriptor);
        matches
    }

    /// Record a request. Matched immediately if a provider is already known.
    pub fn register_request(&mut self, request: PartitionRequest) -> Option<PartitionMatch> {
        let job = self.jobs.entry(request.job_id).or_default();
        if let Some(provider) = job
            .available
            .get(&request.partition_id)
            .and_then(|providers| providers.first())
        {
            return Some(PartitionMatch {
                provider: provider.clone(),
                requester: request.node_id,
            });
        }
        job.requests
            .entry(request.partition_id.clone())
            .or_default()
            .push(request);
        None
    }

    pub fn remove_job(&mut self, job_id: JobId) {
        self.jobs.remove(&job_id);
    }

    /// Drop every provider and request belonging to a lost node.
    pub fn remove_node(&mut self, node_id: &str) {
        for job in self.jobs.values_mut() {
            for providers in job.available.values_mut() {
                providers.retain(|p| p.node_id != node_id);
            }
            job.available.retain(|_, providers| !providers.is_empty());
            for requests in job.requests.values_mut() {
                requests.retain(|r| r.node_id != node_id);
            }
            job.requests.retain(|_, requests| !requests.is_empty());
        }
        self.jobs.retain(|_, job| !job.is_empty());
    }

    pub fn pending_requests(&self, job_id: JobId) -> usize {
        self.jobs
            .get(&job_id)
            .map_or(0, |job| job.requests.values().map(Vec::len).sum())
    }
}
