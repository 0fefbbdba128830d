//! Directory of job result partitions, used by clients to locate job output.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::Serialize;

use crate::cluster::{NetworkAddress, NodeId};
use crate::config::DEFAULT_MAX_RESULT_PARTITIONS;
use crate::error::{CoordinatorError, Result};
use crate::job::JobId;
use crate::work::Sink;

pub type ResultSetId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    Idle,
    Running,
    Success,
    Failed,
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultStatus::Idle => write!(f, "IDLE"),
            ResultStatus::Running => write!(f, "RUNNING"),
            ResultStatus::Success => write!(f, "SUCCESS"),
            ResultStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Location and progress of one result partition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectoryRecord {
    pub node_id: Option<NodeId>,
    pub address: Option<NetworkAddress>,
    pub status: ResultStatus,
}

impl DirectoryRecord {
    fn idle() -> Self {
        Self {
            node_id: None,
            address: None,
            status: ResultStatus::Idle,
        }
    }
}

/// A partition location as reported by the worker writing it.
#[derive(Debug, Clone)]
pub struct ResultPartitionLocation {
    pub job_id: JobId,
    pub result_set_id: ResultSetId,
    pub ordered: bool,
    pub record_descriptor: Vec<u8>,
    pub partition: usize,
    pub n_partitions: usize,
    pub node_id: NodeId,
    pub address: Option<NetworkAddress>,
}

#[derive(Debug)]
struct ResultSet {
    ordered: bool,
    record_descriptor: Vec<u8>,
    records: Vec<DirectoryRecord>,
}

impl ResultSet {
    fn status(&self) -> ResultStatus {
        if self.records.iter().any(|r| r.status == ResultStatus::Failed) {
            ResultStatus::Failed
        } else if self.records.iter().all(|r| r.status == ResultStatus::Success) {
            ResultStatus::Success
        } else if self.records.iter().any(|r| r.status != ResultStatus::Idle) {
            ResultStatus::Running
        } else {
            ResultStatus::Idle
        }
    }
}

struct LocationWaiter {
    result_set_id: ResultSetId,
    known: Vec<DirectoryRecord>,
    sink: Sink<Vec<DirectoryRecord>>,
}

#[derive(Default)]
struct JobResults {
    result_sets: BTreeMap<ResultSetId, ResultSet>,
    /// Failure details once the job has failed.
    failure: Option<String>,
    finished: bool,
    waiters: Vec<LocationWaiter>,
}

/// Result set records per job. Parked location queries are answered as soon
/// as the records they know about change.
pub struct DatasetDirectory {
    jobs: HashMap<JobId, JobResults>,
    max_partitions: usize,
}

impl Default for DatasetDirectory {
    fn default() -> Self {
        Self::with_max_partitions(DEFAULT_MAX_RESULT_PARTITIONS)
    }
}

impl DatasetDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory refusing result sets declared with more than `max_partitions`.
    pub fn with_max_partitions(max_partitions: usize) -> Self {
        Self {
            jobs: HashMap::new(),
            max_partitions,
        }
    }

    pub fn init_job(&mut self, job_id: JobId) {
        self.jobs.entry(job_id).or_default();
    }

    pub fn register_location(&mut self, location: ResultPartitionLocation) -> Result<()> {
        // Checked before anything is sized from worker input.
        if location.n_partitions == 0 || location.n_partitions > self.max_partitions {
            return Err(CoordinatorError::Malformed(format!(
                "result set {} declares {} partitions, limit is {}",
                location.result_set_id, location.n_partitions, self.max_partitions
            )));
        }
        if location.partition >= location.n_partitions {
            return Err(CoordinatorError::Malformed(format!(
                "partition {} out of range for result set {}",
                location.partition, location.result_set_id
            )));
        }

        let job_id = location.job_id;
        let job = self.job_mut(job_id, &location.result_set_id)?;
        let set = job
            .result_sets
            .entry(location.result_set_id.clone())
            .or_insert_with(|| ResultSet {
                ordered: location.ordered,
                record_descriptor: location.record_descriptor.clone(),
                records: vec![DirectoryRecord::idle(); location.n_partitions],
            });

        let record = set
            .records
            .get_mut(location.partition)
            .ok_or_else(|| {
                CoordinatorError::Malformed(format!(
                    "partition {} out of range for result set {}",
                    location.partition, location.result_set_id
                ))
            })?;
        record.node_id = Some(location.node_id);
        record.address = location.address;
        record.status = ResultStatus::Running;

        self.notify(job_id);
        Ok(())
    }

    pub fn write_complete(
        &mut self,
        job_id: JobId,
        result_set_id: &str,
        partition: usize,
    ) -> Result<()> {
        self.set_partition_status(job_id, result_set_id, partition, ResultStatus::Success)
    }

    pub fn partition_failed(
        &mut self,
        job_id: JobId,
        result_set_id: &str,
        partition: usize,
    ) -> Result<()> {
        self.set_partition_status(job_id, result_set_id, partition, ResultStatus::Failed)
    }

    fn set_partition_status(
        &mut self,
        job_id: JobId,
        result_set_id: &str,
        partition: usize,
        status: ResultStatus,
    ) -> Result<()> {
        let record = self
            .job_mut(job_id, result_set_id)?
            .result_sets
            .get_mut(result_set_id)
            .and_then(|set| set.records.get_mut(partition))
            .ok_or_else(|| unknown_result_set(job_id, result_set_id))?;
        record.status = status;
        self.notify(job_id);
        Ok(())
    }

    /// The job reached a terminal state. Failure marks every unfinished
    /// partition failed. All parked queries are answered.
    pub fn job_finished(&mut self, job_id: JobId, failure: Option<String>) {
        let Some(job) = self.jobs.get_mut(&job_id) else {
            return;
        };
        job.finished = true;
        if failure.is_some() {
            for set in job.result_sets.values_mut() {
                for record in &mut set.records {
                    if record.status != ResultStatus::Success {
                        record.status = ResultStatus::Failed;
                    }
                }
            }
            job.failure = failure;
        }
        self.notify(job_id);
    }

    pub fn result_status(&self, job_id: JobId, result_set_id: &str) -> Result<ResultStatus> {
        let job = self
            .jobs
            .get(&job_id)
            .ok_or_else(|| unknown_result_set(job_id, result_set_id))?;
        if job.failure.is_some() {
            return Ok(ResultStatus::Failed);
        }
        Ok(job
            .result_sets
            .get(result_set_id)
            .map_or(ResultStatus::Idle, ResultSet::status))
    }

    pub fn record_descriptor(&self, job_id: JobId, result_set_id: &str) -> Result<Vec<u8>> {
        self.jobs
            .get(&job_id)
            .and_then(|job| job.result_sets.get(result_set_id))
            .map(|set| set.record_descriptor.clone())
            .ok_or_else(|| unknown_result_set(job_id, result_set_id))
    }

    pub fn is_ordered(&self, job_id: JobId, result_set_id: &str) -> Option<bool> {
        self.jobs
            .get(&job_id)
            .and_then(|job| job.result_sets.get(result_set_id))
            .map(|set| set.ordered)
    }

    /// Answer with the current records, or park until they differ from `known`.
    pub fn result_locations(
        &mut self,
        job_id: JobId,
        result_set_id: &str,
        known: Vec<DirectoryRecord>,
        sink: Sink<Vec<DirectoryRecord>>,
    ) {
        let Some(job) = self.jobs.get_mut(&job_id) else {
            sink.set_error(unknown_result_set(job_id, result_set_id));
            return;
        };
        if let Some(failure) = &job.failure {
            sink.set_error(CoordinatorError::TaskFailure {
                job_id,
                details: failure.clone(),
            });
            return;
        }
        let current = records_of(job, result_set_id);
        if current != known || job.finished {
            sink.set_value(current);
        } else {
            job.waiters.push(LocationWaiter {
                result_set_id: result_set_id.to_string(),
                known,
                sink,
            });
        }
    }

    /// Forget a job entirely, failing any query still parked on it.
    pub fn remove_job(&mut self, job_id: JobId) {
        if let Some(job) = self.jobs.remove(&job_id) {
            for waiter in job.waiters {
                waiter
                    .sink
                    .set_error(unknown_result_set(job_id, &waiter.result_set_id));
            }
        }
    }

    pub fn contains_job(&self, job_id: JobId) -> bool {
        self.jobs.contains_key(&job_id)
    }

    fn job_mut(&mut self, job_id: JobId, result_set_id: &str) -> Result<&mut JobResults> {
        self.jobs
            .get_mut(&job_id)
            .ok_or_else(|| unknown_result_set(job_id, result_set_id))
    }

    fn notify(&mut self, job_id: JobId) {
        let Some(job) = self.jobs.get_mut(&job_id) else {
            return;
        };
        let waiters = std::mem::take(&mut job.waiters);
        for waiter in waiters {
            if let Some(failure) = &job.failure {
                waiter.sink.set_error(CoordinatorError::TaskFailure {
                    job_id,
                    details: failure.clone(),
                });
                continue;
            }
            let current = records_of(job, &waiter.result_set_id);
            if current != waiter.known || job.finished {
                waiter.sink.set_value(current);
            } else {
                job.waiters.push(waiter);
            }
        }
    }
}

fn records_of(job: &JobResults, result_set_id: &str) -> Vec<DirectoryRecord> {
    job.result_sets
        .get(result_set_id)
        .map(|set| set.records.clone())
        .unwrap_or_default()
}

fn unknown_result_set(job_id: JobId, result_set_id: &str) -> CoordinatorError {
    CoordinatorError::UnknownResultSet {
        job_id,
        result_set_id: result_set_id.to_string(),
    }
}
