use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cluster::NodeId;
use crate::work::Sink;

/// Process-unique, monotonically assigned job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JID:{}", self.0)
    }
}

pub type TaskId = String;

/// Bit 0 of the submission flags.
pub const JOB_FLAG_PROFILING: u32 = 0x1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Initialized,
    Running,
    TerminatedSuccess,
    TerminatedFailure,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::TerminatedSuccess | JobStatus::TerminatedFailure)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Initialized => write!(f, "INITIALIZED"),
            JobStatus::Running => write!(f, "RUNNING"),
            JobStatus::TerminatedSuccess => write!(f, "TERMINATED_SUCCESS"),
            JobStatus::TerminatedFailure => write!(f, "TERMINATED_FAILURE"),
        }
    }
}

/// Where a task was placed by the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskPlacement {
    pub task_id: TaskId,
    pub node_id: NodeId,
}

impl TaskPlacement {
    pub fn new(task_id: impl Into<TaskId>, node_id: impl Into<NodeId>) -> Self {
        Self {
            task_id: task_id.into(),
            node_id: node_id.into(),
        }
    }
}

/// A reported task failure. Workers send one opaque details string; it is
/// kept both as the message and as the diagnostic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskFailure {
    pub task_id: TaskId,
    pub node_id: Option<NodeId>,
    pub message: String,
    pub diagnostic: String,
}

/// What waiters and status queries observe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusReport {
    pub job_id: JobId,
    pub status: JobStatus,
    pub details: Option<String>,
}

/// Lifecycle record of one submitted job.
pub struct JobRun {
    pub job_id: JobId,
    pub app_name: String,
    pub graph: Vec<u8>,
    pub flags: u32,
    pub status: JobStatus,
    /// Planned placement of every task.
    pub placements: BTreeMap<TaskId, NodeId>,
    /// Tasks that have not acknowledged success yet.
    pub pending_tasks: BTreeSet<TaskId>,
    /// Nodes that still owe a joblet cleanup notification.
    pub cleanup_pending: BTreeSet<NodeId>,
    pub task_statistics: BTreeMap<TaskId, HashMap<String, i64>>,
    pub failures: Vec<TaskFailure>,
    pub details: Option<String>,
    pub profiles: BTreeMap<NodeId, HashMap<String, i64>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub(crate) waiters: Vec<Sink<JobStatusReport>>,
}

impl JobRun {
    pub fn new(job_id: JobId, app_name: String, graph: Vec<u8>, flags: u32) -> Self {
        Self {
            job_id,
            app_name,
            graph,
            flags,
            status: JobStatus::Initialized,
            placements: BTreeMap::new(),
            pending_tasks: BTreeSet::new(),
            cleanup_pending: BTreeSet::new(),
            task_statistics: BTreeMap::new(),
            failures: Vec::new(),
            details: None,
            profiles: BTreeMap::new(),
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            waiters: Vec::new(),
        }
    }

    pub fn profiling_enabled(&self) -> bool {
        self.flags & JOB_FLAG_PROFILING != 0
    }

    /// Nodes with at least one placed task.
    pub fn participants(&self) -> BTreeSet<NodeId> {
        self.placements.values().cloned().collect()
    }

    /// Pending tasks grouped by the node they were placed on.
    pub fn pending_by_node(&self) -> BTreeMap<NodeId, Vec<TaskId>> {
        let mut grouped: BTreeMap<NodeId, Vec<TaskId>> = BTreeMap::new();
        for task_id in &self.pending_tasks {
            if let Some(node_id) = self.placements.get(task_id) {
                grouped
                    .entry(node_id.clone())
                    .or_default()
                    .push(task_id.clone());
            }
        }
        grouped
    }

    pub fn has_pending_tasks_on(&self, node_id: &str) -> bool {
        self.pending_tasks
            .iter()
            .any(|t| self.placements.get(t).map(String::as_str) == Some(node_id))
    }

    pub fn report(&self) -> JobStatusReport {
        JobStatusReport {
            job_id: self.job_id,
            status: self.status,
            details: self.details.clone(),
        }
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            job_id: self.job_id,
            app_name: self.app_name.clone(),
            flags: self.flags,
            profiling: self.profiling_enabled(),
            status: self.status,
            task_count: self.placements.len(),
            pending_tasks: self.pending_tasks.len(),
            participants: self.participants().into_iter().collect(),
            failures: self.failures.clone(),
            details: self.details.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
        }
    }
}

impl fmt::Debug for JobRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRun")
            .field("job_id", &self.job_id)
            .field("app_name", &self.app_name)
            .field("status", &self.status)
            .field("pending_tasks", &self.pending_tasks)
            .field("waiters", &self.waiters.len())
            .finish()
    }
}

/// Serializable view of a run, used by the job log and inspection surfaces.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    pub job_id: JobId,
    pub app_name: String,
    pub flags: u32,
    pub profiling: bool,
    pub status: JobStatus,
    pub task_count: usize,
    pub pending_tasks: usize,
    pub participants: Vec<NodeId>,
    pub failures: Vec<TaskFailure>,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}
