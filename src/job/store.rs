use std::collections::{BTreeMap, HashMap};

use chrono::Utc;

use crate::cluster::NodeId;
use crate::error::{CoordinatorError, Result};
use crate::job::archive::JobArchive;
use crate::job::run::{
    JobId, JobRun, JobStatus, JobStatusReport, JobSummary, TaskFailure, TaskId, TaskPlacement,
};
use crate::work::Sink;

/// Everything the caller needs to finish a terminal transition outside the
/// store: who to notify, what to abort, and which archived runs were evicted.
#[derive(Debug)]
pub struct TerminatedJob {
    pub summary: JobSummary,
    /// Participating nodes, each owed a joblet cleanup.
    pub participants: Vec<NodeId>,
    /// Tasks still running when the job ended, by node.
    pub unfinished: BTreeMap<NodeId, Vec<TaskId>>,
    /// Runs pushed out of the archive by this insertion.
    pub evicted: Vec<JobId>,
}

/// Active jobs plus the bounded archive of terminal ones.
///
/// A job id lives in exactly one of the two tables at any time.
#[derive(Debug)]
pub struct JobStore {
    next_id: u64,
    active: BTreeMap<JobId, JobRun>,
    archive: JobArchive,
}

impl JobStore {
    pub fn new(max_history: usize) -> Self {
        Self {
            next_id: 0,
            active: BTreeMap::new(),
            archive: JobArchive::new(max_history),
        }
    }

    /// Assign the next id and insert an INITIALIZED run.
    pub fn create_job(&mut self, app_name: String, graph: Vec<u8>, flags: u32) -> JobId {
        let job_id = JobId(self.next_id);
        self.next_id += 1;
        self.active
            .insert(job_id, JobRun::new(job_id, app_name, graph, flags));
        job_id
    }

    /// Record the planned placement and move the job to RUNNING.
    ///
    /// Dispatch is acknowledged once the StartTasks pushes are queued on the
    /// node links; there is no separate reply from the workers.
    pub fn mark_dispatched(&mut self, job_id: JobId, placements: &[TaskPlacement]) -> Result<()> {
        let run = self
            .active
            .get_mut(&job_id)
            .ok_or(CoordinatorError::UnknownJob(job_id))?;
        if run.status != JobStatus::Initialized {
            return Err(CoordinatorError::Internal(format!(
                "job {job_id} dispatched twice"
            )));
        }
        for placement in placements {
            run.placements
                .insert(placement.task_id.clone(), placement.node_id.clone());
            run.pending_tasks.insert(placement.task_id.clone());
        }
        run.cleanup_pending = run.participants();
        run.status = JobStatus::Running;
        run.started_at = Some(Utc::now());
        Ok(())
    }

    /// Acknowledge a successful task. Returns the terminal status the job
    /// should now move to, if any.
    pub fn task_complete(
        &mut self,
        job_id: JobId,
        task_id: &str,
        node_id: &str,
        statistics: HashMap<String, i64>,
    ) -> Result<Option<JobStatus>> {
        let Some(run) = self.active.get_mut(&job_id) else {
            return self.late_notification(job_id, task_id, "completion");
        };
        if !run.pending_tasks.remove(task_id) {
            tracing::warn!(job_id = %job_id, task_id, node_id, "Completion for unknown or finished task");
            return Ok(None);
        }
        run.task_statistics.insert(task_id.to_string(), statistics);
        tracing::debug!(job_id = %job_id, task_id, node_id, remaining = run.pending_tasks.len(), "Task completed");

        Ok(run
            .pending_tasks
            .is_empty()
            .then_some(JobStatus::TerminatedSuccess))
    }

    /// Record a failed task. Any failure fails the whole job.
    pub fn task_failure(
        &mut self,
        job_id: JobId,
        task_id: &str,
        node_id: Option<&str>,
        details: &str,
    ) -> Result<Option<JobStatus>> {
        let Some(run) = self.active.get_mut(&job_id) else {
            return self.late_notification(job_id, task_id, "failure");
        };
        run.pending_tasks.remove(task_id);
        run.failures.push(TaskFailure {
            task_id: task_id.to_string(),
            node_id: node_id.map(str::to_string),
            message: details.to_string(),
            diagnostic: details.to_string(),
        });
        tracing::warn!(job_id = %job_id, task_id, node_id, details, "Task failed");
        Ok(Some(JobStatus::TerminatedFailure))
    }

    fn late_notification(
        &self,
        job_id: JobId,
        task_id: &str,
        what: &str,
    ) -> Result<Option<JobStatus>> {
        if self.archive.contains(&job_id) {
            tracing::debug!(job_id = %job_id, task_id, what, "Task notification for terminated job ignored");
            Ok(None)
        } else {
            Err(CoordinatorError::UnknownJob(job_id))
        }
    }

    /// Move an active job to `status`, archive it and complete its waiters.
    ///
    /// Returns `None` if the job is not active (already terminal or unknown).
    pub fn terminate(
        &mut self,
        job_id: JobId,
        status: JobStatus,
        details: Option<String>,
    ) -> Option<TerminatedJob> {
        debug_assert!(status.is_terminal());
        let mut run = self.active.remove(&job_id)?;

        let unfinished = run.pending_by_node();
        run.status = status;
        run.ended_at = Some(Utc::now());
        if run.details.is_none() {
            run.details = details.or_else(|| run.failures.first().map(|f| f.message.clone()));
        }

        let report = run.report();
        for waiter in run.waiters.drain(..) {
            waiter.set_value(report.clone());
        }

        let summary = run.summary();
        let participants = run.participants().into_iter().collect();
        tracing::info!(job_id = %job_id, status = %status, "Job terminated");

        let evicted = self
            .archive
            .insert(run)
            .into_iter()
            .map(|r| r.job_id)
            .collect();

        Some(TerminatedJob {
            summary,
            participants,
            unfinished,
            evicted,
        })
    }

    /// Complete `sink` once the job is terminal; immediately if it already is.
    pub fn wait_for_completion(&mut self, job_id: JobId, sink: Sink<JobStatusReport>) {
        if let Some(run) = self.active.get_mut(&job_id) {
            run.waiters.push(sink);
        } else if let Some(run) = self.archive.get(&job_id) {
            sink.set_value(run.report());
        } else {
            sink.set_error(CoordinatorError::UnknownJob(job_id));
        }
    }

    pub fn status(&self, job_id: JobId) -> Result<JobStatusReport> {
        self.get(job_id)
            .map(JobRun::report)
            .ok_or(CoordinatorError::UnknownJob(job_id))
    }

    /// A participant finished cleaning up. Returns false if it was not expected.
    pub fn joblet_cleaned_up(&mut self, job_id: JobId, node_id: &str) -> bool {
        let run = match self.active.get_mut(&job_id) {
            Some(run) => Some(run),
            None => self.archive.get_mut(&job_id),
        };
        run.is_some_and(|run| run.cleanup_pending.remove(node_id))
    }

    /// Drop a lost node from every outstanding cleanup set.
    pub fn forget_cleanup(&mut self, node_id: &str) {
        for run in self.active.values_mut() {
            run.cleanup_pending.remove(node_id);
        }
        let ids = self.archive.job_ids();
        for job_id in ids {
            if let Some(run) = self.archive.get_mut(&job_id) {
                run.cleanup_pending.remove(node_id);
            }
        }
    }

    /// Store the latest counters a node reported for a job. Only active jobs
    /// accept profiles.
    pub fn record_profile(
        &mut self,
        job_id: JobId,
        node_id: &str,
        counters: HashMap<String, i64>,
    ) -> bool {
        match self.active.get_mut(&job_id) {
            Some(run) => {
                run.profiles.insert(node_id.to_string(), counters);
                true
            }
            None => false,
        }
    }

    /// Active jobs with at least one unfinished task on `node_id`.
    pub fn jobs_with_pending_tasks_on(&self, node_id: &str) -> Vec<JobId> {
        self.active
            .values()
            .filter(|run| run.has_pending_tasks_on(node_id))
            .map(|run| run.job_id)
            .collect()
    }

    pub fn get(&self, job_id: JobId) -> Option<&JobRun> {
        self.active
            .get(&job_id)
            .or_else(|| self.archive.get(&job_id))
    }

    pub fn get_active(&self, job_id: JobId) -> Option<&JobRun> {
        self.active.get(&job_id)
    }

    pub fn is_active(&self, job_id: JobId) -> bool {
        self.active.contains_key(&job_id)
    }

    pub fn active_summaries(&self) -> Vec<JobSummary> {
        self.active.values().map(JobRun::summary).collect()
    }

    /// Archived jobs, oldest first.
    pub fn archived_summaries(&self) -> Vec<JobSummary> {
        self.archive.iter().map(JobRun::summary).collect()
    }

    pub fn archive(&self) -> &JobArchive {
        &self.archive
    }
}
