use std::collections::{BTreeMap, HashMap};

use crate::cluster::NodeCommand;
use crate::controller::{ControllerQueue, ControllerState};
use crate::error::Result;
use crate::job::{JobId, JobStatus, JobStatusReport, TaskId};
use crate::work::Sink;

impl ControllerState {
    /// Create a job and schedule its dispatch as a follow-up unit.
    ///
    /// Returns as soon as the id is assigned. An empty application name runs
    /// the job outside any application context.
    pub fn submit_job(
        &mut self,
        queue: &ControllerQueue,
        app_name: String,
        graph: Vec<u8>,
        flags: u32,
    ) -> Result<JobId> {
        if !app_name.is_empty() {
            self.applications.require_started(&app_name)?;
        }
        let job_id = self.jobs.create_job(app_name, graph, flags);
        self.datasets.init_job(job_id);
        tracing::info!(job_id = %job_id, flags, "Job submitted");

        if let Err(e) = queue.submit("dispatch_job", move |state, _| state.dispatch_job(job_id)) {
            tracing::warn!(job_id = %job_id, error = %e, "Could not schedule job dispatch");
        }
        Ok(job_id)
    }

    /// Plan the job's tasks and push them to the nodes they were placed on.
    pub fn dispatch_job(&mut self, job_id: JobId) {
        let Some(run) = self.jobs.get_active(job_id) else {
            tracing::debug!(job_id = %job_id, "Job gone before dispatch");
            return;
        };
        let nodes = self.nodes.node_ids();
        let placements = match self.planner.plan(run, &nodes) {
            Ok(placements) => placements,
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Job planning failed");
                self.terminate_job(job_id, JobStatus::TerminatedFailure, Some(e.to_string()));
                return;
            }
        };

        let (app_name, graph, flags) = (run.app_name.clone(), run.graph.clone(), run.flags);
        if let Err(e) = self.jobs.mark_dispatched(job_id, &placements) {
            tracing::error!(job_id = %job_id, error = %e, "Failed to record job dispatch");
            return;
        }

        let mut by_node: BTreeMap<String, Vec<TaskId>> = BTreeMap::new();
        for placement in placements {
            by_node
                .entry(placement.node_id)
                .or_default()
                .push(placement.task_id);
        }
        if by_node.is_empty() {
            self.terminate_job(job_id, JobStatus::TerminatedSuccess, None);
            return;
        }

        tracing::info!(job_id = %job_id, nodes = by_node.len(), "Dispatching job");
        for (node_id, tasks) in by_node {
            self.send_to(
                &node_id,
                NodeCommand::StartTasks {
                    job_id,
                    app_name: app_name.clone(),
                    graph: graph.clone(),
                    flags,
                    tasks,
                },
            );
        }
    }

    pub fn task_complete(
        &mut self,
        job_id: JobId,
        task_id: &str,
        node_id: &str,
        statistics: HashMap<String, i64>,
    ) -> Result<()> {
        if let Some(status) = self
            .jobs
            .task_complete(job_id, task_id, node_id, statistics)?
        {
            self.terminate_job(job_id, status, None);
        }
        Ok(())
    }

    pub fn task_failure(
        &mut self,
        job_id: JobId,
        task_id: &str,
        node_id: Option<&str>,
        details: &str,
    ) -> Result<()> {
        if let Some(status) = self.jobs.task_failure(job_id, task_id, node_id, details)? {
            self.terminate_job(job_id, status, Some(details.to_string()));
        }
        Ok(())
    }

    /// Move a job to a terminal state and fan the consequences out: abort
    /// unfinished tasks, ask participants to clean up, settle directories and
    /// log the run. No-op if the job is not active.
    pub fn terminate_job(&mut self, job_id: JobId, status: JobStatus, details: Option<String>) {
        let Some(terminated) = self.jobs.terminate(job_id, status, details) else {
            return;
        };

        for (node_id, tasks) in &terminated.unfinished {
            self.send_to(
                node_id,
                NodeCommand::AbortTasks {
                    job_id,
                    tasks: tasks.clone(),
                },
            );
        }
        for node_id in &terminated.participants {
            self.send_to(node_id, NodeCommand::CleanupJoblet { job_id, status });
        }

        self.partitions.remove_job(job_id);
        let failure = (status == JobStatus::TerminatedFailure).then(|| {
            terminated
                .summary
                .details
                .clone()
                .unwrap_or_else(|| "job failed".to_string())
        });
        self.datasets.job_finished(job_id, failure);

        if let Some(log) = self.job_log.as_mut() {
            if let Err(e) = log.append(&terminated.summary) {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to append to job log");
            }
        }

        for evicted in terminated.evicted {
            self.datasets.remove_job(evicted);
        }
    }

    pub fn wait_for_completion(&mut self, job_id: JobId, sink: Sink<JobStatusReport>) {
        self.jobs.wait_for_completion(job_id, sink);
    }

    pub fn job_status(&self, job_id: JobId) -> Result<JobStatusReport> {
        self.jobs.status(job_id)
    }

    pub fn joblet_cleanup(&mut self, job_id: JobId, node_id: &str) {
        if !self.jobs.joblet_cleaned_up(job_id, node_id) {
            tracing::debug!(job_id = %job_id, node_id, "Unexpected joblet cleanup notification");
        }
    }

    pub fn report_profile(&mut self, job_id: JobId, node_id: &str, counters: HashMap<String, i64>) {
        if !self.jobs.record_profile(job_id, node_id, counters) {
            tracing::debug!(job_id = %job_id, node_id, "Profile for inactive job ignored");
        }
    }
}
