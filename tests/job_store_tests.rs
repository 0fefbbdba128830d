use std::collections::HashMap;

use cluster_coordinator::error::CoordinatorError;
use cluster_coordinator::job::{JobId, JobStatus, JobStore, TaskPlacement};
use cluster_coordinator::work::oneshot_sink;

/// Create and dispatch a job with the given (task, node) placements
fn running_job(store: &mut JobStore, placements: &[(&str, &str)]) -> JobId {
    let job_id = store.create_job(String::new(), b"graph".to_vec(), 0);
    let placements: Vec<TaskPlacement> = placements
        .iter()
        .map(|(task, node)| TaskPlacement::new(*task, *node))
        .collect();
    store.mark_dispatched(job_id, &placements).unwrap();
    job_id
}

/// Run a single-task job to success
fn finished_job(store: &mut JobStore) -> JobId {
    let job_id = running_job(store, &[("t0", "nc1")]);
    let status = store
        .task_complete(job_id, "t0", "nc1", HashMap::new())
        .unwrap()
        .unwrap();
    store.terminate(job_id, status, None).unwrap();
    job_id
}

#[test]
fn test_job_ids_are_monotonic() {
    let mut store = JobStore::new(10);
    let ids: Vec<JobId> = (0..5)
        .map(|_| store.create_job(String::new(), Vec::new(), 0))
        .collect();

    assert_eq!(ids, (0..5).map(JobId).collect::<Vec<_>>());
    assert_eq!(store.status(ids[0]).unwrap().status, JobStatus::Initialized);
}

#[test]
fn test_job_id_display() {
    assert_eq!(JobId(7).to_string(), "JID:7");
}

#[test]
fn test_dispatch_moves_job_to_running() {
    let mut store = JobStore::new(10);
    let job_id = running_job(&mut store, &[("t0", "nc1"), ("t1", "nc2")]);

    let run = store.get(job_id).unwrap();
    assert_eq!(run.status, JobStatus::Running);
    assert_eq!(run.pending_tasks.len(), 2);
    assert_eq!(run.cleanup_pending.len(), 2);
    assert!(run.started_at.is_some());
}

#[test]
fn test_job_succeeds_when_all_tasks_complete() {
    let mut store = JobStore::new(10);
    let job_id = running_job(&mut store, &[("t0", "nc1"), ("t1", "nc2")]);

    assert_eq!(
        store.task_complete(job_id, "t0", "nc1", HashMap::new()),
        Ok(None)
    );
    assert_eq!(
        store.task_complete(job_id, "t1", "nc2", HashMap::new()),
        Ok(Some(JobStatus::TerminatedSuccess))
    );

    let terminated = store
        .terminate(job_id, JobStatus::TerminatedSuccess, None)
        .unwrap();
    assert!(terminated.unfinished.is_empty());
    assert_eq!(terminated.participants, vec!["nc1".to_string(), "nc2".to_string()]);
    assert!(!store.is_active(job_id));
    assert_eq!(
        store.status(job_id).unwrap().status,
        JobStatus::TerminatedSuccess
    );
}

#[test]
fn test_task_failure_fails_job_and_reports_unfinished_tasks() {
    let mut store = JobStore::new(10);
    let job_id = running_job(&mut store, &[("t0", "nc1"), ("t1", "nc1")]);

    let status = store
        .task_failure(job_id, "t0", Some("nc1"), "oom")
        .unwrap()
        .unwrap();
    assert_eq!(status, JobStatus::TerminatedFailure);

    let terminated = store.terminate(job_id, status, None).unwrap();
    assert_eq!(terminated.unfinished["nc1"], vec!["t1".to_string()]);

    let report = store.status(job_id).unwrap();
    assert_eq!(report.status, JobStatus::TerminatedFailure);
    assert_eq!(report.details.as_deref(), Some("oom"));
}

#[test]
fn test_terminate_twice_is_a_no_op() {
    let mut store = JobStore::new(10);
    let job_id = finished_job(&mut store);

    assert!(store
        .terminate(job_id, JobStatus::TerminatedFailure, None)
        .is_none());
    assert_eq!(
        store.status(job_id).unwrap().status,
        JobStatus::TerminatedSuccess
    );
}

#[test]
fn test_archive_keeps_most_recent_jobs() {
    let mut store = JobStore::new(3);
    let ids: Vec<JobId> = (0..5).map(|_| finished_job(&mut store)).collect();

    assert_eq!(store.archive().len(), store.archive().max_size());
    assert_eq!(store.archive().job_ids(), ids[2..].to_vec());
    for evicted in &ids[..2] {
        assert_eq!(
            store.status(*evicted),
            Err(CoordinatorError::UnknownJob(*evicted))
        );
    }
}

#[test]
fn test_terminate_reports_evicted_jobs() {
    let mut store = JobStore::new(1);
    let first = finished_job(&mut store);

    let job_id = running_job(&mut store, &[("t0", "nc1")]);
    let terminated = store
        .terminate(job_id, JobStatus::TerminatedSuccess, None)
        .unwrap();

    assert_eq!(terminated.evicted, vec![first]);
}

#[test]
fn test_waiter_registered_before_termination() {
    let mut store = JobStore::new(10);
    let job_id = running_job(&mut store, &[("t0", "nc1")]);

    let (sink, mut rx) = oneshot_sink();
    store.wait_for_completion(job_id, sink);
    assert!(rx.try_recv().is_err());

    store.task_failure(job_id, "t0", Some("nc1"), "disk full").unwrap();
    store
        .terminate(job_id, JobStatus::TerminatedFailure, None)
        .unwrap();

    let report = rx.try_recv().unwrap().unwrap();
    assert_eq!(report.job_id, job_id);
    assert_eq!(report.status, JobStatus::TerminatedFailure);
    assert_eq!(report.details.as_deref(), Some("disk full"));
}

#[test]
fn test_waiter_registered_after_termination() {
    let mut store = JobStore::new(10);
    let job_id = finished_job(&mut store);

    let (sink, mut rx) = oneshot_sink();
    store.wait_for_completion(job_id, sink);

    assert_eq!(
        rx.try_recv().unwrap().unwrap().status,
        JobStatus::TerminatedSuccess
    );
}

#[test]
fn test_waiting_on_unknown_job() {
    let mut store = JobStore::new(10);
    let (sink, mut rx) = oneshot_sink();
    store.wait_for_completion(JobId(42), sink);

    assert_eq!(
        rx.try_recv().unwrap(),
        Err(CoordinatorError::UnknownJob(JobId(42)))
    );
}

#[test]
fn test_late_notifications() {
    let mut store = JobStore::new(10);
    let job_id = finished_job(&mut store);

    // Archived jobs swallow stragglers.
    assert_eq!(
        store.task_complete(job_id, "t0", "nc1", HashMap::new()),
        Ok(None)
    );
    assert_eq!(store.task_failure(job_id, "t0", None, "late"), Ok(None));

    // Jobs never seen are an error.
    assert_eq!(
        store.task_complete(JobId(99), "t0", "nc1", HashMap::new()),
        Err(CoordinatorError::UnknownJob(JobId(99)))
    );
}

#[test]
fn test_joblet_cleanup_tracking() {
    let mut store = JobStore::new(10);
    let job_id = running_job(&mut store, &[("t0", "nc1"), ("t1", "nc2")]);
    store.task_failure(job_id, "t0", Some("nc1"), "boom").unwrap();
    store.terminate(job_id, JobStatus::TerminatedFailure, None);

    assert!(store.joblet_cleaned_up(job_id, "nc1"));
    assert!(!store.joblet_cleaned_up(job_id, "nc1"));

    store.forget_cleanup("nc2");
    assert!(store.get(job_id).unwrap().cleanup_pending.is_empty());
}

#[test]
fn test_jobs_with_pending_tasks_on_node() {
    let mut store = JobStore::new(10);
    let a = running_job(&mut store, &[("a0", "nc1")]);
    let b = running_job(&mut store, &[("b0", "nc2")]);
    store.create_job(String::new(), Vec::new(), 0);

    assert_eq!(store.jobs_with_pending_tasks_on("nc1"), vec![a]);
    assert_eq!(store.jobs_with_pending_tasks_on("nc2"), vec![b]);
    assert!(store.jobs_with_pending_tasks_on("nc3").is_empty());
}

#[test]
fn test_profiles_only_recorded_for_active_jobs() {
    let mut store = JobStore::new(10);
    let job_id = running_job(&mut store, &[("t0", "nc1")]);
    let counters = HashMap::from([("tuples".to_string(), 100)]);

    assert!(store.record_profile(job_id, "nc1", counters.clone()));
    store.terminate(job_id, JobStatus::TerminatedSuccess, None);
    assert!(!store.record_profile(job_id, "nc1", counters));
    assert_eq!(store.get(job_id).unwrap().profiles["nc1"]["tuples"], 100);
}
