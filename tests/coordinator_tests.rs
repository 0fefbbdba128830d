
use std::time::Duration;

use cluster_coordinator::coordinator::Coordinator;
use cluster_coordinator::error::StartupError;
use cluster_coordinator::job::log::JOB_LOG_FILE;
use cluster_coordinator::proto::GetClusterControllerInfoRequest;
use test_harness::{test_config, TestCoordinator};

#[tokio::test]
async fn test_start_creates_job_log_under_root() {
    let tc = TestCoordinator::start().await;
    let path = tc.root.path().join("logs").join("jobs").join(JOB_LOG_FILE);

    assert!(path.exists());
    assert_eq!(tc.coordinator.config().root_dir, tc.root.path());
    assert!(tc.coordinator.http_addr().is_none());
    assert_ne!(tc.coordinator.client_addr().port(), 0);
    assert_ne!(tc.coordinator.cluster_addr().port(), 0);

    tc.shutdown().await;
}

#[tokio::test]
async fn test_job_log_records_finished_jobs() {
    let tc = TestCoordinator::start().await;
    let mut worker = tc.worker().await;
    worker.register("nc1", "127.0.0.1").await;
    let mut client = tc.client().await;

    let job_id = client
        .start_job(cluster_coordinator::proto::StartJobRequest {
            app_name: String::new(),
            graph: Vec::new(),
            flags: 0,
        })
        .await
        .unwrap()
        .into_inner()
        .job_id;
    let start = worker.next_start_tasks().await;
    worker.fail_task("nc1", job_id, &start.tasks[0].task_id, "bad input");
    client
        .wait_for_completion(cluster_coordinator::proto::JobStatusRequest { job_id })
        .await
        .unwrap();

    let path = tc.root.path().join("logs").join("jobs").join(JOB_LOG_FILE);
    let root = tc.root;
    tc.coordinator.stop().await;

    let contents = std::fs::read_to_string(path).unwrap();
    let line: serde_json::Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
    assert_eq!(line["job_id"], job_id);
    assert_eq!(line["status"], "TERMINATED_FAILURE");
    assert_eq!(line["details"], "bad input");
    drop(root);
}

#[tokio::test]
async fn test_admin_http_surface_is_optional() {
    let tc = TestCoordinator::start_with(|config| cluster_coordinator::config::CoordinatorConfig {
        http_port: Some(0),
        ..config
    })
    .await;

    let http_addr = tc.coordinator.http_addr().expect("admin surface bound");
    assert_eq!(tc.coordinator.identity().http_port, Some(http_addr.port()));

    let mut client = tc.client().await;
    let info = client
        .get_cluster_controller_info(GetClusterControllerInfoRequest {})
        .await
        .unwrap()
        .into_inner();
    assert_eq!(info.http_port, u32::from(http_addr.port()));

    tc.shutdown().await;
}

#[tokio::test]
async fn test_start_fails_when_port_is_taken() {
    let first = TestCoordinator::start().await;
    let root = tempfile::tempdir().unwrap();
    let config = cluster_coordinator::config::CoordinatorConfig {
        client_addr: first.coordinator.client_addr(),
        ..test_config(&root)
    };

    let err = Coordinator::start(config).await.err().expect("bind failure");
    assert!(matches!(err, StartupError::Bind { .. }));

    first.shutdown().await;
}

#[tokio::test]
async fn test_start_fails_when_job_log_cannot_be_opened() {
    let root = tempfile::tempdir().unwrap();
    // A plain file where the log directory should be.
    std::fs::write(root.path().join("logs"), b"not a directory").unwrap();

    let err = Coordinator::start(test_config(&root))
        .await
        .err()
        .expect("job log failure");
    assert!(matches!(err, StartupError::JobLog { .. }));
}

#[tokio::test]
async fn test_run_until_stops_on_cancel() {
    let tc = TestCoordinator::start().await;
    let token = tokio_util::sync::CancellationToken::new();
    let handle = tokio::spawn(tc.coordinator.run_until(token.clone()));

    token.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("coordinator did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_start_rejects_zero_timings() {
    let root = tempfile::tempdir().unwrap();
    let configs = [
        test_config(&root).with_heartbeat(0, 3),
        test_config(&root).with_heartbeat(100, 0),
        cluster_coordinator::config::CoordinatorConfig {
            sweep_period_ms: Some(0),
            ..test_config(&root)
        },
    ];

    for config in configs {
        let err = Coordinator::start(config).await.err().expect("invalid config");
        assert!(matches!(err, StartupError::InvalidConfig(_)), "{}", err);
    }
    // Rejected before anything touched the root directory.
    assert!(!root.path().join("logs").exists());
}
