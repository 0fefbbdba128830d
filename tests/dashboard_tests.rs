use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use cluster_coordinator::cluster::NodeRegistration;
use cluster_coordinator::config::{ControllerIdentity, CoordinatorConfig};
use cluster_coordinator::controller::{ControllerQueue, ControllerState};
use cluster_coordinator::dashboard::{router, DashboardState};
use cluster_coordinator::work::{WorkQueue, WorkQueueWorker};

fn test_app() -> (Router, ControllerQueue, WorkQueueWorker<ControllerState>) {
    let config = Arc::new(CoordinatorConfig::default().with_job_history_size(4));
    let (queue, worker) =
        WorkQueue::start("dashboard-test", ControllerState::new(config.clone())).unwrap();
    let state = DashboardState {
        queue: queue.clone(),
        config,
        identity: ControllerIdentity {
            client_host: "10.0.0.9".to_string(),
            client_port: 1098,
            cluster_port: 1099,
            http_port: Some(8080),
        },
    };
    (router(state), queue, worker)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body).unwrap();
    (status, json)
}

#[tokio::test]
async fn test_info_endpoint() {
    let (app, _queue, worker) = test_app();

    let (status, json) = get(&app, "/api/info").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["client_host"], "10.0.0.9");
    assert_eq!(json["client_port"], 1098);
    assert_eq!(json["http_port"], 8080);
    worker.stop();
}

#[tokio::test]
async fn test_config_endpoint() {
    let (app, _queue, worker) = test_app();

    let (status, json) = get(&app, "/api/config").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["job_history_size"], 4);
    assert_eq!(json["max_missed_heartbeats"], 5);
    worker.stop();
}

#[tokio::test]
async fn test_nodes_and_ip_map_endpoints() {
    let (app, queue, worker) = test_app();
    queue
        .call("register", |state, _| {
            state.register_node(NodeRegistration::new("nc1", "10.0.0.1"), None, Instant::now())
        })
        .await
        .unwrap()
        .unwrap();

    let (status, nodes) = get(&app, "/api/nodes").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(nodes.as_array().unwrap().len(), 1);
    assert_eq!(nodes[0]["registration"]["node_id"], "nc1");

    let (status, map) = get(&app, "/api/ip-map").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(map["10.0.0.1"][0], "nc1");
    worker.stop();
}

#[tokio::test]
async fn test_job_endpoints() {
    let (app, queue, worker) = test_app();
    let job_id = queue
        .call("submit", |state, queue| {
            state.submit_job(queue, String::new(), Vec::new(), 0)
        })
        .await
        .unwrap()
        .unwrap();

    // With no nodes the job fails during dispatch and lands in the archive.
    let (status, job) = get(&app, &format!("/api/jobs/{}", job_id.0)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["status"], "TERMINATED_FAILURE");
    assert_eq!(job["profiling"], false);

    let (_, active) = get(&app, "/api/jobs/active").await;
    assert!(active.as_array().unwrap().is_empty());
    let (_, archived) = get(&app, "/api/jobs/archive").await;
    assert_eq!(archived[0]["job_id"], job_id.0);

    let (status, error) = get(&app, "/api/jobs/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(error["error"].as_str().unwrap().contains("JID:999"));
    worker.stop();
}

#[tokio::test]
async fn test_applications_endpoint() {
    let (app, queue, worker) = test_app();
    queue
        .call("create", |state, _| state.create_application("etl"))
        .await
        .unwrap()
        .unwrap();

    let (status, apps) = get(&app, "/api/applications").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(apps[0]["name"], "etl");
    assert_eq!(apps[0]["state"], "CREATED");

    queue
        .call("message", |state, _| {
            state.application_message("etl", "nc1", b"hello".to_vec())
        })
        .await
        .unwrap()
        .unwrap();
    let (status, detail) = get(&app, "/api/applications/etl").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["name"], "etl");
    assert_eq!(detail["inbox"].as_array().unwrap().len(), 1);
    assert_eq!(detail["inbox"][0]["node_id"], "nc1");

    let (status, _) = get(&app, "/api/applications/none").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    worker.stop();
}

#[tokio::test]
async fn test_stopped_queue_is_unavailable() {
    let (app, _queue, worker) = test_app();
    tokio::task::spawn_blocking(move || worker.stop())
        .await
        .unwrap();

    let (status, _) = get(&app, "/api/nodes").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
