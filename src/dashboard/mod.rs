//! Read-only admin HTTP surface. Every handler reads through the work queue.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::config::{ControllerIdentity, CoordinatorConfig};
use crate::controller::ControllerQueue;
use crate::error::CoordinatorError;
use crate::job::JobId;

#[derive(Clone)]
pub struct DashboardState {
    pub queue: ControllerQueue,
    pub config: Arc<CoordinatorConfig>,
    pub identity: ControllerIdentity,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

struct ApiError(StatusCode, String);

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        let status = match err {
            CoordinatorError::UnknownJob(_) | CoordinatorError::UnknownApplication(_) => {
                StatusCode::NOT_FOUND
            }
            CoordinatorError::WorkQueueStopped | CoordinatorError::WorkAborted => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(ErrorResponse { error: self.1 })).into_response()
    }
}

pub fn router(state: DashboardState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/info", get(info_handler))
        .route("/api/config", get(config_handler))
        .route("/api/nodes", get(nodes_handler))
        .route("/api/ip-map", get(ip_map_handler))
        .route("/api/jobs/active", get(active_jobs_handler))
        .route("/api/jobs/archive", get(archived_jobs_handler))
        .route("/api/jobs/:job_id", get(job_handler))
        .route("/api/applications", get(applications_handler))
        .route("/api/applications/:name", get(application_handler))
        .layer(cors)
        .with_state(state)
}

/// Serve the admin surface until `shutdown` is cancelled.
pub async fn run_dashboard(
    listener: TcpListener,
    state: DashboardState,
    shutdown: CancellationToken,
) {
    tracing::info!(addr = ?listener.local_addr().ok(), "Starting admin HTTP server");

    let app = router(state);
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
    {
        tracing::error!(error = %e, "Admin HTTP server failed");
    }
}

async fn info_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(state.identity)
}

async fn config_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(state.config.as_ref().clone())
}

async fn nodes_handler(State(state): State<DashboardState>) -> Result<impl IntoResponse, ApiError> {
    let nodes = state
        .queue
        .call("admin_nodes", |state, _| state.node_summaries())
        .await?;
    Ok(Json(nodes))
}

async fn ip_map_handler(State(state): State<DashboardState>) -> Result<impl IntoResponse, ApiError> {
    let map = state
        .queue
        .call("admin_ip_map", |state, _| state.ip_address_node_map())
        .await?;
    Ok(Json(map))
}

async fn active_jobs_handler(
    State(state): State<DashboardState>,
) -> Result<impl IntoResponse, ApiError> {
    let jobs = state
        .queue
        .call("admin_active_jobs", |state, _| state.active_jobs())
        .await?;
    Ok(Json(jobs))
}

async fn archived_jobs_handler(
    State(state): State<DashboardState>,
) -> Result<impl IntoResponse, ApiError> {
    let jobs = state
        .queue
        .call("admin_archived_jobs", |state, _| state.archived_jobs())
        .await?;
    Ok(Json(jobs))
}

async fn job_handler(
    State(state): State<DashboardState>,
    Path(job_id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    let job_id = JobId(job_id);
    let job = state
        .queue
        .call("admin_job", move |state, _| state.job_summary(job_id))
        .await?
        .ok_or(CoordinatorError::UnknownJob(job_id))?;
    Ok(Json(job))
}

async fn applications_handler(
    State(state): State<DashboardState>,
) -> Result<impl IntoResponse, ApiError> {
    let apps = state
        .queue
        .call("admin_applications", |state, _| state.applications())
        .await?;
    Ok(Json(apps))
}

async fn application_handler(
    State(state): State<DashboardState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let app = state
        .queue
        .call("admin_application", move |state, _| state.application_detail(&name))
        .await??;
    Ok(Json(app))
}
