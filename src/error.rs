use thiserror::Error;

use crate::job::JobId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Malformed request: {0}")]
    Malformed(String),

    #[error("Job not found: {0}")]
    UnknownJob(JobId),

    #[error("Node not found: {0}")]
    UnknownNode(String),

    #[error("Node already registered: {0}")]
    DuplicateNode(String),

    #[error("Application not found: {0}")]
    UnknownApplication(String),

    #[error("Application already exists: {0}")]
    ApplicationExists(String),

    #[error("Application {name} is {state}, expected {expected}")]
    ApplicationState {
        name: String,
        state: String,
        expected: String,
    },

    #[error("Result set {result_set_id} not found for job {job_id}")]
    UnknownResultSet {
        job_id: JobId,
        result_set_id: String,
    },

    #[error("No nodes available to run job {0}")]
    NoNodesAvailable(JobId),

    #[error("Task failure in job {job_id}: {details}")]
    TaskFailure { job_id: JobId, details: String },

    #[error("Failed to send to {0}")]
    SendFailed(String),

    #[error("Work queue is stopped")]
    WorkQueueStopped,

    #[error("Work unit aborted before producing a result")]
    WorkAborted,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoordinatorError {
    /// Stable kind string carried in error envelopes on the node channel.
    pub fn kind(&self) -> &'static str {
        match self {
            CoordinatorError::UnknownFunction(_) | CoordinatorError::Malformed(_) => "protocol",
            CoordinatorError::UnknownJob(_)
            | CoordinatorError::UnknownNode(_)
            | CoordinatorError::UnknownApplication(_)
            | CoordinatorError::UnknownResultSet { .. } => "unknown_entity",
            CoordinatorError::DuplicateNode(_) | CoordinatorError::ApplicationExists(_) => {
                "duplicate_registration"
            }
            CoordinatorError::ApplicationState { .. } | CoordinatorError::NoNodesAvailable(_) => {
                "precondition"
            }
            CoordinatorError::TaskFailure { .. } => "task_failure",
            CoordinatorError::SendFailed(_) => "transient_network",
            CoordinatorError::WorkQueueStopped | CoordinatorError::WorkAborted => "unavailable",
            CoordinatorError::Internal(_) => "internal",
        }
    }
}

impl From<CoordinatorError> for tonic::Status {
    fn from(err: CoordinatorError) -> Self {
        let message = err.to_string();
        match err {
            CoordinatorError::UnknownFunction(_) => tonic::Status::unimplemented(message),
            CoordinatorError::Malformed(_) => tonic::Status::invalid_argument(message),
            CoordinatorError::UnknownJob(_)
            | CoordinatorError::UnknownNode(_)
            | CoordinatorError::UnknownApplication(_)
            | CoordinatorError::UnknownResultSet { .. } => tonic::Status::not_found(message),
            CoordinatorError::DuplicateNode(_) | CoordinatorError::ApplicationExists(_) => {
                tonic::Status::already_exists(message)
            }
            CoordinatorError::ApplicationState { .. } | CoordinatorError::NoNodesAvailable(_) => {
                tonic::Status::failed_precondition(message)
            }
            CoordinatorError::TaskFailure { .. } => tonic::Status::aborted(message),
            CoordinatorError::SendFailed(_)
            | CoordinatorError::WorkQueueStopped
            | CoordinatorError::WorkAborted => tonic::Status::unavailable(message),
            CoordinatorError::Internal(_) => tonic::Status::internal(message),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// Errors that abort process startup.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open job log at {path}: {source}")]
    JobLog {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to start work queue: {0}")]
    WorkQueue(#[source] std::io::Error),

    #[error("Failed to load cluster topology from {path}: {reason}")]
    Topology {
        path: std::path::PathBuf,
        reason: String,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}
