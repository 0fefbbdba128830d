use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::error::StartupError;
use crate::topology::ClusterTopology;

/// Number of terminal jobs kept for status queries.
pub const DEFAULT_JOB_HISTORY_SIZE: usize = 10;
pub const DEFAULT_HEARTBEAT_PERIOD_MS: u64 = 10_000;
pub const DEFAULT_MAX_MISSED_HEARTBEATS: u32 = 5;
pub const DEFAULT_APP_INBOX_SIZE: usize = 256;
pub const DEFAULT_CLUSTER_PORT: u16 = 1099;
pub const DEFAULT_CLIENT_PORT: u16 = 1098;
/// Upper bound on the partition count a worker may declare for one result set.
pub const DEFAULT_MAX_RESULT_PARTITIONS: usize = 65_536;

/// Startup configuration of the coordinator. Immutable once the service starts.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorConfig {
    /// Address of the worker-facing control endpoint.
    pub cluster_addr: SocketAddr,
    /// Address of the client-facing endpoint.
    pub client_addr: SocketAddr,
    /// Host advertised to clients for the client endpoint and dataset directory.
    /// Defaults to the IP of `client_addr`.
    pub client_advertise_host: Option<String>,
    /// Port for the read-only admin HTTP surface (disabled when `None`).
    pub http_port: Option<u16>,
    /// Root directory; the job log lives under `<root_dir>/logs/jobs`.
    pub root_dir: PathBuf,
    /// Maximum number of terminal jobs retained in the archive.
    pub job_history_size: usize,
    /// Heartbeat period advertised to workers.
    pub heartbeat_period_ms: u64,
    /// Heartbeats a node may miss before the sweep evicts it.
    pub max_missed_heartbeats: u32,
    /// Period of the dead-node sweep. Defaults to the heartbeat period.
    pub sweep_period_ms: Option<u64>,
    /// Maximum number of relayed messages kept per application.
    pub app_inbox_size: usize,
    /// Largest partition count accepted in a result location registration.
    pub max_result_partitions: usize,
    pub topology: Option<ClusterTopology>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            cluster_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_CLUSTER_PORT)),
            client_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_CLIENT_PORT)),
            client_advertise_host: None,
            http_port: None,
            root_dir: PathBuf::from("."),
            job_history_size: DEFAULT_JOB_HISTORY_SIZE,
            heartbeat_period_ms: DEFAULT_HEARTBEAT_PERIOD_MS,
            max_missed_heartbeats: DEFAULT_MAX_MISSED_HEARTBEATS,
            sweep_period_ms: None,
            app_inbox_size: DEFAULT_APP_INBOX_SIZE,
            max_result_partitions: DEFAULT_MAX_RESULT_PARTITIONS,
            topology: None,
        }
    }
}

impl CoordinatorConfig {
    pub fn new(cluster_addr: SocketAddr, client_addr: SocketAddr) -> Self {
        Self {
            cluster_addr,
            client_addr,
            ..Default::default()
        }
    }

    pub fn with_heartbeat(mut self, period_ms: u64, max_missed: u32) -> Self {
        self.heartbeat_period_ms = period_ms;
        self.max_missed_heartbeats = max_missed;
        self
    }

    pub fn with_job_history_size(mut self, size: usize) -> Self {
        self.job_history_size = size;
        self
    }

    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_millis(self.heartbeat_period_ms)
    }

    pub fn sweep_period(&self) -> Duration {
        Duration::from_millis(self.sweep_period_ms.unwrap_or(self.heartbeat_period_ms))
    }

    /// Silence after which a node is considered dead.
    pub fn dead_node_timeout(&self) -> Duration {
        self.heartbeat_period() * self.max_missed_heartbeats
    }

    pub fn client_host(&self) -> String {
        self.client_advertise_host
            .clone()
            .unwrap_or_else(|| self.client_addr.ip().to_string())
    }

    pub fn job_log_dir(&self) -> PathBuf {
        self.root_dir.join("logs").join("jobs")
    }

    /// Reject settings the coordinator cannot run with.
    pub fn validate(&self) -> Result<(), StartupError> {
        let invalid = |reason: &str| Err(StartupError::InvalidConfig(reason.to_string()));
        if self.heartbeat_period_ms == 0 {
            return invalid("heartbeat period must be non-zero");
        }
        if self.sweep_period_ms == Some(0) {
            return invalid("sweep period must be non-zero");
        }
        if self.max_missed_heartbeats == 0 {
            return invalid("max missed heartbeats must be non-zero");
        }
        if self.max_result_partitions == 0 {
            return invalid("max result partitions must be non-zero");
        }
        Ok(())
    }
}

/// Identity clients see: where to reach the coordinator. Fixed after binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControllerIdentity {
    pub client_host: String,
    pub client_port: u16,
    pub cluster_port: u16,
    pub http_port: Option<u16>,
}
