use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::{CoordinatorError, Result};
use crate::job::{JobId, JobStatus, TaskId};

pub type NodeId = String;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct NetworkAddress {
    pub host: String,
    pub port: u16,
}

impl NetworkAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// What a worker announces about itself when it registers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeRegistration {
    pub node_id: NodeId,
    pub control_address: Option<NetworkAddress>,
    pub data_address: Option<NetworkAddress>,
    pub result_address: Option<NetworkAddress>,
    pub ip_address: String,
    pub cores: u32,
    pub memory_bytes: u64,
}

impl NodeRegistration {
    pub fn new(node_id: impl Into<NodeId>, ip_address: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            control_address: None,
            data_address: None,
            result_address: None,
            ip_address: ip_address.into(),
            cores: 0,
            memory_bytes: 0,
        }
    }
}

/// Statistics snapshot carried by every heartbeat. Informational only.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HeartbeatStats {
    pub load_average: f64,
    pub heap_used_bytes: u64,
    pub heap_max_bytes: u64,
    pub thread_count: u32,
    pub open_connections: u32,
    pub queue_depth: u32,
}

/// Commands the coordinator pushes down a worker's control channel.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeCommand {
    StartTasks {
        job_id: JobId,
        app_name: String,
        graph: Vec<u8>,
        flags: u32,
        tasks: Vec<TaskId>,
    },
    AbortTasks {
        job_id: JobId,
        tasks: Vec<TaskId>,
    },
    CleanupJoblet {
        job_id: JobId,
        status: JobStatus,
    },
    PartitionAvailable {
        job_id: JobId,
        partition_id: String,
        data_address: Option<NetworkAddress>,
    },
    ApplicationStateChange {
        app_name: String,
        start: bool,
        request_id: u64,
    },
}

/// Outbound half of a worker's control channel.
///
/// Sending never blocks; the transport drains the channel on its own task.
#[derive(Debug, Clone)]
pub struct NodeLink {
    tx: mpsc::UnboundedSender<NodeCommand>,
}

impl NodeLink {
    pub fn new(tx: mpsc::UnboundedSender<NodeCommand>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<NodeCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn send(&self, command: NodeCommand) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| CoordinatorError::SendFailed("node control channel".to_string()))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Registry entry for one worker.
#[derive(Debug, Clone)]
pub struct NodeState {
    pub registration: NodeRegistration,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: Instant,
    pub last_heartbeat_at: DateTime<Utc>,
    pub stats: Option<HeartbeatStats>,
    pub link: Option<NodeLink>,
}

impl NodeState {
    pub fn new(registration: NodeRegistration, link: Option<NodeLink>, now: Instant) -> Self {
        let wall = Utc::now();
        Self {
            registration,
            registered_at: wall,
            last_heartbeat: now,
            last_heartbeat_at: wall,
            stats: None,
            link,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.registration.node_id
    }

    /// Record a heartbeat. The timestamp never moves backwards.
    pub fn update_heartbeat(&mut self, stats: HeartbeatStats, now: Instant) {
        if now > self.last_heartbeat {
            self.last_heartbeat = now;
        }
        self.last_heartbeat_at = Utc::now();
        self.stats = Some(stats);
    }

    pub fn is_alive(&self, now: Instant, timeout: std::time::Duration) -> bool {
        now.saturating_duration_since(self.last_heartbeat) <= timeout
    }

    /// Push a command to the worker. Failures are transient: logged, never fatal.
    pub fn send(&self, command: NodeCommand) -> bool {
        match &self.link {
            Some(link) => match link.send(command) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(node_id = %self.node_id(), error = %e, "Failed to send to node");
                    false
                }
            },
            None => {
                tracing::debug!(node_id = %self.node_id(), "Node has no control channel");
                false
            }
        }
    }
}

/// Read-only view of a node for inspection surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct NodeSummary {
    pub registration: NodeRegistration,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub millis_since_heartbeat: u64,
    pub stats: Option<HeartbeatStats>,
}

impl NodeSummary {
    pub fn of(state: &NodeState, now: Instant) -> Self {
        Self {
            registration: state.registration.clone(),
            registered_at: state.registered_at,
            last_heartbeat_at: state.last_heartbeat_at,
            millis_since_heartbeat: now.saturating_duration_since(state.last_heartbeat).as_millis()
                as u64,
            stats: state.stats.clone(),
        }
    }
}
