use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cluster::NodeId;
use crate::config::{ControllerIdentity, CoordinatorConfig};
use crate::controller::{spawn_sweeper, ControllerQueue, ControllerState};
use crate::dashboard::{run_dashboard, DashboardState};
use crate::error::{Result, StartupError};
use crate::grpc::{serve_client, serve_node_control, ClientServiceHandler, NodeControlHandler};
use crate::job::{BroadcastPlanner, JobLog, TaskPlanner};
use crate::work::{WorkQueue, WorkQueueWorker};

/// A running coordinator: work queue, both RPC endpoints, the optional admin
/// surface and the dead-node sweeper.
pub struct Coordinator {
    config: Arc<CoordinatorConfig>,
    identity: ControllerIdentity,
    queue: ControllerQueue,
    worker: Option<WorkQueueWorker<ControllerState>>,
    cluster_addr: SocketAddr,
    client_addr: SocketAddr,
    http_addr: Option<SocketAddr>,
    servers_shutdown: CancellationToken,
    sweeper_cancel: CancellationToken,
    servers: Vec<JoinHandle<()>>,
    sweeper: Option<JoinHandle<()>>,
}

async fn bind(addr: SocketAddr) -> std::result::Result<(TcpListener, SocketAddr), StartupError> {
    let to_err = |source| StartupError::Bind { addr, source };
    let listener = TcpListener::bind(addr).await.map_err(to_err)?;
    let local = listener.local_addr().map_err(to_err)?;
    Ok((listener, local))
}

impl Coordinator {
    pub async fn start(config: CoordinatorConfig) -> std::result::Result<Self, StartupError> {
        Self::start_with_planner(config, Box::new(BroadcastPlanner::default())).await
    }

    /// Start every subsystem. An invalid config, failing to open the job log
    /// or failing to bind any listener aborts startup.
    pub async fn start_with_planner(
        config: CoordinatorConfig,
        planner: Box<dyn TaskPlanner>,
    ) -> std::result::Result<Self, StartupError> {
        config.validate()?;
        let job_log = JobLog::open(&config.job_log_dir())?;

        let (cluster_listener, cluster_addr) = bind(config.cluster_addr).await?;
        let (client_listener, client_addr) = bind(config.client_addr).await?;
        let http = match config.http_port {
            Some(port) => Some(bind(SocketAddr::new(config.client_addr.ip(), port)).await?),
            None => None,
        };
        let http_addr = http.as_ref().map(|(_, addr)| *addr);

        let identity = ControllerIdentity {
            client_host: config.client_host(),
            client_port: client_addr.port(),
            cluster_port: cluster_addr.port(),
            http_port: http_addr.map(|a| a.port()),
        };
        let config = Arc::new(config);

        let mut state = ControllerState::with_planner(config.clone(), planner);
        state.set_job_log(job_log);
        let (queue, worker) =
            WorkQueue::start("cc-work-queue", state).map_err(StartupError::WorkQueue)?;

        let servers_shutdown = CancellationToken::new();
        let mut servers = Vec::new();

        let node_handler =
            NodeControlHandler::new(queue.clone(), config.clone(), servers_shutdown.clone());
        let token = servers_shutdown.clone();
        servers.push(tokio::spawn(async move {
            if let Err(e) = serve_node_control(cluster_listener, node_handler, token).await {
                tracing::error!(error = %e, "Node control server failed");
            }
        }));

        let client_handler = ClientServiceHandler::new(
            queue.clone(),
            config.clone(),
            identity.clone(),
            servers_shutdown.clone(),
        );
        let token = servers_shutdown.clone();
        servers.push(tokio::spawn(async move {
            if let Err(e) = serve_client(client_listener, client_handler, token).await {
                tracing::error!(error = %e, "Client server failed");
            }
        }));

        if let Some((listener, _)) = http {
            let dashboard_state = DashboardState {
                queue: queue.clone(),
                config: config.clone(),
                identity: identity.clone(),
            };
            servers.push(tokio::spawn(run_dashboard(
                listener,
                dashboard_state,
                servers_shutdown.clone(),
            )));
        }

        let sweeper_cancel = CancellationToken::new();
        let sweeper = spawn_sweeper(
            queue.clone(),
            config.sweep_period(),
            config.dead_node_timeout(),
            sweeper_cancel.clone(),
        );

        tracing::info!(
            cluster_addr = %cluster_addr,
            client_addr = %client_addr,
            http_addr = ?http_addr,
            heartbeat_period_ms = config.heartbeat_period_ms,
            max_missed_heartbeats = config.max_missed_heartbeats,
            job_history_size = config.job_history_size,
            "Coordinator started"
        );

        Ok(Self {
            config,
            identity,
            queue,
            worker: Some(worker),
            cluster_addr,
            client_addr,
            http_addr,
            servers_shutdown,
            sweeper_cancel,
            servers,
            sweeper: Some(sweeper),
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn identity(&self) -> &ControllerIdentity {
        &self.identity
    }

    pub fn queue(&self) -> &ControllerQueue {
        &self.queue
    }

    pub fn cluster_addr(&self) -> SocketAddr {
        self.cluster_addr
    }

    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.http_addr
    }

    pub async fn ip_address_node_map(&self) -> Result<BTreeMap<String, BTreeSet<NodeId>>> {
        self.queue
            .call("ip_address_node_map", |state, _| state.ip_address_node_map())
            .await
    }

    /// Blocking variant for callers on plain threads. Must not be called from
    /// inside the async runtime.
    pub fn ip_address_node_map_blocking(&self) -> Result<BTreeMap<String, BTreeSet<NodeId>>> {
        self.queue
            .call_blocking("ip_address_node_map", |state, _| state.ip_address_node_map())
    }

    /// Run until `shutdown` is cancelled, then stop.
    pub async fn run_until(self, shutdown: CancellationToken) {
        shutdown.cancelled().await;
        self.stop().await;
    }

    /// Stop accepting connections, stop the sweeper, drain the work queue,
    /// then close the job log.
    pub async fn stop(mut self) {
        tracing::info!("Coordinator stopping");

        self.servers_shutdown.cancel();
        for server in self.servers.drain(..) {
            if let Err(e) = server.await {
                tracing::warn!(error = %e, "Server task ended abnormally");
            }
        }

        self.sweeper_cancel.cancel();
        if let Some(sweeper) = self.sweeper.take() {
            let _ = sweeper.await;
        }

        let Some(worker) = self.worker.take() else {
            return;
        };
        let state = match tokio::task::spawn_blocking(move || worker.stop()).await {
            Ok(state) => state,
            Err(e) => {
                tracing::error!(error = %e, "Work queue shutdown failed");
                None
            }
        };

        if let Some(job_log) = state.and_then(|mut s| s.take_job_log()) {
            if let Err(e) = job_log.close() {
                tracing::warn!(error = %e, "Failed to close job log");
            }
        }
        tracing::info!("Coordinator stopped");
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.servers_shutdown.cancel();
        self.sweeper_cancel.cancel();
    }
}
