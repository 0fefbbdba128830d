use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};

use crate::cluster::{NodeId, NodeLink};
use crate::config::CoordinatorConfig;
use crate::controller::{ControllerQueue, ControllerState};
use crate::dataset::ResultPartitionLocation;
use crate::error::{CoordinatorError, Result};
use crate::grpc::convert::{
    address_from_proto, command_to_body, error_body, node_info, registration_from_proto,
    stats_from_proto,
};
use crate::job::JobId;
use crate::partition::{PartitionDescriptor, PartitionRequest};
use crate::proto::coordinator_envelope::Body;
use crate::proto::node_control_service_server::NodeControlService;
use crate::proto::node_envelope::Function;
use crate::proto::{self, CoordinatorEnvelope, NodeEnvelope};
use crate::work::{complete, FnSink, Sink};

type EnvelopeStream =
    Pin<Box<dyn tokio_stream::Stream<Item = std::result::Result<CoordinatorEnvelope, Status>> + Send>>;

/// Worker-facing endpoint: one bidirectional control stream per worker.
pub struct NodeControlHandler {
    queue: ControllerQueue,
    config: Arc<CoordinatorConfig>,
    shutdown: CancellationToken,
}

impl NodeControlHandler {
    pub fn new(
        queue: ControllerQueue,
        config: Arc<CoordinatorConfig>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            queue,
            config,
            shutdown,
        }
    }
}

/// Outbound half of a control stream. Every envelope gets the next
/// coordinator message id.
#[derive(Clone)]
struct Outbound {
    tx: mpsc::UnboundedSender<std::result::Result<CoordinatorEnvelope, Status>>,
    next_mid: Arc<AtomicU64>,
}

impl Outbound {
    fn send(&self, rmid: Option<u64>, body: Body) -> bool {
        let envelope = CoordinatorEnvelope {
            mid: self.next_mid.fetch_add(1, Ordering::Relaxed),
            rmid,
            body: Some(body),
        };
        self.tx.send(Ok(envelope)).is_ok()
    }

    fn reply_error(&self, rmid: u64, error: &CoordinatorError) {
        if !self.send(Some(rmid), error_body(error)) {
            tracing::debug!(rmid, error = %error, "Control stream closed before error reply");
        }
    }

    /// Sink answering request `rmid` with `to_body(value)` or an error envelope.
    fn reply_sink<T, F>(&self, rmid: u64, to_body: F) -> Sink<T>
    where
        T: 'static,
        F: FnOnce(T) -> Body + Send + 'static,
    {
        let out = self.clone();
        Box::new(FnSink(move |result: Result<T>| match result {
            Ok(value) => {
                if !out.send(Some(rmid), to_body(value)) {
                    tracing::debug!(rmid, "Control stream closed before reply");
                }
            }
            Err(e) => out.reply_error(rmid, &e),
        }))
    }

    /// Sink for notifications: silent on success, error envelope on failure.
    fn notify_sink(&self, rmid: u64) -> Sink<()> {
        let out = self.clone();
        Box::new(FnSink(move |result: Result<()>| {
            if let Err(e) = result {
                out.reply_error(rmid, &e);
            }
        }))
    }
}

/// Node id a control stream registered as. Written only by queue units, so
/// it reflects registrations that actually succeeded.
#[derive(Clone, Default)]
struct RegisteredNode(Arc<Mutex<Option<NodeId>>>);

impl RegisteredNode {
    fn get(&self) -> Option<NodeId> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set(&self, node_id: Option<NodeId>) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = node_id;
    }
}

/// Per-connection state owned by the reader task.
struct Connection {
    queue: ControllerQueue,
    config: Arc<CoordinatorConfig>,
    out: Outbound,
    link: NodeLink,
    node_id: RegisteredNode,
}

impl Connection {
    /// Run `op` on the queue and hand its result to `sink`.
    fn submit<T, F>(&self, name: &'static str, rmid: u64, sink: Sink<T>, op: F)
    where
        T: 'static,
        F: FnOnce(&mut ControllerState, &ControllerQueue) -> Result<T> + Send + 'static,
    {
        let submitted = self
            .queue
            .submit(name, move |state, queue| complete(sink, op(state, queue)));
        if let Err(e) = submitted {
            self.out.reply_error(rmid, &e);
        }
    }

    fn handle(&mut self, envelope: NodeEnvelope) {
        let rmid = envelope.mid;
        let Some(function) = envelope.function else {
            tracing::warn!(mid = rmid, node_id = ?self.node_id.get(), "Envelope without a known function");
            self.out.reply_error(
                rmid,
                &CoordinatorError::UnknownFunction("unknown function".to_string()),
            );
            return;
        };

        match function {
            Function::RegisterNode(req) => {
                let registration = match registration_from_proto(req.node) {
                    Ok(registration) => registration,
                    Err(e) => return self.out.reply_error(rmid, &e),
                };
                let node_id = registration.node_id.clone();
                let registered = self.node_id.clone();
                let link = self.link.clone();
                let (period, missed) = (
                    self.config.heartbeat_period_ms,
                    self.config.max_missed_heartbeats,
                );
                let sink = self.out.reply_sink(rmid, move |()| {
                    Body::Registration(proto::NodeRegistrationResult {
                        node_id,
                        heartbeat_period_ms: period,
                        max_missed_heartbeats: missed,
                    })
                });
                self.submit("register_node", rmid, sink, move |state, _| {
                    let node_id = registration.node_id.clone();
                    state.register_node(registration, Some(link), Instant::now())?;
                    registered.set(Some(node_id));
                    Ok(())
                });
            }
            Function::UnregisterNode(req) => {
                let sink = self.out.reply_sink(rmid, |()| Body::Ack(proto::Ack {}));
                let registered = self.node_id.clone();
                self.submit("unregister_node", rmid, sink, move |state, _| {
                    state.unregister_node(&req.node_id)?;
                    if registered.get().as_deref() == Some(req.node_id.as_str()) {
                        registered.set(None);
                    }
                    Ok(())
                });
            }
            Function::NodeHeartbeat(req) => {
                let stats = stats_from_proto(req.data);
                self.submit("node_heartbeat", rmid, self.out.notify_sink(rmid), move |state, _| {
                    state.heartbeat(&req.node_id, stats, Instant::now());
                    Ok(())
                });
            }
            Function::NotifyTaskComplete(req) => {
                self.submit("notify_task_complete", rmid, self.out.notify_sink(rmid), move |state, _| {
                    state.task_complete(JobId(req.job_id), &req.task_id, &req.node_id, req.statistics)
                });
            }
            Function::NotifyTaskFailure(req) => {
                self.submit("notify_task_failure", rmid, self.out.notify_sink(rmid), move |state, _| {
                    let node_id = (!req.node_id.is_empty()).then_some(req.node_id.as_str());
                    state.task_failure(JobId(req.job_id), &req.task_id, node_id, &req.details)
                });
            }
            Function::NotifyJobletCleanup(req) => {
                self.submit("notify_joblet_cleanup", rmid, self.out.notify_sink(rmid), move |state, _| {
                    state.joblet_cleanup(JobId(req.job_id), &req.node_id);
                    Ok(())
                });
            }
            Function::ReportProfile(req) => {
                self.submit("report_profile", rmid, self.out.notify_sink(rmid), move |state, _| {
                    state.report_profile(JobId(req.job_id), &req.node_id, req.counters);
                    Ok(())
                });
            }
            Function::RegisterPartitionProvider(req) => {
                let descriptor = match address_from_proto(req.data_address) {
                    Ok(data_address) => PartitionDescriptor {
                        job_id: JobId(req.job_id),
                        partition_id: req.partition_id,
                        node_id: req.node_id,
                        data_address,
                    },
                    Err(e) => return self.out.reply_error(rmid, &e),
                };
                self.submit("register_partition_provider", rmid, self.out.notify_sink(rmid), move |state, _| {
                    state.register_partition_provider(descriptor);
                    Ok(())
                });
            }
            Function::RegisterPartitionRequest(req) => {
                let request = PartitionRequest {
                    job_id: JobId(req.job_id),
                    partition_id: req.partition_id,
                    node_id: req.node_id,
                };
                self.submit("register_partition_request", rmid, self.out.notify_sink(rmid), move |state, _| {
                    state.register_partition_request(request);
                    Ok(())
                });
            }
            Function::RegisterResultPartitionLocation(req) => {
                let address = match address_from_proto(req.address) {
                    Ok(address) => address,
                    Err(e) => return self.out.reply_error(rmid, &e),
                };
                // Resolved on the queue so a registration sent just before is seen.
                let registered = self.node_id.clone();
                self.submit("register_result_partition_location", rmid, self.out.notify_sink(rmid), move |state, _| {
                    let node_id = registered.get().ok_or_else(|| {
                        CoordinatorError::Malformed("result location before registration".to_string())
                    })?;
                    state.register_result_location(ResultPartitionLocation {
                        job_id: JobId(req.job_id),
                        result_set_id: req.result_set_id,
                        ordered: req.ordered,
                        record_descriptor: req.record_descriptor,
                        partition: req.partition as usize,
                        n_partitions: req.n_partitions as usize,
                        node_id,
                        address,
                    })
                });
            }
            Function::ReportResultPartitionWriteCompletion(req) => {
                self.submit("report_result_partition_write_completion", rmid, self.out.notify_sink(rmid), move |state, _| {
                    state.result_write_complete(JobId(req.job_id), &req.result_set_id, req.partition as usize)
                });
            }
            Function::ReportResultPartitionFailure(req) => {
                self.submit("report_result_partition_failure", rmid, self.out.notify_sink(rmid), move |state, _| {
                    state.result_partition_failure(JobId(req.job_id), &req.result_set_id, req.partition as usize)
                });
            }
            Function::SendApplicationMessage(req) => {
                self.submit("send_application_message", rmid, self.out.notify_sink(rmid), move |state, _| {
                    state.application_message(&req.app_name, &req.node_id, req.message)
                });
            }
            Function::ApplicationStateChangeResponse(req) => {
                self.submit("application_state_change_response", rmid, self.out.notify_sink(rmid), move |state, _| {
                    state.application_state_change_ack(&req.app_name, &req.node_id, req.request_id);
                    Ok(())
                });
            }
            Function::GetNodeControllersInfo(_) => {
                let sink = self.out.reply_sink(rmid, |nodes: Vec<proto::NodeInfo>| {
                    Body::NodeControllersInfo(proto::NodeControllersInfo { nodes })
                });
                self.submit("get_node_controllers_info", rmid, sink, |state, _| {
                    Ok(state.node_registrations().iter().map(node_info).collect())
                });
            }
        }
    }
}

#[tonic::async_trait]
impl NodeControlService for NodeControlHandler {
    type OpenChannelStream = EnvelopeStream;

    async fn open_channel(
        &self,
        request: Request<Streaming<NodeEnvelope>>,
    ) -> std::result::Result<Response<Self::OpenChannelStream>, Status> {
        let remote = request.remote_addr();
        let mut inbound = request.into_inner();

        let (tx, rx) = mpsc::unbounded_channel();
        let out = Outbound {
            tx,
            next_mid: Arc::new(AtomicU64::new(0)),
        };

        // Commands pushed by the controller become envelopes on this stream.
        let (link, mut commands) = NodeLink::channel();
        let forward_out = out.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(command) = commands.recv().await {
                if !forward_out.send(None, command_to_body(command)) {
                    break;
                }
            }
        });

        let mut connection = Connection {
            queue: self.queue.clone(),
            config: self.config.clone(),
            out,
            link,
            node_id: RegisteredNode::default(),
        };
        let shutdown = self.shutdown.clone();

        tracing::debug!(remote = ?remote, "Node control stream opened");
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    message = inbound.message() => match message {
                        Ok(Some(envelope)) => connection.handle(envelope),
                        Ok(None) => break,
                        Err(status) => {
                            tracing::warn!(node_id = ?connection.node_id.get(), error = %status, "Node control stream failed");
                            break;
                        }
                    }
                }
            }
            forwarder.abort();
            tracing::info!(node_id = ?connection.node_id.get(), "Node control stream closed");
        });

        Ok(Response::new(
            Box::pin(UnboundedReceiverStream::new(rx)) as Self::OpenChannelStream
        ))
    }
}
