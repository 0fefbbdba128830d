use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};

use crate::application::ApplicationInfo;
use crate::config::{ControllerIdentity, CoordinatorConfig};
use crate::controller::ControllerQueue;
use crate::error::{CoordinatorError, Result};
use crate::grpc::convert::{
    job_status_to_proto, node_info, record_from_proto, record_to_proto, result_status_to_proto,
};
use crate::job::{JobId, JobStatusReport};
use crate::proto::client_service_server::ClientService;
use crate::proto::{
    ApplicationRequest, ApplicationResponse, ClusterControllerInfo, ClusterTopologyResponse,
    DatasetRecordDescriptorResponse, DatasetRequest, DatasetResultLocationsRequest,
    DatasetResultLocationsResponse, DatasetResultStatusResponse, GetClusterControllerInfoRequest,
    GetClusterTopologyRequest, GetDatasetDirectoryServiceInfoRequest,
    GetNodeControllersInfoRequest, JobStatusRequest, JobStatusResponse, NetworkAddress,
    NodeControllersInfo, StartJobRequest, StartJobResponse,
};
use crate::work::{map_sink, oneshot_sink};

/// Client-facing endpoint. Every call except the identity and topology
/// queries goes through the work queue.
pub struct ClientServiceHandler {
    queue: ControllerQueue,
    config: Arc<CoordinatorConfig>,
    identity: ControllerIdentity,
    shutdown: CancellationToken,
}

impl ClientServiceHandler {
    pub fn new(
        queue: ControllerQueue,
        config: Arc<CoordinatorConfig>,
        identity: ControllerIdentity,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            queue,
            config,
            identity,
            shutdown,
        }
    }

    /// Wait for a sink completed by a later unit. Gives up on shutdown so
    /// long polls do not hold the server open.
    async fn wait<T>(&self, rx: oneshot::Receiver<Result<T>>) -> std::result::Result<T, Status> {
        tokio::select! {
            result = rx => Ok(result.map_err(|_| CoordinatorError::WorkAborted)??),
            _ = self.shutdown.cancelled() => Err(Status::unavailable("Coordinator is shutting down")),
        }
    }
}

fn app_name(req: ApplicationRequest) -> Result<String> {
    if req.app_name.trim().is_empty() {
        return Err(CoordinatorError::Malformed(
            "Application name cannot be empty".to_string(),
        ));
    }
    Ok(req.app_name)
}

fn application_response(info: ApplicationInfo) -> ApplicationResponse {
    ApplicationResponse {
        app_name: info.name,
        state: info.state.to_string(),
    }
}

fn job_status_response(report: JobStatusReport) -> JobStatusResponse {
    JobStatusResponse {
        job_id: report.job_id.0,
        status: job_status_to_proto(report.status) as i32,
        details: report.details.unwrap_or_default(),
    }
}

#[tonic::async_trait]
impl ClientService for ClientServiceHandler {
    async fn get_cluster_controller_info(
        &self,
        _request: Request<GetClusterControllerInfoRequest>,
    ) -> std::result::Result<Response<ClusterControllerInfo>, Status> {
        Ok(Response::new(ClusterControllerInfo {
            client_host: self.identity.client_host.clone(),
            client_port: u32::from(self.identity.client_port),
            http_port: self.identity.http_port.map(u32::from).unwrap_or(0),
        }))
    }

    async fn create_application(
        &self,
        request: Request<ApplicationRequest>,
    ) -> std::result::Result<Response<ApplicationResponse>, Status> {
        let name = app_name(request.into_inner())?;
        let info = self
            .queue
            .call("create_application", move |state, _| {
                state.create_application(&name)
            })
            .await??;
        Ok(Response::new(application_response(info)))
    }

    async fn start_application(
        &self,
        request: Request<ApplicationRequest>,
    ) -> std::result::Result<Response<ApplicationResponse>, Status> {
        let name = app_name(request.into_inner())?;
        let (sink, rx) = oneshot_sink();
        let sink = map_sink(sink, application_response);
        self.queue.submit("start_application", move |state, _| {
            state.start_application(&name, sink)
        })?;
        Ok(Response::new(self.wait(rx).await?))
    }

    async fn destroy_application(
        &self,
        request: Request<ApplicationRequest>,
    ) -> std::result::Result<Response<ApplicationResponse>, Status> {
        let name = app_name(request.into_inner())?;
        let (sink, rx) = oneshot_sink();
        let sink = map_sink(sink, application_response);
        self.queue.submit("destroy_application", move |state, _| {
            state.destroy_application(&name, sink)
        })?;
        Ok(Response::new(self.wait(rx).await?))
    }

    async fn start_job(
        &self,
        request: Request<StartJobRequest>,
    ) -> std::result::Result<Response<StartJobResponse>, Status> {
        let req = request.into_inner();
        let job_id = self
            .queue
            .call("start_job", move |state, queue| {
                state.submit_job(queue, req.app_name, req.graph, req.flags)
            })
            .await??;
        Ok(Response::new(StartJobResponse { job_id: job_id.0 }))
    }

    async fn get_job_status(
        &self,
        request: Request<JobStatusRequest>,
    ) -> std::result::Result<Response<JobStatusResponse>, Status> {
        let job_id = JobId(request.into_inner().job_id);
        let report = self
            .queue
            .call("get_job_status", move |state, _| state.job_status(job_id))
            .await??;
        Ok(Response::new(job_status_response(report)))
    }

    async fn wait_for_completion(
        &self,
        request: Request<JobStatusRequest>,
    ) -> std::result::Result<Response<JobStatusResponse>, Status> {
        let job_id = JobId(request.into_inner().job_id);
        let (sink, rx) = oneshot_sink();
        let sink = map_sink(sink, job_status_response);
        self.queue.submit("wait_for_completion", move |state, _| {
            state.wait_for_completion(job_id, sink)
        })?;
        Ok(Response::new(self.wait(rx).await?))
    }

    async fn get_dataset_directory_service_info(
        &self,
        _request: Request<GetDatasetDirectoryServiceInfoRequest>,
    ) -> std::result::Result<Response<NetworkAddress>, Status> {
        Ok(Response::new(NetworkAddress {
            host: self.identity.client_host.clone(),
            port: u32::from(self.identity.client_port),
        }))
    }

    async fn get_dataset_result_status(
        &self,
        request: Request<DatasetRequest>,
    ) -> std::result::Result<Response<DatasetResultStatusResponse>, Status> {
        let req = request.into_inner();
        let status = self
            .queue
            .call("get_dataset_result_status", move |state, _| {
                state.result_status(JobId(req.job_id), &req.result_set_id)
            })
            .await??;
        Ok(Response::new(DatasetResultStatusResponse {
            status: result_status_to_proto(status) as i32,
        }))
    }

    async fn get_dataset_record_descriptor(
        &self,
        request: Request<DatasetRequest>,
    ) -> std::result::Result<Response<DatasetRecordDescriptorResponse>, Status> {
        let req = request.into_inner();
        let record_descriptor = self
            .queue
            .call("get_dataset_record_descriptor", move |state, _| {
                state.record_descriptor(JobId(req.job_id), &req.result_set_id)
            })
            .await??;
        Ok(Response::new(DatasetRecordDescriptorResponse { record_descriptor }))
    }

    async fn get_dataset_result_locations(
        &self,
        request: Request<DatasetResultLocationsRequest>,
    ) -> std::result::Result<Response<DatasetResultLocationsResponse>, Status> {
        let req = request.into_inner();
        let known = req
            .known_records
            .into_iter()
            .map(record_from_proto)
            .collect::<Result<Vec<_>>>()?;
        let job_id = JobId(req.job_id);
        let result_set_id = req.result_set_id;

        let (sink, rx) = oneshot_sink();
        self.queue
            .submit("get_dataset_result_locations", move |state, _| {
                state.result_locations(job_id, &result_set_id, known, sink)
            })?;
        let records = self.wait(rx).await?;
        Ok(Response::new(DatasetResultLocationsResponse {
            records: records.iter().map(record_to_proto).collect(),
        }))
    }

    async fn get_node_controllers_info(
        &self,
        _request: Request<GetNodeControllersInfoRequest>,
    ) -> std::result::Result<Response<NodeControllersInfo>, Status> {
        let nodes = self
            .queue
            .call("get_node_controllers_info", |state, _| {
                state
                    .node_registrations()
                    .iter()
                    .map(node_info)
                    .collect::<Vec<_>>()
            })
            .await?;
        Ok(Response::new(NodeControllersInfo { nodes }))
    }

    async fn get_cluster_topology(
        &self,
        _request: Request<GetClusterTopologyRequest>,
    ) -> std::result::Result<Response<ClusterTopologyResponse>, Status> {
        let topology_json = match &self.config.topology {
            Some(topology) => serde_json::to_string(topology)
                .map_err(|e| Status::internal(format!("Failed to encode topology: {}", e)))?,
            None => String::new(),
        };
        Ok(Response::new(ClusterTopologyResponse { topology_json }))
    }
}
