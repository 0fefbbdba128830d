//! Conversions between generated protobuf messages and domain types.

use crate::cluster::{HeartbeatStats, NetworkAddress, NodeCommand, NodeRegistration};
use crate::dataset::{DirectoryRecord, ResultStatus};
use crate::error::{CoordinatorError, Result};
use crate::job::JobStatus;
use crate::proto;
use crate::proto::coordinator_envelope::Body;

pub fn address_from_proto(address: Option<proto::NetworkAddress>) -> Result<Option<NetworkAddress>> {
    let Some(address) = address else {
        return Ok(None);
    };
    let port = u16::try_from(address.port)
        .map_err(|_| CoordinatorError::Malformed(format!("port {} out of range", address.port)))?;
    Ok(Some(NetworkAddress::new(address.host, port)))
}

pub fn address_to_proto(address: &NetworkAddress) -> proto::NetworkAddress {
    proto::NetworkAddress {
        host: address.host.clone(),
        port: u32::from(address.port),
    }
}

pub fn registration_from_proto(node: Option<proto::NodeInfo>) -> Result<NodeRegistration> {
    let node = node.ok_or_else(|| CoordinatorError::Malformed("missing node info".to_string()))?;
    if node.node_id.is_empty() {
        return Err(CoordinatorError::Malformed("empty node id".to_string()));
    }
    Ok(NodeRegistration {
        control_address: address_from_proto(node.control_address)?,
        data_address: address_from_proto(node.data_address)?,
        result_address: address_from_proto(node.result_address)?,
        node_id: node.node_id,
        ip_address: node.ip_address,
        cores: node.cores,
        memory_bytes: node.memory_bytes,
    })
}

pub fn node_info(registration: &NodeRegistration) -> proto::NodeInfo {
    proto::NodeInfo {
        node_id: registration.node_id.clone(),
        control_address: registration.control_address.as_ref().map(address_to_proto),
        data_address: registration.data_address.as_ref().map(address_to_proto),
        result_address: registration.result_address.as_ref().map(address_to_proto),
        ip_address: registration.ip_address.clone(),
        cores: registration.cores,
        memory_bytes: registration.memory_bytes,
    }
}

pub fn stats_from_proto(data: Option<proto::HeartbeatData>) -> HeartbeatStats {
    data.map(|d| HeartbeatStats {
        load_average: d.load_average,
        heap_used_bytes: d.heap_used_bytes,
        heap_max_bytes: d.heap_max_bytes,
        thread_count: d.thread_count,
        open_connections: d.open_connections,
        queue_depth: d.queue_depth,
    })
    .unwrap_or_default()
}

pub fn job_status_to_proto(status: JobStatus) -> proto::JobStatus {
    match status {
        JobStatus::Initialized => proto::JobStatus::Initialized,
        JobStatus::Running => proto::JobStatus::Running,
        JobStatus::TerminatedSuccess => proto::JobStatus::TerminatedSuccess,
        JobStatus::TerminatedFailure => proto::JobStatus::TerminatedFailure,
    }
}

pub fn job_status_from_proto(status: i32) -> Option<JobStatus> {
    match proto::JobStatus::try_from(status).ok()? {
        proto::JobStatus::Unspecified => None,
        proto::JobStatus::Initialized => Some(JobStatus::Initialized),
        proto::JobStatus::Running => Some(JobStatus::Running),
        proto::JobStatus::TerminatedSuccess => Some(JobStatus::TerminatedSuccess),
        proto::JobStatus::TerminatedFailure => Some(JobStatus::TerminatedFailure),
    }
}

pub fn result_status_to_proto(status: ResultStatus) -> proto::ResultStatus {
    match status {
        ResultStatus::Idle => proto::ResultStatus::Idle,
        ResultStatus::Running => proto::ResultStatus::Running,
        ResultStatus::Success => proto::ResultStatus::Success,
        ResultStatus::Failed => proto::ResultStatus::Failed,
    }
}

fn result_status_from_proto(status: i32) -> ResultStatus {
    match proto::ResultStatus::try_from(status) {
        Ok(proto::ResultStatus::Running) => ResultStatus::Running,
        Ok(proto::ResultStatus::Success) => ResultStatus::Success,
        Ok(proto::ResultStatus::Failed) => ResultStatus::Failed,
        _ => ResultStatus::Idle,
    }
}

pub fn record_to_proto(record: &DirectoryRecord) -> proto::DatasetDirectoryRecord {
    proto::DatasetDirectoryRecord {
        address: record.address.as_ref().map(address_to_proto),
        status: result_status_to_proto(record.status) as i32,
        node_id: record.node_id.clone().unwrap_or_default(),
    }
}

pub fn record_from_proto(record: proto::DatasetDirectoryRecord) -> Result<DirectoryRecord> {
    Ok(DirectoryRecord {
        address: address_from_proto(record.address)?,
        status: result_status_from_proto(record.status),
        node_id: (!record.node_id.is_empty()).then_some(record.node_id),
    })
}

/// Envelope body for a command pushed to a worker.
pub fn command_to_body(command: NodeCommand) -> Body {
    match command {
        NodeCommand::StartTasks {
            job_id,
            app_name,
            graph,
            flags,
            tasks,
        } => Body::StartTasks(proto::StartTasks {
            job_id: job_id.0,
            app_name,
            graph,
            flags,
            tasks: tasks
                .into_iter()
                .map(|task_id| proto::TaskAttempt { task_id })
                .collect(),
        }),
        NodeCommand::AbortTasks { job_id, tasks } => Body::AbortTasks(proto::AbortTasks {
            job_id: job_id.0,
            task_ids: tasks,
        }),
        NodeCommand::CleanupJoblet { job_id, status } => Body::CleanupJoblet(proto::CleanupJoblet {
            job_id: job_id.0,
            status: job_status_to_proto(status) as i32,
        }),
        NodeCommand::PartitionAvailable {
            job_id,
            partition_id,
            data_address,
        } => Body::ReportPartitionAvailability(proto::ReportPartitionAvailability {
            job_id: job_id.0,
            partition_id,
            data_address: data_address.as_ref().map(address_to_proto),
        }),
        NodeCommand::ApplicationStateChange {
            app_name,
            start,
            request_id,
        } => {
            let change = if start {
                proto::ApplicationStateChange::Start
            } else {
                proto::ApplicationStateChange::Stop
            };
            Body::ApplicationStateChange(proto::ApplicationStateChangeRequest {
                app_name,
                change: change as i32,
                request_id,
            })
        }
    }
}

pub fn error_body(error: &CoordinatorError) -> Body {
    Body::Error(proto::RemoteError {
        kind: error.kind().to_string(),
        message: error.to_string(),
    })
}
