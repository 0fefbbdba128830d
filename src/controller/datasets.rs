use crate::cluster::NodeCommand;
use crate::controller::ControllerState;
use crate::dataset::{DirectoryRecord, ResultPartitionLocation, ResultStatus};
use crate::error::Result;
use crate::job::JobId;
use crate::partition::{PartitionDescriptor, PartitionMatch, PartitionRequest};
use crate::work::Sink;

impl ControllerState {
    pub fn register_partition_provider(&mut self, descriptor: PartitionDescriptor) {
        if !self.jobs.is_active(descriptor.job_id) {
            tracing::debug!(job_id = %descriptor.job_id, "Partition provider for inactive job ignored");
            return;
        }
        for m in self.partitions.register_provider(descriptor) {
            self.report_partition_availability(m);
        }
    }

    pub fn register_partition_request(&mut self, request: PartitionRequest) {
        if !self.jobs.is_active(request.job_id) {
            tracing::debug!(job_id = %request.job_id, "Partition request for inactive job ignored");
            return;
        }
        if let Some(m) = self.partitions.register_request(request) {
            self.report_partition_availability(m);
        }
    }

    fn report_partition_availability(&self, m: PartitionMatch) {
        self.send_to(
            &m.requester,
            NodeCommand::PartitionAvailable {
                job_id: m.provider.job_id,
                partition_id: m.provider.partition_id,
                data_address: m.provider.data_address,
            },
        );
    }

    pub fn register_result_location(&mut self, location: ResultPartitionLocation) -> Result<()> {
        self.datasets.register_location(location)
    }

    pub fn result_write_complete(
        &mut self,
        job_id: JobId,
        result_set_id: &str,
        partition: usize,
    ) -> Result<()> {
        self.datasets
            .write_complete(job_id, result_set_id, partition)
    }

    pub fn result_partition_failure(
        &mut self,
        job_id: JobId,
        result_set_id: &str,
        partition: usize,
    ) -> Result<()> {
        self.datasets
            .partition_failed(job_id, result_set_id, partition)
    }

    pub fn result_status(&self, job_id: JobId, result_set_id: &str) -> Result<ResultStatus> {
        self.datasets.result_status(job_id, result_set_id)
    }

    pub fn record_descriptor(&self, job_id: JobId, result_set_id: &str) -> Result<Vec<u8>> {
        self.datasets.record_descriptor(job_id, result_set_id)
    }

    pub fn result_locations(
        &mut self,
        job_id: JobId,
        result_set_id: &str,
        known: Vec<DirectoryRecord>,
        sink: Sink<Vec<DirectoryRecord>>,
    ) {
        self.datasets
            .result_locations(job_id, result_set_id, known, sink);
    }
}
