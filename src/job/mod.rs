pub mod archive;
pub mod log;
pub mod planner;
pub mod run;
pub mod store;

pub use archive::JobArchive;
pub use log::JobLog;
pub use planner::{BroadcastPlanner, TaskPlanner};
pub use run::{
    JobId, JobRun, JobStatus, JobStatusReport, JobSummary, TaskFailure, TaskId, TaskPlacement,
    JOB_FLAG_PROFILING,
};
pub use store::{JobStore, TerminatedJob};
