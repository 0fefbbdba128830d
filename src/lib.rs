pub mod application;
pub mod cluster;
pub mod config;
pub mod controller;
pub mod coordinator;
pub mod dashboard;
pub mod dataset;
pub mod error;
pub mod grpc;
pub mod job;
pub mod partition;
pub mod shutdown;
pub mod topology;
pub mod work;

// Re-export generated protobuf types
pub mod proto {
    tonic::include_proto!("coordinator");
}
