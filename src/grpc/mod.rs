pub mod client_service;
pub mod convert;
pub mod node_service;
pub mod server;

pub use client_service::ClientServiceHandler;
pub use node_service::NodeControlHandler;
pub use server::{serve_client, serve_node_control};
