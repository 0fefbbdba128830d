pub mod node;
pub mod registry;

pub use node::{
    HeartbeatStats, NetworkAddress, NodeCommand, NodeId, NodeLink, NodeRegistration, NodeState,
    NodeSummary,
};
pub use registry::NodeRegistry;
