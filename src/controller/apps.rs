use std::collections::BTreeSet;

use crate::application::{ApplicationInfo, StateChange};
use crate::cluster::{NodeCommand, NodeId};
use crate::controller::ControllerState;
use crate::error::Result;
use crate::work::Sink;

impl ControllerState {
    pub fn create_application(&mut self, name: &str) -> Result<ApplicationInfo> {
        self.applications.create(name)
    }

    /// Start an application on every registered node. `sink` completes once
    /// all of them have acknowledged.
    pub fn start_application(&mut self, name: &str, sink: Sink<ApplicationInfo>) {
        self.change_application(name, StateChange::Start, sink);
    }

    /// Stop an application on every registered node and remove it.
    pub fn destroy_application(&mut self, name: &str, sink: Sink<ApplicationInfo>) {
        self.change_application(name, StateChange::Stop, sink);
    }

    fn change_application(&mut self, name: &str, change: StateChange, sink: Sink<ApplicationInfo>) {
        let nodes: BTreeSet<NodeId> = self.nodes.node_ids().into_iter().collect();
        let request_id = match self.applications.begin_change(name, change, nodes.clone()) {
            Ok(request_id) => request_id,
            Err(e) => {
                sink.set_error(e);
                return;
            }
        };
        self.applications.add_waiter(name, sink);

        for node_id in &nodes {
            let delivered = self.send_to(
                node_id,
                NodeCommand::ApplicationStateChange {
                    app_name: name.to_string(),
                    start: change == StateChange::Start,
                    request_id,
                },
            );
            if !delivered {
                // An unreachable node will never answer.
                self.applications.acknowledge(name, node_id, request_id);
            }
        }
        self.applications.settle(name);
    }

    pub fn application_state_change_ack(&mut self, name: &str, node_id: &str, request_id: u64) {
        if self.applications.acknowledge(name, node_id, request_id) {
            self.applications.settle(name);
        }
    }

    pub fn application_message(&mut self, name: &str, node_id: &str, payload: Vec<u8>) -> Result<()> {
        self.applications.deliver(name, node_id, payload)
    }
}
