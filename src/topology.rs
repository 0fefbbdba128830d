//! Static cluster topology: a tree of network switches with terminal nodes.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::StartupError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterTopology {
    pub root: NetworkSwitch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSwitch {
    pub name: String,
    #[serde(default)]
    pub switches: Vec<NetworkSwitch>,
    #[serde(default)]
    pub terminals: Vec<NetworkTerminal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkTerminal {
    pub name: String,
}

impl ClusterTopology {
    pub fn load(path: &Path) -> Result<Self, StartupError> {
        let data = std::fs::read_to_string(path).map_err(|e| StartupError::Topology {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&data).map_err(|e| StartupError::Topology {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Path of switch names from the root down to the terminal, if present.
    pub fn lookup(&self, terminal: &str) -> Option<Vec<String>> {
        fn walk(switch: &NetworkSwitch, terminal: &str, path: &mut Vec<String>) -> bool {
            path.push(switch.name.clone());
            if switch.terminals.iter().any(|t| t.name == terminal) {
                return true;
            }
            for child in &switch.switches {
                if walk(child, terminal, path) {
                    return true;
                }
            }
            path.pop();
            false
        }

        let mut path = Vec::new();
        walk(&self.root, terminal, &mut path).then_some(path)
    }
}
