//! Named application contexts, their lifecycle, and the per-node
//! acknowledgements a start or stop waits for.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cluster::NodeId;
use crate::error::{CoordinatorError, Result};
use crate::work::Sink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationState {
    Created,
    Starting,
    Started,
    Stopping,
    /// Reported to destroy callers once the context is gone.
    Destroyed,
}

impl fmt::Display for ApplicationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplicationState::Created => write!(f, "CREATED"),
            ApplicationState::Starting => write!(f, "STARTING"),
            ApplicationState::Started => write!(f, "STARTED"),
            ApplicationState::Stopping => write!(f, "STOPPING"),
            ApplicationState::Destroyed => write!(f, "DESTROYED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    Start,
    Stop,
}

/// Admin view of an application.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplicationDetail {
    #[serde(flatten)]
    pub info: ApplicationInfo,
    pub inbox: Vec<ApplicationMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplicationMessage {
    pub node_id: NodeId,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplicationInfo {
    pub name: String,
    pub state: ApplicationState,
    pub created_at: DateTime<Utc>,
    pub pending_acks: Vec<NodeId>,
    pub inbox_len: usize,
}

struct Application {
    name: String,
    state: ApplicationState,
    created_at: DateTime<Utc>,
    request_id: Option<u64>,
    pending_acks: BTreeSet<NodeId>,
    waiters: Vec<Sink<ApplicationInfo>>,
    inbox: VecDeque<ApplicationMessage>,
}

impl Application {
    fn info(&self) -> ApplicationInfo {
        ApplicationInfo {
            name: self.name.clone(),
            state: self.state,
            created_at: self.created_at,
            pending_acks: self.pending_acks.iter().cloned().collect(),
            inbox_len: self.inbox.len(),
        }
    }

    fn expect(&self, expected: &[ApplicationState]) -> Result<()> {
        if expected.contains(&self.state) {
            return Ok(());
        }
        Err(CoordinatorError::ApplicationState {
            name: self.name.clone(),
            state: self.state.to_string(),
            expected: expected
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("|"),
        })
    }
}

/// All application contexts, keyed by name.
pub struct Applications {
    apps: BTreeMap<String, Application>,
    next_request_id: u64,
    inbox_size: usize,
}

impl Applications {
    pub fn new(inbox_size: usize) -> Self {
        Self {
            apps: BTreeMap::new(),
            next_request_id: 1,
            inbox_size,
        }
    }

    pub fn create(&mut self, name: &str) -> Result<ApplicationInfo> {
        if self.apps.contains_key(name) {
            return Err(CoordinatorError::ApplicationExists(name.to_string()));
        }
        let app = Application {
            name: name.to_string(),
            state: ApplicationState::Created,
            created_at: Utc::now(),
            request_id: None,
            pending_acks: BTreeSet::new(),
            waiters: Vec::new(),
            inbox: VecDeque::new(),
        };
        let info = app.info();
        self.apps.insert(name.to_string(), app);
        tracing::info!(app = name, "Application created");
        Ok(info)
    }

    /// Begin a start or stop. Every node in `nodes` must acknowledge
    /// `request_id` before the change settles. Returns the request id.
    pub fn begin_change(
        &mut self,
        name: &str,
        change: StateChange,
        nodes: BTreeSet<NodeId>,
    ) -> Result<u64> {
        let request_id = self.next_request_id;
        let app = self.get_mut(name)?;
        match change {
            StateChange::Start => {
                app.expect(&[ApplicationState::Created])?;
                app.state = ApplicationState::Starting;
            }
            StateChange::Stop => {
                app.expect(&[ApplicationState::Created, ApplicationState::Started])?;
                app.state = ApplicationState::Stopping;
            }
        }
        app.request_id = Some(request_id);
        app.pending_acks = nodes;
        self.next_request_id += 1;
        tracing::info!(app = name, ?change, request_id, "Application state change started");
        Ok(request_id)
    }

    /// Attach a caller waiting for the in-flight change to settle.
    pub fn add_waiter(&mut self, name: &str, sink: Sink<ApplicationInfo>) {
        match self.apps.get_mut(name) {
            Some(app) => app.waiters.push(sink),
            None => sink.set_error(CoordinatorError::UnknownApplication(name.to_string())),
        }
    }

    /// A node acknowledged a state change. Stale request ids are ignored.
    pub fn acknowledge(&mut self, name: &str, node_id: &str, request_id: u64) -> bool {
        let Some(app) = self.apps.get_mut(name) else {
            tracing::debug!(app = name, node_id, "Acknowledgement for unknown application");
            return false;
        };
        if app.request_id != Some(request_id) {
            tracing::debug!(app = name, node_id, request_id, "Stale application acknowledgement");
            return false;
        }
        app.pending_acks.remove(node_id)
    }

    /// Drop a lost node from every pending acknowledgement set. Returns the
    /// applications that were waiting on it.
    pub fn node_lost(&mut self, node_id: &str) -> Vec<String> {
        self.apps
            .values_mut()
            .filter_map(|app| app.pending_acks.remove(node_id).then(|| app.name.clone()))
            .collect()
    }

    /// Finish the in-flight change if nothing is pending. A settled start
    /// becomes STARTED; a settled stop removes the application.
    pub fn settle(&mut self, name: &str) -> Option<ApplicationInfo> {
        let app = self.apps.get(name)?;
        if !app.pending_acks.is_empty() {
            return None;
        }
        let state = app.state;
        let (info, waiters) = match state {
            ApplicationState::Starting => {
                let app = self.apps.get_mut(name)?;
                app.state = ApplicationState::Started;
                app.request_id = None;
                (app.info(), std::mem::take(&mut app.waiters))
            }
            ApplicationState::Stopping => {
                let app = self.apps.remove(name)?;
                let mut info = app.info();
                info.state = ApplicationState::Destroyed;
                (info, app.waiters)
            }
            _ => return None,
        };
        for waiter in waiters {
            waiter.set_value(info.clone());
        }
        tracing::info!(app = name, state = %info.state, "Application state change settled");
        Some(info)
    }

    pub fn require_started(&self, name: &str) -> Result<()> {
        self.apps
            .get(name)
            .ok_or_else(|| CoordinatorError::UnknownApplication(name.to_string()))?
            .expect(&[ApplicationState::Started])
    }

    /// Append a relayed message to the application's inbox, evicting the
    /// oldest once the inbox is full.
    pub fn deliver(&mut self, name: &str, node_id: &str, payload: Vec<u8>) -> Result<()> {
        let inbox_size = self.inbox_size;
        let app = self.get_mut(name)?;
        app.inbox.push_back(ApplicationMessage {
            node_id: node_id.to_string(),
            payload,
            received_at: Utc::now(),
        });
        while app.inbox.len() > inbox_size {
            app.inbox.pop_front();
        }
        Ok(())
    }

    pub fn inbox(&self, name: &str) -> Result<Vec<ApplicationMessage>> {
        self.apps
            .get(name)
            .map(|app| app.inbox.iter().cloned().collect())
            .ok_or_else(|| CoordinatorError::UnknownApplication(name.to_string()))
    }

    pub fn info(&self, name: &str) -> Result<ApplicationInfo> {
        self.apps
            .get(name)
            .map(Application::info)
            .ok_or_else(|| CoordinatorError::UnknownApplication(name.to_string()))
    }

    pub fn list(&self) -> Vec<ApplicationInfo> {
        self.apps.values().map(Application::info).collect()
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut Application> {
        self.apps
            .get_mut(name)
            .ok_or_else(|| CoordinatorError::UnknownApplication(name.to_string()))
    }
}
