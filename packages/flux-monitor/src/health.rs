use flux_types::{Mode, RoundId};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    #[default]
    Unstarted,
    Running,
    Closed,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceState::Unstarted => write!(f, "unstarted"),
            ServiceState::Running => write!(f, "running"),
            ServiceState::Closed => write!(f, "closed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub name: String,
    pub timestamp: u64,
    pub state: ServiceState,
    pub mode: Mode,
    pub log_source_connected: bool,
    pub last_error: Option<String>,
    pub last_submitted_round: Option<RoundId>,
}

impl HealthReport {
    pub fn check(&self) -> Result<(), HealthError> {
        if self.state != ServiceState::Running {
            return Err(HealthError::NotRunning(self.state));
        }
        if !self.log_source_connected {
            return Err(HealthError::LogSourceDisconnected);
        }
        Ok(())
    }

    pub fn is_healthy(&self) -> bool {
        self.check().is_ok()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HealthError {
    #[error("service is {0}")]
    NotRunning(ServiceState),

    #[error("log source is disconnected")]
    LogSourceDisconnected,
}

/// What the event loop reports back to the service handle
#[derive(Debug, Clone, Default)]
pub(crate) struct MonitorStatus {
    pub mode: Mode,
    pub last_error: Option<String>,
    pub last_submitted_round: Option<RoundId>,
}

pub(crate) type SharedStatus = Arc<RwLock<MonitorStatus>>;
