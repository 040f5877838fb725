use thiserror::Error;

use crate::{
    apis::{ContractError, KeyStoreError, LogSourceError},
    checkers::CheckerError,
    health::ServiceState,
    poll_manager::PollManagerError,
};

#[derive(Error, Debug)]
pub enum FluxMonitorError {
    #[error("no sending keys available, cannot determine the oracle address")]
    NoKeys,

    #[error("flux monitor already started")]
    AlreadyStarted,

    #[error("flux monitor is not running (currently {0})")]
    NotRunning(ServiceState),

    #[error("contract: {0}")]
    Contract(#[from] ContractError),

    #[error("config: {0:?}")]
    Config(anyhow::Error),

    #[error("log source: {0}")]
    LogSource(#[from] LogSourceError),

    #[error("key store: {0}")]
    KeyStore(#[from] KeyStoreError),

    #[error("poll manager: {0}")]
    PollManager(#[from] PollManagerError),

    #[error("checker: {0}")]
    Checker(#[from] CheckerError),

    #[error("event loop: {0}")]
    Join(#[from] tokio::task::JoinError),
}
