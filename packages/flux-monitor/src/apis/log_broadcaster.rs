use alloy_primitives::Address;
use async_trait::async_trait;
use flux_types::{LogBroadcast, LogKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

/// Which logs a listener wants, by emitting contract and event kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerOpts {
    pub contract: Address,
    pub events: Vec<LogKind>,
}

impl ListenerOpts {
    pub fn matches(&self, broadcast: &LogBroadcast) -> bool {
        broadcast.contract == self.contract && self.events.contains(&broadcast.log.kind())
    }
}

/// At-least-once delivery of contract logs, with a per-consumer idempotency ledger
#[async_trait]
pub trait LogBroadcaster: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Matching logs are sent to `sender` until it is dropped
    fn register(
        &self,
        opts: ListenerOpts,
        sender: UnboundedSender<LogBroadcast>,
    ) -> Result<(), LogSourceError>;

    async fn was_already_consumed(&self, broadcast: &LogBroadcast) -> Result<bool, LogSourceError>;

    async fn mark_consumed(&self, broadcast: &LogBroadcast) -> Result<(), LogSourceError>;
}

#[derive(Error, Debug)]
pub enum LogSourceError {
    #[error("log source is disconnected")]
    Disconnected,

    #[error("consumption ledger: {0:?}")]
    Ledger(anyhow::Error),

    #[error("subscription: {0:?}")]
    Subscription(anyhow::Error),
}
