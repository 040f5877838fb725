use alloy_primitives::{Address, I256};
use async_trait::async_trait;
use flux_types::RoundId;
use thiserror::Error;

#[async_trait]
pub trait TransactionQueue: Send + Sync {
    /// Success means accepted for eventual delivery, not confirmed on-chain
    async fn submit(
        &self,
        aggregator: Address,
        round_id: RoundId,
        answer: I256,
    ) -> Result<(), TxQueueError>;
}

#[derive(Error, Debug)]
pub enum TxQueueError {
    #[error("transaction queue is closed")]
    Closed,

    #[error("transaction queue rejected submission: {0}")]
    Rejected(String),
}
