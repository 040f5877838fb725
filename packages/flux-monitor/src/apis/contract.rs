use alloy_primitives::{Address, I256};
use async_trait::async_trait;
use flux_types::{RoundData, RoundId, RoundState};
use thiserror::Error;

/// Read side of the aggregator contract
#[async_trait]
pub trait FluxAggregator: Send + Sync {
    fn address(&self) -> Address;

    /// Round 0 asks the contract for the round this oracle should report to next
    async fn oracle_round_state(
        &self,
        oracle: Address,
        round_id: RoundId,
    ) -> Result<RoundState, ContractError>;

    async fn latest_round_data(&self) -> Result<RoundData, ContractError>;

    async fn get_oracles(&self) -> Result<Vec<Address>, ContractError>;

    async fn min_submission_value(&self) -> Result<I256, ContractError>;

    async fn max_submission_value(&self) -> Result<I256, ContractError>;
}

/// Reader for the hibernation flags contract
#[async_trait]
pub trait FlagsContract: Send + Sync {
    fn address(&self) -> Address;

    /// Hibernation needs both the global flag and the subject's own flag raised
    async fn is_lowered(&self, subject: Address) -> Result<bool, ContractError>;
}

#[derive(Error, Debug)]
pub enum ContractError {
    #[error("contract call: {0:?}")]
    Call(anyhow::Error),

    #[error("contract call timed out")]
    Timeout,

    #[error("could not decode contract response: {0}")]
    Decode(String),
}
