use alloy_primitives::{Address, I256, U256};
use alloy_provider::DynProvider;
use async_trait::async_trait;
use flux_types::{RoundData, RoundId, RoundState};
use tracing::instrument;

use super::bindings::{IFlags, IFlagsT, IFluxAggregator, IFluxAggregatorT};
use crate::apis::{ContractError, FlagsContract, FluxAggregator};

fn call_error(err: alloy_contract::Error) -> ContractError {
    ContractError::Call(err.into())
}

fn to_round_id<T>(value: T) -> Result<RoundId, ContractError>
where
    RoundId: TryFrom<T>,
    <RoundId as TryFrom<T>>::Error: std::fmt::Display,
{
    RoundId::try_from(value).map_err(|e| ContractError::Decode(format!("round id: {e}")))
}

fn to_timestamp(value: U256) -> Result<u64, ContractError> {
    u64::try_from(value).map_err(|e| ContractError::Decode(format!("timestamp: {e}")))
}

pub struct EvmFluxAggregator {
    contract: IFluxAggregatorT,
}

impl EvmFluxAggregator {
    pub fn new(address: Address, provider: DynProvider) -> Self {
        Self {
            contract: IFluxAggregator::new(address, provider),
        }
    }
}

#[async_trait]
impl FluxAggregator for EvmFluxAggregator {
    fn address(&self) -> Address {
        *self.contract.address()
    }

    #[instrument(skip(self), fields(subsys = "Contract", aggregator = %self.contract.address()))]
    async fn oracle_round_state(
        &self,
        oracle: Address,
        round_id: RoundId,
    ) -> Result<RoundState, ContractError> {
        let state = self
            .contract
            .oracleRoundState(oracle, round_id)
            .call()
            .await
            .map_err(call_error)?;

        Ok(RoundState {
            round_id: state.roundId,
            eligible_to_submit: state.eligibleToSubmit,
            latest_submission: state.latestSubmission,
            available_funds: Some(U256::from(state.availableFunds)),
            payment_amount: Some(U256::from(state.paymentAmount)),
            oracle_count: state.oracleCount,
            started_at: state.startedAt,
            timeout: state.timeout,
        })
    }

    #[instrument(skip(self), fields(subsys = "Contract", aggregator = %self.contract.address()))]
    async fn latest_round_data(&self) -> Result<RoundData, ContractError> {
        let data = self
            .contract
            .latestRoundData()
            .call()
            .await
            .map_err(call_error)?;

        Ok(RoundData {
            round_id: to_round_id(data.roundId)?,
            answer: data.answer,
            started_at: to_timestamp(data.startedAt)?,
            updated_at: to_timestamp(data.updatedAt)?,
            answered_in_round: to_round_id(data.answeredInRound)?,
        })
    }

    async fn get_oracles(&self) -> Result<Vec<Address>, ContractError> {
        self.contract
            .getOracles()
            .call()
            .await
            .map_err(call_error)
    }

    async fn min_submission_value(&self) -> Result<I256, ContractError> {
        self.contract
            .minSubmissionValue()
            .call()
            .await
            .map_err(call_error)
    }

    async fn max_submission_value(&self) -> Result<I256, ContractError> {
        self.contract
            .maxSubmissionValue()
            .call()
            .await
            .map_err(call_error)
    }
}

pub struct EvmFlags {
    contract: IFlagsT,
}

impl EvmFlags {
    pub fn new(address: Address, provider: DynProvider) -> Self {
        Self {
            contract: IFlags::new(address, provider),
        }
    }
}

#[async_trait]
impl FlagsContract for EvmFlags {
    fn address(&self) -> Address {
        *self.contract.address()
    }

    #[instrument(skip(self), fields(subsys = "Contract", flags = %self.contract.address()))]
    async fn is_lowered(&self, subject: Address) -> Result<bool, ContractError> {
        // the zero address carries the global flag
        let flags = self
            .contract
            .getFlags(vec![Address::ZERO, subject])
            .call()
            .await
            .map_err(call_error)?;

        match flags.as_slice() {
            [global, own] => Ok(!global || !own),
            other => Err(ContractError::Decode(format!(
                "expected 2 flags, got {}",
                other.len()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::aliases::U80;

    #[test]
    fn round_ids_must_fit() {
        assert_eq!(to_round_id(U80::from(7u64)).unwrap(), 7);
        assert!(to_round_id(U80::from(u64::from(u32::MAX) + 1)).is_err());
    }

    #[test]
    fn timestamps_must_fit() {
        assert_eq!(to_timestamp(U256::from(1_700_000_000u64)).unwrap(), 1_700_000_000);
        assert!(to_timestamp(U256::MAX).is_err());
    }
}
