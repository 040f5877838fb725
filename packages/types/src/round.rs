use alloy_primitives::{Address, I256, U256};
use serde::{Deserialize, Serialize};

use crate::RunId;

/// Aggregator round identifier. Round `0` is the contract convention for
/// "the next round this oracle may report to".
pub type RoundId = u32;

/// Per-oracle view of a round, as returned by `oracleRoundState`.
/// Re-fetched at every decision point and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundState {
    pub round_id: RoundId,
    pub eligible_to_submit: bool,
    pub latest_submission: I256,
    pub available_funds: Option<U256>,
    pub payment_amount: Option<U256>,
    pub oracle_count: u8,
    /// Unix seconds, `0` when unknown
    pub started_at: u64,
    /// Seconds, `0` when the round carries no timeout
    pub timeout: u64,
}

impl RoundState {
    /// A placeholder state used when the contract cannot be read at startup,
    /// anchored at the given start time so idle timers stay meaningful.
    pub fn started_at(started_at: u64) -> Self {
        Self {
            started_at,
            ..Default::default()
        }
    }

    /// Unix seconds at which the round times out, if it has a timeout at all.
    pub fn times_out_at(&self) -> Option<u64> {
        match self.timeout {
            0 => None,
            timeout => Some(self.started_at.saturating_add(timeout)),
        }
    }
}

/// Result of `latestRoundData`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundData {
    pub round_id: RoundId,
    pub answer: I256,
    pub started_at: u64,
    pub updated_at: u64,
    pub answered_in_round: RoundId,
}

/// Locally tracked submission bookkeeping for one (aggregator, round).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundStats {
    pub aggregator: Address,
    pub round_id: RoundId,
    pub num_new_round_logs: u64,
    pub num_submissions: u64,
    pub pipeline_run_id: Option<RunId>,
}

impl RoundStats {
    pub fn new(aggregator: Address, round_id: RoundId) -> Self {
        Self {
            aggregator,
            round_id,
            num_new_round_logs: 0,
            num_submissions: 0,
            pipeline_run_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn times_out_at_requires_timeout() {
        let mut state = RoundState::started_at(1_000);
        assert_eq!(state.times_out_at(), None);

        state.timeout = 60;
        assert_eq!(state.times_out_at(), Some(1_060));

        state.started_at = u64::MAX;
        assert_eq!(state.times_out_at(), Some(u64::MAX));
    }
}
