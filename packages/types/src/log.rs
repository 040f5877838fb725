use alloy_primitives::{Address, B256, I256};
use serde::{Deserialize, Serialize};

use crate::RoundId;

/// Uniquely identifies a delivered log across redeliveries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogId {
    pub block_hash: B256,
    pub block_number: u64,
    pub log_index: u64,
}

impl std::fmt::Display for LogId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}@{}#{}",
            self.block_hash, self.block_number, self.log_index
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRoundLog {
    pub round_id: RoundId,
    pub started_by: Address,
    /// Unix seconds
    pub started_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerUpdatedLog {
    pub current: I256,
    pub round_id: RoundId,
    pub updated_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagLog {
    pub subject: Address,
}

/// The contract events the flux monitor reacts to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FluxLog {
    NewRound(NewRoundLog),
    AnswerUpdated(AnswerUpdatedLog),
    FlagRaised(FlagLog),
    FlagLowered(FlagLog),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    NewRound,
    AnswerUpdated,
    FlagRaised,
    FlagLowered,
}

impl LogKind {
    pub fn aggregator_events() -> Vec<LogKind> {
        vec![LogKind::NewRound, LogKind::AnswerUpdated]
    }

    pub fn flag_events() -> Vec<LogKind> {
        vec![LogKind::FlagRaised, LogKind::FlagLowered]
    }
}

impl FluxLog {
    pub fn kind(&self) -> LogKind {
        match self {
            FluxLog::NewRound(_) => LogKind::NewRound,
            FluxLog::AnswerUpdated(_) => LogKind::AnswerUpdated,
            FluxLog::FlagRaised(_) => LogKind::FlagRaised,
            FluxLog::FlagLowered(_) => LogKind::FlagLowered,
        }
    }

    /// Backlog priority, lower is served first
    pub fn priority(&self) -> u8 {
        match self {
            FluxLog::FlagRaised(_) | FluxLog::FlagLowered(_) => 0,
            FluxLog::NewRound(_) => 1,
            FluxLog::AnswerUpdated(_) => 2,
        }
    }
}

/// A log as handed out by the log source, together with the emitting contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogBroadcast {
    pub id: LogId,
    pub contract: Address,
    pub log: FluxLog,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_changes_outrank_rounds() {
        let flag = FluxLog::FlagLowered(FlagLog {
            subject: Address::ZERO,
        });
        let new_round = FluxLog::NewRound(NewRoundLog {
            round_id: 1,
            started_by: Address::ZERO,
            started_at: 0,
        });
        let answer = FluxLog::AnswerUpdated(AnswerUpdatedLog {
            current: I256::ZERO,
            round_id: 1,
            updated_at: 0,
        });

        assert!(flag.priority() < new_round.priority());
        assert!(new_round.priority() < answer.priority());
    }
}
