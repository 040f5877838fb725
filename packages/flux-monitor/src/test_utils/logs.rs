use alloy_primitives::{Address, B256, I256};
use flux_types::{
    AnswerUpdatedLog, FlagLog, FluxLog, LogBroadcast, LogId, NewRoundLog, RoundId,
};

// the same arguments always give the same id, so calling twice simulates redelivery
fn mock_log_id(contract: Address, block_number: u64, log_index: u64) -> LogId {
    LogId {
        block_hash: B256::left_padding_from(contract.as_slice()),
        block_number,
        log_index,
    }
}

pub fn mock_new_round_log(
    aggregator: Address,
    round_id: RoundId,
    started_by: Address,
    started_at: u64,
) -> LogBroadcast {
    LogBroadcast {
        id: mock_log_id(aggregator, round_id.into(), 0),
        contract: aggregator,
        log: FluxLog::NewRound(NewRoundLog {
            round_id,
            started_by,
            started_at,
        }),
    }
}

pub fn mock_answer_updated_log(aggregator: Address, round_id: RoundId, current: i64) -> LogBroadcast {
    LogBroadcast {
        id: mock_log_id(aggregator, round_id.into(), 1),
        contract: aggregator,
        log: FluxLog::AnswerUpdated(AnswerUpdatedLog {
            current: I256::try_from(current).unwrap(),
            round_id,
            updated_at: 0,
        }),
    }
}

pub fn mock_flag_raised_log(flags: Address, subject: Address, block_number: u64) -> LogBroadcast {
    LogBroadcast {
        id: mock_log_id(flags, block_number, 2),
        contract: flags,
        log: FluxLog::FlagRaised(FlagLog { subject }),
    }
}

pub fn mock_flag_lowered_log(flags: Address, subject: Address, block_number: u64) -> LogBroadcast {
    LogBroadcast {
        id: mock_log_id(flags, block_number, 3),
        contract: flags,
        log: FluxLog::FlagLowered(FlagLog { subject }),
    }
}
