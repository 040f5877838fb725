use alloy_primitives::{Address, I256};
use async_trait::async_trait;
use flux_types::{JobId, LogBroadcast, PipelineRun, RoundId, RoundStats, RunId};
use thiserror::Error;

use super::{LogBroadcaster, TransactionQueue, TxQueueError};

/// Everything that has to land together when a submission is made
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSubmission {
    pub job_id: JobId,
    pub aggregator: Address,
    pub round_id: RoundId,
    /// Already scaled to the on-chain integer
    pub answer: I256,
    /// The finished run that produced `answer`
    pub run: PipelineRun,
    pub new_round_logs: u64,
    /// Marked consumed as part of the same unit
    pub consumed_log: Option<LogBroadcast>,
}

/// Per-round bookkeeping, keyed by `(aggregator, round_id)`
#[async_trait]
pub trait RoundStatsStore: Send + Sync {
    /// Creates the row if needed and adds `new_round_logs` to its counter
    async fn find_or_create(
        &self,
        aggregator: Address,
        round_id: RoundId,
        new_round_logs: u64,
    ) -> Result<RoundStats, StoreError>;

    /// Counts one more submission and records the run behind it
    async fn update(
        &self,
        aggregator: Address,
        round_id: RoundId,
        run_id: RunId,
        new_round_logs: u64,
    ) -> Result<(), StoreError>;

    async fn most_recent_round_id(&self, aggregator: Address)
        -> Result<Option<RoundId>, StoreError>;

    /// Reorg rewind, drops every row at or above `round_id`
    async fn delete_rounds_from(
        &self,
        aggregator: Address,
        round_id: RoundId,
    ) -> Result<usize, StoreError>;

    async fn find_run(&self, run_id: RunId) -> Result<Option<PipelineRun>, StoreError>;

    /// Operator visible error against the job
    async fn try_record_error(&self, job_id: JobId, description: &str) -> Result<(), StoreError>;

    /// Insert the run, update the stats, enqueue and mark the log consumed as one unit.
    /// Nothing is kept if the enqueue fails. Once enqueued the submission stands,
    /// a failure to mark the log consumed only means it is delivered again and
    /// then skipped as a duplicate.
    async fn commit_submission(
        &self,
        submission: PendingSubmission,
        tx_queue: &dyn TransactionQueue,
        log_broadcaster: &dyn LogBroadcaster,
    ) -> Result<RunId, StoreError>;
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no round stats for aggregator {aggregator} round {round_id}")]
    MissingRoundStats { aggregator: Address, round_id: RoundId },

    #[error("enqueue submission: {0}")]
    Enqueue(#[from] TxQueueError),
}
