use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use alloy_primitives::Address;
use async_trait::async_trait;
use flux_types::{JobId, LogBroadcast, LogId, PipelineRun, RoundId, RoundStats, RunId};
use tokio::sync::{broadcast, mpsc::UnboundedSender};
use tracing::instrument;
use utils::{async_transaction::AsyncTransaction, storage::db::DbTable};

use crate::apis::{
    ListenerOpts, LogBroadcaster, LogSourceError, PendingSubmission, RoundStatsStore,
    StoreError, TransactionQueue,
};

/// How often unconsumed logs are offered to listeners again
pub const DEFAULT_REPLAY_INTERVAL: Duration = Duration::from_secs(30);

/// Deliveries after the first before an unconsumed log is given up on
pub const MAX_REPLAYS: u32 = 5;

/// Round stats, finished runs and job errors kept in memory.
///
/// Clones share the same tables. Commits are serialized per aggregator.
#[derive(Clone, Default)]
pub struct MemoryStore {
    round_stats: DbTable<(Address, RoundId), RoundStats>,
    runs: DbTable<RunId, PipelineRun>,
    /// One row per distinct error, with its occurrence count
    job_errors: DbTable<(JobId, String), u64>,
    last_run_id: Arc<AtomicU64>,
    commits: AsyncTransaction<Address>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn round_stats(&self, aggregator: Address, round_id: RoundId) -> Option<RoundStats> {
        self.round_stats.get_cloned(&(aggregator, round_id))
    }

    /// Distinct error descriptions of a job with how often each occurred, sorted by description
    pub fn job_errors(&self, job_id: JobId) -> Vec<(String, u64)> {
        let mut errors: Vec<_> = self
            .job_errors
            .keys_where(|(job, _), _| *job == job_id)
            .into_iter()
            .filter_map(|key| {
                let count = self.job_errors.get_cloned(&key)?;
                Some((key.1, count))
            })
            .collect();
        errors.sort();
        errors
    }

    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    fn next_run_id(&self) -> RunId {
        RunId::new(self.last_run_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn record_submission(
        &self,
        aggregator: Address,
        round_id: RoundId,
        run_id: RunId,
        new_round_logs: u64,
    ) -> RoundStats {
        self.round_stats.upsert_with(
            (aggregator, round_id),
            || RoundStats::new(aggregator, round_id),
            |stats| {
                stats.num_submissions += 1;
                stats.num_new_round_logs += new_round_logs;
                stats.pipeline_run_id = Some(run_id);
            },
        )
    }
}

#[async_trait]
impl RoundStatsStore for MemoryStore {
    #[instrument(skip(self), fields(subsys = "Store"))]
    async fn find_or_create(
        &self,
        aggregator: Address,
        round_id: RoundId,
        new_round_logs: u64,
    ) -> Result<RoundStats, StoreError> {
        Ok(self.round_stats.upsert_with(
            (aggregator, round_id),
            || RoundStats::new(aggregator, round_id),
            |stats| stats.num_new_round_logs += new_round_logs,
        ))
    }

    #[instrument(skip(self), fields(subsys = "Store"))]
    async fn update(
        &self,
        aggregator: Address,
        round_id: RoundId,
        run_id: RunId,
        new_round_logs: u64,
    ) -> Result<(), StoreError> {
        if !self.round_stats.contains_key(&(aggregator, round_id)) {
            return Err(StoreError::MissingRoundStats {
                aggregator,
                round_id,
            });
        }

        self.record_submission(aggregator, round_id, run_id, new_round_logs);
        Ok(())
    }

    #[instrument(skip(self), fields(subsys = "Store"))]
    async fn most_recent_round_id(
        &self,
        aggregator: Address,
    ) -> Result<Option<RoundId>, StoreError> {
        Ok(self
            .round_stats
            .keys_where(|(agg, _), _| *agg == aggregator)
            .into_iter()
            .map(|(_, round_id)| round_id)
            .max())
    }

    #[instrument(skip(self), fields(subsys = "Store"))]
    async fn delete_rounds_from(
        &self,
        aggregator: Address,
        round_id: RoundId,
    ) -> Result<usize, StoreError> {
        let deleted = self
            .round_stats
            .retain(|(agg, round), _| !(*agg == aggregator && *round >= round_id));

        tracing::info!(deleted, "rewound round stats");
        Ok(deleted)
    }

    async fn find_run(&self, run_id: RunId) -> Result<Option<PipelineRun>, StoreError> {
        Ok(self.runs.get_cloned(&run_id))
    }

    #[instrument(skip(self), fields(subsys = "Store"))]
    async fn try_record_error(&self, job_id: JobId, description: &str) -> Result<(), StoreError> {
        let occurrences = self.job_errors.upsert_with(
            (job_id, description.to_string()),
            || 0,
            |count| *count += 1,
        );
        tracing::debug!(occurrences, "recorded job error");
        Ok(())
    }

    #[instrument(skip_all, fields(subsys = "Store", round = submission.round_id))]
    async fn commit_submission(
        &self,
        submission: PendingSubmission,
        tx_queue: &dyn TransactionQueue,
        log_broadcaster: &dyn LogBroadcaster,
    ) -> Result<RunId, StoreError> {
        let PendingSubmission {
            job_id: _,
            aggregator,
            round_id,
            answer,
            run,
            new_round_logs,
            consumed_log,
        } = submission;

        self.commits
            .run(aggregator, || async move {
                let key = (aggregator, round_id);
                let run_id = self.next_run_id();
                let previous_stats = self.round_stats.get_cloned(&key);

                self.runs.insert(
                    run_id,
                    PipelineRun {
                        id: Some(run_id),
                        ..run
                    },
                );
                self.record_submission(aggregator, round_id, run_id, new_round_logs);

                if let Err(err) = tx_queue.submit(aggregator, round_id, answer).await {
                    self.runs.remove(&run_id);
                    match previous_stats {
                        Some(stats) => self.round_stats.insert(key, stats),
                        None => self.round_stats.remove(&key),
                    };
                    return Err(err.into());
                }

                if let Some(log) = consumed_log {
                    if let Err(err) = log_broadcaster.mark_consumed(&log).await {
                        // the stats already hold the submission, redelivery is skipped
                        tracing::warn!(log = %log.id, "failed to mark log consumed: {}", err);
                    }
                }

                Ok(run_id)
            })
            .await
    }
}

type Listener = (ListenerOpts, UnboundedSender<LogBroadcast>);

/// In-process log source.
///
/// Fans published logs out to every matching listener and keeps the
/// consumption ledger. Delivered logs stay pending until a listener marks them
/// consumed, and `replay` offers pending logs again, up to `MAX_REPLAYS` times.
/// Connectivity is a flag the feeding side toggles; reconnecting replays.
#[derive(Clone)]
pub struct MemoryLogBroadcaster {
    listeners: Arc<Mutex<Vec<Listener>>>,
    consumed: DbTable<LogId, ()>,
    /// Delivered but unconsumed logs, with how often they were replayed
    pending: DbTable<LogId, (LogBroadcast, u32)>,
    connected: Arc<AtomicBool>,
}

impl Default for MemoryLogBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLogBroadcaster {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(Vec::new())),
            consumed: DbTable::new(),
            pending: DbTable::new(),
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        let was_connected = self.connected.swap(connected, Ordering::SeqCst);
        if connected && !was_connected {
            let replayed = self.replay();
            tracing::debug!(replayed, "log source reconnected");
        }
    }

    pub fn is_consumed(&self, id: &LogId) -> bool {
        self.consumed.contains_key(id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Returns how many listeners received the log, consumed logs are not sent again
    pub fn publish(&self, broadcast: LogBroadcast) -> usize {
        if self.consumed.contains_key(&broadcast.id) {
            return 0;
        }

        let delivered = self.deliver(&broadcast);
        if delivered > 0 && !self.pending.contains_key(&broadcast.id) {
            self.pending.insert(broadcast.id, (broadcast, 0));
        }
        delivered
    }

    /// Offers every pending log to its listeners again, oldest first.
    /// Returns how many logs were sent.
    pub fn replay(&self) -> usize {
        let mut pending: Vec<_> = self
            .pending
            .keys_where(|_, _| true)
            .into_iter()
            .filter_map(|id| self.pending.get_cloned(&id))
            .collect();
        pending.sort_by_key(|(broadcast, _)| (broadcast.id.block_number, broadcast.id.log_index));

        let mut replayed = 0;
        for (broadcast, replays) in pending {
            if self.consumed.contains_key(&broadcast.id) {
                self.pending.remove(&broadcast.id);
                continue;
            }

            if replays >= MAX_REPLAYS {
                tracing::warn!(log = %broadcast.id, replays, "giving up on unconsumed log");
                self.pending.remove(&broadcast.id);
                continue;
            }

            if self.deliver(&broadcast) > 0 {
                replayed += 1;
            }
            self.pending.insert(broadcast.id, (broadcast, replays + 1));
        }

        replayed
    }

    /// Replays pending logs every `period` until killed
    #[instrument(skip_all, fields(subsys = "LogBroadcaster"))]
    pub async fn run_replay(self, period: Duration, mut kill_receiver: broadcast::Receiver<()>) {
        let start = tokio::time::Instant::now() + period;
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = kill_receiver.recv() => break,
                _ = interval.tick() => {
                    if !self.is_connected() {
                        continue;
                    }
                    let replayed = self.replay();
                    if replayed > 0 {
                        tracing::debug!(replayed, "replayed unconsumed logs");
                    }
                }
            }
        }
    }

    fn deliver(&self, broadcast: &LogBroadcast) -> usize {
        let Ok(mut listeners) = self.listeners.lock() else {
            tracing::error!("log listener registry is poisoned");
            return 0;
        };

        listeners.retain(|(_, sender)| !sender.is_closed());

        listeners
            .iter()
            .filter(|(opts, _)| opts.matches(broadcast))
            .filter(|(_, sender)| sender.send(broadcast.clone()).is_ok())
            .count()
    }
}

#[async_trait]
impl LogBroadcaster for MemoryLogBroadcaster {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn register(
        &self,
        opts: ListenerOpts,
        sender: UnboundedSender<LogBroadcast>,
    ) -> Result<(), LogSourceError> {
        tracing::debug!(contract = %opts.contract, events = ?opts.events, "registering log listener");

        self.listeners
            .lock()
            .map_err(|_| {
                LogSourceError::Subscription(anyhow::anyhow!("log listener registry is poisoned"))
            })?
            .push((opts, sender));

        Ok(())
    }

    async fn was_already_consumed(&self, broadcast: &LogBroadcast) -> Result<bool, LogSourceError> {
        Ok(self.consumed.contains_key(&broadcast.id))
    }

    async fn mark_consumed(&self, broadcast: &LogBroadcast) -> Result<(), LogSourceError> {
        self.consumed.insert(broadcast.id, ());
        self.pending.remove(&broadcast.id);
        Ok(())
    }
}
