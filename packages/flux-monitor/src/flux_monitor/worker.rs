use std::{future::Future, time::Duration};

use alloy_primitives::{Address, I256};
use bigdecimal::BigDecimal;
use flux_types::{
    FluxLog, LogBroadcast, Mode, NewRoundLog, PipelineRun, PipelineVars, PollRequest,
    PollRequestKind, RoundId, RoundState, RunId, RunStatus,
};
use rand::Rng;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::instrument;

use crate::{
    apis::{ContractError, PendingSubmission, PipelineError, StoreError},
    checkers::{CheckerError, DeviationChecker, PaymentChecker, SubmissionChecker},
    health::SharedStatus,
    poll_manager::{PollManager, PollRequestReceiver},
};

use super::{backlog::LogBacklog, FluxMonitorDeps, FluxMonitorJob};

const ERR_ROUND_STATE: &str =
    "Unable to call roundState method on provided contract. Check contract address.";
const ERR_POLLING: &str = "Error polling";
const ERR_OUT_OF_RANGE: &str = "Answer is outside acceptable range";

/// Why a single decision stopped. Contained to that decision, never ends the loop.
#[derive(Error, Debug)]
enum DecisionError {
    #[error("round state: {0}")]
    RoundState(ContractError),

    #[error("round stats: {0}")]
    Store(#[from] StoreError),

    #[error("pipeline: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("pipeline run errored: {0}")]
    RunErrored(String),

    #[error("answer {answer} is outside the acceptable range [{min}, {max}]")]
    OutOfRange {
        answer: BigDecimal,
        min: BigDecimal,
        max: BigDecimal,
    },

    #[error("answer conversion: {0}")]
    Conversion(#[from] CheckerError),

    #[error("commit submission: {0}")]
    Commit(StoreError),
}

impl DecisionError {
    fn arms_retry(&self) -> bool {
        !matches!(self, DecisionError::OutOfRange { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Skipped,
    Submitted { round_id: RoundId, run_id: RunId },
}

/// Whether the commit was attempted, after which the log belongs to the commit
fn commit_attempted(result: &Result<Decision, DecisionError>) -> bool {
    matches!(
        result,
        Ok(Decision::Submitted { .. }) | Err(DecisionError::Commit(_))
    )
}

/// A pipeline answer that passed the range check
struct Observation {
    run: PipelineRun,
    answer: BigDecimal,
}

/// The event loop and everything only it may touch
pub(super) struct Worker {
    job: FluxMonitorJob,
    deps: FluxMonitorDeps,
    aggregator: Address,
    oracle_address: Address,
    submission_checker: SubmissionChecker,
    payment_checker: PaymentChecker,
    deviation_checker: DeviationChecker,
    poll_manager: PollManager,
    mode: Mode,
    backlog: LogBacklog,
    status: SharedStatus,
    // held so the log channel never closes under the loop
    _log_sender: mpsc::UnboundedSender<LogBroadcast>,
    logs: mpsc::UnboundedReceiver<LogBroadcast>,
    poll_requests: PollRequestReceiver,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job: FluxMonitorJob,
        deps: FluxMonitorDeps,
        submission_checker: SubmissionChecker,
        payment_checker: PaymentChecker,
        oracle_address: Address,
        poll_manager: PollManager,
        status: SharedStatus,
        log_sender: mpsc::UnboundedSender<LogBroadcast>,
        logs: mpsc::UnboundedReceiver<LogBroadcast>,
        poll_requests: PollRequestReceiver,
    ) -> Self {
        let aggregator = deps.aggregator.address();
        let deviation_checker = DeviationChecker::new(job.thresholds.clone());

        Self {
            job,
            deps,
            aggregator,
            oracle_address,
            submission_checker,
            payment_checker,
            deviation_checker,
            poll_manager,
            mode: Mode::Awake,
            backlog: LogBacklog::new(),
            status,
            _log_sender: log_sender,
            logs,
            poll_requests,
        }
    }

    /// Initial hibernation state and round state, then hand both to the poll manager
    pub async fn start_timers(&mut self) {
        let mode = Mode::from(self.is_hibernating().await);
        let round_state = self.initial_round_state().await;
        let mode = self.poll_manager.start(mode, &round_state);
        self.set_mode(mode);
    }

    pub async fn run(
        mut self,
        mut stop: oneshot::Receiver<()>,
        mut kill: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                biased;

                _ = &mut stop => {
                    tracing::debug!("flux monitor received stop signal");
                    // timers go quiet before the loop terminates
                    self.poll_manager.stop();
                    break;
                }
                _ = kill.recv() => {
                    tracing::debug!("flux monitor received kill signal");
                    self.poll_manager.stop();
                    break;
                }
                Some(broadcast) = self.logs.recv() => {
                    self.enqueue_log(broadcast);
                    while let Ok(broadcast) = self.logs.try_recv() {
                        self.enqueue_log(broadcast);
                    }
                    self.process_logs().await;
                }
                Some(request) = self.poll_requests.recv() => {
                    self.handle_poll_request(request).await;
                }
            }
        }

        tracing::debug!("flux monitor event loop exited");
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
        if let Ok(mut status) = self.status.write() {
            status.mode = mode;
        }
    }

    async fn timed<T, E>(
        &self,
        fut: impl Future<Output = Result<T, E>>,
        on_timeout: E,
    ) -> Result<T, E> {
        match tokio::time::timeout(self.job.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(on_timeout),
        }
    }

    async fn round_state(&self, round_id: RoundId) -> Result<RoundState, ContractError> {
        self.timed(
            self.deps
                .aggregator
                .oracle_round_state(self.oracle_address, round_id),
            ContractError::Timeout,
        )
        .await
    }

    /// The latest round if it can be read, else a state that only carries "now"
    async fn initial_round_state(&self) -> RoundState {
        let fallback = RoundState::started_at(chrono::Utc::now().timestamp().max(0) as u64);

        let latest = match self
            .timed(self.deps.aggregator.latest_round_data(), ContractError::Timeout)
            .await
        {
            Ok(latest) => latest,
            Err(err) => {
                tracing::warn!(
                    "unable to retrieve latestRoundData, using a default round state: {}",
                    err
                );
                return fallback;
            }
        };

        match self.round_state(latest.round_id).await {
            Ok(round_state) => round_state,
            Err(err) => {
                tracing::warn!(
                    round = latest.round_id,
                    "unable to call roundState for the latest round, using a default round state: {}",
                    err
                );
                fallback
            }
        }
    }

    async fn flag_lowered(&self) -> Result<bool, ContractError> {
        match &self.deps.flags {
            None => Ok(true),
            Some(flags) => {
                self.timed(flags.is_lowered(self.aggregator), ContractError::Timeout)
                    .await
            }
        }
    }

    async fn is_hibernating(&self) -> bool {
        match self.flag_lowered().await {
            Ok(lowered) => !lowered,
            Err(err) => {
                tracing::error!("unable to determine hibernation status: {}", err);
                false
            }
        }
    }

    async fn record_job_error(&self, description: &str) {
        tracing::error!(job_id = self.job.job_id, "{}", description);
        self.deps.metrics.increment_total_errors(self.job.job_id);

        if let Ok(mut status) = self.status.write() {
            status.last_error = Some(description.to_string());
        }

        if let Err(err) = self
            .deps
            .store
            .try_record_error(self.job.job_id, description)
            .await
        {
            tracing::error!("failed to record job error: {}", err);
        }
    }

    async fn mark_consumed(&self, broadcast: &LogBroadcast) {
        if let Err(err) = self.deps.log_broadcaster.mark_consumed(broadcast).await {
            tracing::error!(log = %broadcast.id, "failed to mark log consumed: {}", err);
        }
    }

    fn enqueue_log(&mut self, broadcast: LogBroadcast) {
        let accepted = match &broadcast.log {
            FluxLog::FlagRaised(flag) | FluxLog::FlagLowered(flag) => {
                flag.subject == Address::ZERO || flag.subject == self.aggregator
            }
            FluxLog::NewRound(_) | FluxLog::AnswerUpdated(_) => {
                broadcast.contract == self.aggregator
            }
        };

        if !accepted {
            tracing::debug!(log = %broadcast.id, kind = ?broadcast.log.kind(), "ignoring unrelated log");
            return;
        }

        if let Some(dropped) = self.backlog.push(broadcast) {
            tracing::debug!(log = %dropped.id, "log backlog full, dropping oldest entry");
        }
    }

    async fn process_logs(&mut self) {
        while let Some(broadcast) = self.backlog.pop() {
            match self
                .deps
                .log_broadcaster
                .was_already_consumed(&broadcast)
                .await
            {
                Ok(false) => {}
                Ok(true) => {
                    tracing::debug!(log = %broadcast.id, "skipping already consumed log");
                    continue;
                }
                Err(err) => {
                    tracing::error!(log = %broadcast.id, "unable to check whether log was consumed: {}", err);
                    continue;
                }
            }

            match broadcast.log.clone() {
                FluxLog::NewRound(log) => self.respond_to_new_round(log, broadcast).await,
                FluxLog::AnswerUpdated(_) => self.respond_to_answer_updated(broadcast).await,
                FluxLog::FlagRaised(_) => self.respond_to_flag_raised(broadcast).await,
                FluxLog::FlagLowered(_) => self.respond_to_flag_lowered(broadcast).await,
            }
        }
    }

    #[instrument(skip(self), fields(subsys = "FluxMonitor", job_id = self.job.job_id))]
    async fn handle_poll_request(&mut self, request: PollRequest) {
        let checker = if request.kind.ignores_deviation() {
            DeviationChecker::zero()
        } else {
            self.deviation_checker.clone()
        };

        self.poll_if_eligible(request.kind, &checker, None).await;
    }

    #[instrument(skip_all, fields(subsys = "FluxMonitor", log = %broadcast.id))]
    async fn respond_to_answer_updated(&mut self, broadcast: LogBroadcast) {
        match self.round_state(0).await {
            Ok(round_state) => self.poll_manager.reset(&round_state),
            Err(err) => tracing::error!("unable to refresh round state after AnswerUpdated: {}", err),
        }

        self.mark_consumed(&broadcast).await;
    }

    #[instrument(skip_all, fields(subsys = "FluxMonitor", log = %broadcast.id))]
    async fn respond_to_flag_raised(&mut self, broadcast: LogBroadcast) {
        // either flag may have moved since, only the contract knows the effective state
        match self.flag_lowered().await {
            Ok(false) => {
                tracing::info!("hibernation flag raised");
                let mode = self.poll_manager.hibernate();
                self.set_mode(mode);
            }
            Ok(true) => tracing::debug!("flag raised log, but the effective flag is still lowered"),
            Err(err) => {
                tracing::error!("unable to check flags contract, leaving log for redelivery: {}", err);
                return;
            }
        }

        self.mark_consumed(&broadcast).await;
    }

    #[instrument(skip_all, fields(subsys = "FluxMonitor", log = %broadcast.id))]
    async fn respond_to_flag_lowered(&mut self, broadcast: LogBroadcast) {
        if !self.mode.is_hibernating() {
            self.mark_consumed(&broadcast).await;
            return;
        }

        tracing::info!("hibernation flag lowered, awakening");
        let round_state = self.initial_round_state().await;
        let mode = self.poll_manager.awaken(&round_state);
        self.set_mode(mode);

        self.poll_if_eligible(PollRequestKind::Awaken, &DeviationChecker::zero(), Some(broadcast))
            .await;
    }

    #[instrument(skip(self, checker, broadcast), fields(subsys = "FluxMonitor", job_id = self.job.job_id))]
    async fn poll_if_eligible(
        &mut self,
        kind: PollRequestKind,
        checker: &DeviationChecker,
        broadcast: Option<LogBroadcast>,
    ) {
        if kind != PollRequestKind::Hibernation && self.mode.is_hibernating() {
            tracing::warn!("skipping poll, flux monitor is hibernating");
        } else if !self.deps.log_broadcaster.is_connected() {
            tracing::warn!("log source is not connected, skipping poll");
        } else {
            let result = self.try_poll(kind, checker, broadcast.as_ref()).await;
            let attempted = commit_attempted(&result);
            self.after_poll(kind, result);

            if attempted {
                return;
            }
        }

        if let Some(broadcast) = &broadcast {
            self.mark_consumed(broadcast).await;
        }
    }

    fn after_poll(&mut self, kind: PollRequestKind, result: Result<Decision, DecisionError>) {
        match result {
            Ok(decision) => {
                if let Decision::Submitted { round_id, run_id } = decision {
                    tracing::info!(round = round_id, run = %run_id, "submission queued");
                }
                self.poll_manager.stop_retry_ticker();
            }
            Err(err) => {
                tracing::error!(%kind, "poll failed: {}", err);
                let retryable = matches!(kind, PollRequestKind::Idle | PollRequestKind::Retry);
                if retryable && err.arms_retry() && self.poll_manager.start_retry_ticker() {
                    let (min, max) = self.poll_manager.retry_bounds();
                    tracing::debug!(?min, ?max, "started retry ticker");
                }
            }
        }
    }

    async fn try_poll(
        &mut self,
        kind: PollRequestKind,
        checker: &DeviationChecker,
        broadcast: Option<&LogBroadcast>,
    ) -> Result<Decision, DecisionError> {
        let mut round_state = self.fetch_round_state(0).await?;

        if kind == PollRequestKind::Drumbeat && !self.job.poll_config.drumbeat_random_delay.is_zero()
        {
            // every node reads the suggested round before sleeping
            let delay = random_delay(self.job.poll_config.drumbeat_random_delay);
            tracing::debug!(?delay, "sleeping before drumbeat poll");
            tokio::time::sleep(delay).await;
            round_state = self.fetch_round_state(round_state.round_id).await?;
        }

        self.poll_manager.reset(&round_state);

        let round_id = round_state.round_id;
        let stats = self.deps.store.find_or_create(self.aggregator, round_id, 0).await?;
        let run_status = self.run_status(stats.pipeline_run_id).await?;
        if stats.num_submissions > 0 && !run_status.errored() {
            tracing::debug!(round = round_id, %run_status, "skipping poll, round already has a submission");
            return Ok(Decision::Skipped);
        }

        if !self.check_eligibility(&round_state) {
            return Ok(Decision::Skipped);
        }

        let observation = self.observe().await?;

        let latest_submission = self.submission_checker.from_raw(round_state.latest_submission)?;
        if round_id > 1 && !checker.outside_deviation(&latest_submission, &observation.answer) {
            tracing::debug!(
                round = round_id,
                previous = %latest_submission,
                answer = %observation.answer,
                "deviation < threshold, not submitting"
            );
            return Ok(Decision::Skipped);
        }

        if round_id == 1 {
            tracing::info!(answer = %observation.answer, "starting first round");
        } else {
            tracing::info!(
                round = round_id,
                previous = %latest_submission,
                answer = %observation.answer,
                "deviation > threshold, submitting"
            );
        }

        if round_state.payment_amount.is_none() {
            tracing::error!(round = round_id, "invariant violation: round state has no payment amount");
        }

        self.commit(round_id, observation, 0, broadcast.cloned()).await
    }

    #[instrument(skip_all, fields(subsys = "FluxMonitor", job_id = self.job.job_id, round = log.round_id))]
    async fn respond_to_new_round(&mut self, log: NewRoundLog, broadcast: LogBroadcast) {
        let result = self.try_new_round(&log, &broadcast).await;

        let attempted = commit_attempted(&result);
        match result {
            Ok(Decision::Submitted { round_id, run_id }) => {
                tracing::info!(round = round_id, run = %run_id, "submission queued for new round");
            }
            Ok(Decision::Skipped) => {}
            Err(err) => tracing::error!("unable to respond to new round: {}", err),
        }

        if !attempted {
            self.mark_consumed(&broadcast).await;
        }
    }

    async fn try_new_round(
        &mut self,
        log: &NewRoundLog,
        broadcast: &LogBroadcast,
    ) -> Result<Decision, DecisionError> {
        self.poll_manager.reset_idle_timer(log.started_at);
        self.deps.metrics.set_seen_round(self.job.job_id, log.round_id);

        let most_recent = self.deps.store.most_recent_round_id(self.aggregator).await?;

        let mut stats = self
            .deps
            .store
            .find_or_create(self.aggregator, log.round_id, 1)
            .await?;

        if let Some(most_recent) = most_recent.filter(|most_recent| log.round_id < *most_recent) {
            tracing::info!(
                most_recent,
                "new round log is older than the most recent round, rewinding round stats"
            );
            self.deps
                .store
                .delete_rounds_from(self.aggregator, log.round_id)
                .await?;
            stats = self
                .deps
                .store
                .find_or_create(self.aggregator, log.round_id, 1)
                .await?;
        }

        let run_status = self.run_status(stats.pipeline_run_id).await?;
        if stats.num_submissions > 0 && !run_status.errored() {
            tracing::debug!(%run_status, "ignoring new round request: already submitted for this round");
            return Ok(Decision::Skipped);
        }

        if log.started_by == self.oracle_address {
            tracing::info!("ignoring new round request: we started this round");
            return Ok(Decision::Skipped);
        }

        let round_state = self.fetch_round_state(log.round_id).await?;
        if round_state.round_id != log.round_id {
            tracing::error!(
                reported_round = round_state.round_id,
                "invariant violation: round state does not match the new round log"
            );
        }
        self.poll_manager.reset(&round_state);

        if !self.check_eligibility(&round_state) {
            return Ok(Decision::Skipped);
        }

        let observation = self.observe().await?;

        self.commit(log.round_id, observation, 1, Some(broadcast.clone()))
            .await
    }

    /// Round state with the job error recorded on failure
    async fn fetch_round_state(&self, round_id: RoundId) -> Result<RoundState, DecisionError> {
        match self.round_state(round_id).await {
            Ok(round_state) => Ok(round_state),
            Err(err) => {
                self.record_job_error(ERR_ROUND_STATE).await;
                Err(DecisionError::RoundState(err))
            }
        }
    }

    async fn run_status(&self, run_id: Option<RunId>) -> Result<RunStatus, DecisionError> {
        let Some(run_id) = run_id else {
            return Ok(RunStatus::Unknown);
        };

        Ok(self
            .deps
            .store
            .find_run(run_id)
            .await?
            .map(|run| run.status)
            .unwrap_or_default())
    }

    fn check_eligibility(&self, round_state: &RoundState) -> bool {
        let round = round_state.round_id;

        if !round_state.eligible_to_submit {
            tracing::info!(round, "not eligible to submit");
            return false;
        }

        let available_funds = round_state.available_funds.unwrap_or_default();
        let payment_amount = round_state.payment_amount.unwrap_or_default();

        if !self.payment_checker.sufficient_funds(
            available_funds,
            payment_amount,
            round_state.oracle_count,
        ) {
            tracing::info!(round, %available_funds, %payment_amount, "aggregator is underfunded");
            return false;
        }

        if !self.payment_checker.sufficient_payment(payment_amount) {
            tracing::info!(round, %payment_amount, "round payment amount < minimum contract payment");
            return false;
        }

        true
    }

    /// Runs the pipeline against the latest on-chain answer and range checks the result
    async fn observe(&self) -> Result<Observation, DecisionError> {
        let latest = match self
            .timed(self.deps.aggregator.latest_round_data(), ContractError::Timeout)
            .await
        {
            Ok(latest) => Some(latest),
            Err(err) => {
                tracing::warn!("unable to read latestRoundData, running without it: {}", err);
                None
            }
        };

        let vars = PipelineVars {
            job_id: self.job.job_id,
            job_name: self.job.name.clone(),
            latest_answer: latest.as_ref().map(|latest| latest.answer),
            updated_at: latest.as_ref().map(|latest| latest.updated_at),
        };

        let run = match self
            .timed(
                self.deps.pipeline_runner.execute_run(&self.job.pipeline, &vars),
                PipelineError::Timeout,
            )
            .await
        {
            Ok(run) => run,
            Err(err) => {
                self.record_job_error(ERR_POLLING).await;
                return Err(err.into());
            }
        };

        let answer = match run.answer() {
            Ok(answer) if !run.status.errored() => answer.clone(),
            Ok(_) => {
                self.record_job_error(ERR_POLLING).await;
                return Err(DecisionError::RunErrored("run finished with an error status".into()));
            }
            Err(err) => {
                let err = err.to_string();
                self.record_job_error(ERR_POLLING).await;
                return Err(DecisionError::RunErrored(err));
            }
        };

        self.deps
            .metrics
            .set_seen_value(self.job.job_id, decimal_to_f64(&answer));

        if !self.submission_checker.is_valid(&answer) {
            self.record_job_error(ERR_OUT_OF_RANGE).await;
            return Err(DecisionError::OutOfRange {
                answer,
                min: self.submission_checker.min.clone(),
                max: self.submission_checker.max.clone(),
            });
        }

        Ok(Observation { run, answer })
    }

    async fn commit(
        &mut self,
        round_id: RoundId,
        observation: Observation,
        new_round_logs: u64,
        consumed_log: Option<LogBroadcast>,
    ) -> Result<Decision, DecisionError> {
        let raw: I256 = self.submission_checker.to_raw(&observation.answer)?;

        let submission = PendingSubmission {
            job_id: self.job.job_id,
            aggregator: self.aggregator,
            round_id,
            answer: raw,
            run: observation.run,
            new_round_logs,
            consumed_log,
        };

        let run_id = self
            .deps
            .store
            .commit_submission(
                submission,
                self.deps.tx_queue.as_ref(),
                self.deps.log_broadcaster.as_ref(),
            )
            .await
            .map_err(DecisionError::Commit)?;

        self.deps.metrics.record_submission(
            self.job.job_id,
            round_id,
            decimal_to_f64(&observation.answer),
        );
        if let Ok(mut status) = self.status.write() {
            status.last_submitted_round = Some(round_id);
        }

        Ok(Decision::Submitted { round_id, run_id })
    }
}

fn random_delay(max: Duration) -> Duration {
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..max_ms))
}

fn decimal_to_f64(value: &BigDecimal) -> f64 {
    value.to_string().parse().unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn out_of_range_does_not_arm_retry() {
        let out_of_range = DecisionError::OutOfRange {
            answer: BigDecimal::from(10),
            min: BigDecimal::from(0),
            max: BigDecimal::from(5),
        };
        assert!(!out_of_range.arms_retry());
        assert!(DecisionError::RoundState(ContractError::Timeout).arms_retry());
        assert!(DecisionError::Pipeline(PipelineError::Timeout).arms_retry());
    }

    #[test]
    fn only_commit_outcomes_own_the_log() {
        assert!(commit_attempted(&Ok(Decision::Submitted {
            round_id: 1,
            run_id: RunId::new(1)
        })));
        assert!(!commit_attempted(&Ok(Decision::Skipped)));
        assert!(!commit_attempted(&Err(DecisionError::RunErrored("x".into()))));
        assert!(commit_attempted(&Err(DecisionError::Commit(
            StoreError::MissingRoundStats {
                aggregator: Address::ZERO,
                round_id: 1
            }
        ))));
    }

    #[test]
    fn random_delay_stays_in_bounds() {
        assert_eq!(random_delay(Duration::ZERO), Duration::ZERO);
        for _ in 0..100 {
            assert!(random_delay(Duration::from_secs(2)) < Duration::from_secs(2));
        }
    }

    #[test]
    fn decimals_convert_for_metrics() {
        assert_eq!(decimal_to_f64(&BigDecimal::from_str("1.5").unwrap()), 1.5);
        assert_eq!(decimal_to_f64(&BigDecimal::from(-3)), -3.0);
    }
}
