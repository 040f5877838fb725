pub mod backoff;
pub mod config;
mod timers;

use std::time::Duration;

use chrono::Utc;
use flux_types::{Mode, PollRequest, PollRequestKind, RoundState};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::instrument;

pub use self::backoff::RetryBackoff;
pub use config::{PollManagerConfig, PollManagerError};
use timers::TimerTask;

pub type PollRequestSender = UnboundedSender<PollRequest>;
pub type PollRequestReceiver = UnboundedReceiver<PollRequest>;

/// Owns every time based trigger and merges them into one request stream.
///
/// Each timer is an independent task that only sends into the shared channel,
/// all decision state stays with whoever consumes the receiver.
pub struct PollManager {
    config: PollManagerConfig,
    drumbeat_schedule: Option<cron::Schedule>,
    sender: PollRequestSender,
    mode: Mode,
    poll_ticker: TimerTask,
    idle_timer: TimerTask,
    round_timer: TimerTask,
    hibernation_ticker: TimerTask,
    retry_ticker: TimerTask,
    drumbeat_ticker: TimerTask,
    /// Unix deadline the idle timer was last armed for
    idle_deadline: Option<u64>,
    /// Unix deadline the round timer was last armed for
    round_deadline: Option<u64>,
}

impl PollManager {
    pub fn new(
        config: PollManagerConfig,
    ) -> Result<(Self, PollRequestReceiver), PollManagerError> {
        let drumbeat_schedule = config.validate()?;
        let (sender, receiver) = mpsc::unbounded_channel();

        Ok((
            Self {
                config,
                drumbeat_schedule,
                sender,
                mode: Mode::Awake,
                poll_ticker: TimerTask::default(),
                idle_timer: TimerTask::default(),
                round_timer: TimerTask::default(),
                hibernation_ticker: TimerTask::default(),
                retry_ticker: TimerTask::default(),
                drumbeat_ticker: TimerTask::default(),
                idle_deadline: None,
                round_deadline: None,
            },
            receiver,
        ))
    }

    pub fn config(&self) -> &PollManagerConfig {
        &self.config
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn retry_bounds(&self) -> (Duration, Duration) {
        (
            self.config.min_retry_backoff_duration,
            self.config.max_retry_backoff_duration,
        )
    }

    fn should_perform_initial_poll(&self, mode: Mode) -> bool {
        !(self.config.poll_ticker_disabled && self.config.idle_timer_disabled)
            && !mode.is_hibernating()
    }

    #[instrument(skip(self, round_state), fields(subsys = "PollManager"))]
    pub fn start(&mut self, mode: Mode, round_state: &RoundState) -> Mode {
        if self.should_perform_initial_poll(mode) {
            let _ = self.sender.send(PollRequest::now(PollRequestKind::Initial));
        }

        match mode {
            Mode::Hibernating => self.hibernate(),
            Mode::Awake => self.awaken(round_state),
        }
    }

    #[instrument(skip(self), fields(subsys = "PollManager"))]
    pub fn stop(&mut self) {
        self.poll_ticker.stop();
        self.idle_timer.stop();
        self.round_timer.stop();
        self.hibernation_ticker.stop();
        self.retry_ticker.stop();
        self.drumbeat_ticker.stop();
        self.idle_deadline = None;
        self.round_deadline = None;
    }

    /// Restarts the idle and round timers from a fresh round state
    #[instrument(skip(self, round_state), fields(subsys = "PollManager", round = round_state.round_id))]
    pub fn reset(&mut self, round_state: &RoundState) {
        if self.mode.is_hibernating() {
            return;
        }

        self.reset_idle_timer(round_state.started_at);
        self.reset_round_timer(round_state);
    }

    #[instrument(skip(self), fields(subsys = "PollManager"))]
    pub fn reset_idle_timer(&mut self, round_started_at: u64) {
        if self.config.idle_timer_disabled || self.mode.is_hibernating() {
            self.idle_timer.stop();
            self.idle_deadline = None;
            return;
        }

        // an unknown start time would give a meaningless deadline
        if round_started_at == 0 {
            return;
        }

        let deadline = round_started_at.saturating_add(self.config.idle_timer_period.as_secs());
        // each deadline fires at most once, later idle polls are paced by the retry ticker
        if self.idle_deadline == Some(deadline) {
            return;
        }
        self.idle_deadline = Some(deadline);
        let delay = until_unix(deadline);

        tracing::debug!(?delay, deadline, "resetting idle timer");
        self.idle_timer
            .start_oneshot(delay, PollRequestKind::Idle, self.sender.clone());
    }

    fn reset_round_timer(&mut self, round_state: &RoundState) {
        match round_state.times_out_at() {
            None => {
                self.round_timer.stop();
                self.round_deadline = None;
            }
            Some(deadline) if self.round_deadline == Some(deadline) => {}
            Some(deadline) => {
                self.round_deadline = Some(deadline);
                // a deadline in the past fires immediately, but only once
                let delay = until_unix(deadline);
                tracing::debug!(?delay, deadline, "resetting round timer");
                self.round_timer
                    .start_oneshot(delay, PollRequestKind::Round, self.sender.clone());
            }
        }
    }

    #[instrument(skip(self), fields(subsys = "PollManager"))]
    pub fn hibernate(&mut self) -> Mode {
        tracing::info!("entering hibernation mode");
        self.mode = Mode::Hibernating;

        self.poll_ticker.stop();
        self.drumbeat_ticker.stop();
        self.idle_timer.stop();
        self.round_timer.stop();
        self.idle_deadline = None;
        self.round_deadline = None;
        self.stop_retry_ticker();

        self.hibernation_ticker.start_ticker(
            self.config.hibernation_poll_period,
            PollRequestKind::Hibernation,
            self.sender.clone(),
        );

        self.mode
    }

    #[instrument(skip(self, round_state), fields(subsys = "PollManager"))]
    pub fn awaken(&mut self, round_state: &RoundState) -> Mode {
        tracing::info!("exiting hibernation mode");
        self.mode = Mode::Awake;

        self.hibernation_ticker.stop();

        if !self.config.poll_ticker_disabled {
            self.poll_ticker.start_ticker(
                self.config.poll_ticker_interval,
                PollRequestKind::Poll,
                self.sender.clone(),
            );
        }

        if let Some(schedule) = self.drumbeat_schedule.clone() {
            self.drumbeat_ticker
                .start_drumbeat(schedule, self.sender.clone());
        }

        self.reset(round_state);

        self.mode
    }

    /// Returns false if the retry ticker was already running
    #[instrument(skip(self), fields(subsys = "PollManager"))]
    pub fn start_retry_ticker(&mut self) -> bool {
        if self.retry_ticker.is_running() {
            return false;
        }

        let (min, max) = self.retry_bounds();
        tracing::debug!(?min, ?max, "starting retry ticker");
        self.retry_ticker
            .start_retry(RetryBackoff::new(min, max), self.sender.clone());
        true
    }

    /// Stops the retry ticker, the next start begins again from the minimum delay
    #[instrument(skip(self), fields(subsys = "PollManager"))]
    pub fn stop_retry_ticker(&mut self) {
        self.retry_ticker.stop();
    }

    pub fn is_retry_ticker_running(&self) -> bool {
        self.retry_ticker.is_running()
    }
}

/// Time left until a unix timestamp in seconds, zero if it already passed
fn until_unix(deadline: u64) -> Duration {
    let now = Utc::now().timestamp().max(0) as u64;
    Duration::from_secs(deadline.saturating_sub(now))
}
