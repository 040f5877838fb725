use std::time::Duration;

use backoff::backoff::Backoff;
use chrono::Utc;
use flux_types::{PollRequest, PollRequestKind};
use tokio::{sync::mpsc::UnboundedSender, task::JoinHandle, time::MissedTickBehavior};

use super::backoff::RetryBackoff;

/// One timer source, backed by a spawned task that only ever sends requests.
/// Stopping or dropping aborts the task.
#[derive(Debug, Default)]
pub(crate) struct TimerTask {
    handle: Option<JoinHandle<()>>,
}

impl TimerTask {
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Fires `kind` every `period`, first tick one period from now
    pub fn start_ticker(
        &mut self,
        period: Duration,
        kind: PollRequestKind,
        sender: UnboundedSender<PollRequest>,
    ) {
        self.replace(tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                if sender.send(PollRequest::now(kind)).is_err() {
                    break;
                }
            }
        }));
    }

    /// Fires `kind` once after `delay`, a zero delay fires right away
    pub fn start_oneshot(
        &mut self,
        delay: Duration,
        kind: PollRequestKind,
        sender: UnboundedSender<PollRequest>,
    ) {
        self.replace(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = sender.send(PollRequest::now(kind));
        }));
    }

    pub fn start_retry(&mut self, mut backoff: RetryBackoff, sender: UnboundedSender<PollRequest>) {
        self.replace(tokio::spawn(async move {
            let (_, max) = backoff.bounds();
            loop {
                let delay = backoff.next_backoff().unwrap_or(max);
                tokio::time::sleep(delay).await;
                tracing::debug!(next_delay = ?delay, "retry ticker fired");
                if sender.send(PollRequest::now(PollRequestKind::Retry)).is_err() {
                    break;
                }
            }
        }));
    }

    /// Fires at every upcoming instant of the schedule, in UTC
    pub fn start_drumbeat(&mut self, schedule: cron::Schedule, sender: UnboundedSender<PollRequest>) {
        self.replace(tokio::spawn(async move {
            loop {
                let Some(next) = schedule.upcoming(Utc).next() else {
                    tracing::warn!("Drumbeat schedule has no upcoming instants");
                    break;
                };

                let delay = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                tokio::time::sleep(delay).await;

                if sender.send(PollRequest::now(PollRequestKind::Drumbeat)).is_err() {
                    break;
                }

                // the schedule resolution is one second, step past the instant we just served
                let remaining = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                tokio::time::sleep(remaining + Duration::from_millis(1)).await;
            }
        }));
    }

    fn replace(&mut self, handle: JoinHandle<()>) {
        self.stop();
        self.handle = Some(handle);
    }
}

impl Drop for TimerTask {
    fn drop(&mut self) {
        self.stop();
    }
}
