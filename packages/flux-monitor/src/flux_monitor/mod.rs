mod backlog;
mod worker;

pub use backlog::LogBacklog;

use std::{sync::Arc, time::Duration};

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use flux_types::{JobId, LogKind, PipelineSpec};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::instrument;
use utils::{context::AppContext, telemetry::FluxMonitorMetrics};

use crate::{
    apis::{
        FlagsContract, FluxAggregator, KeyStore, ListenerOpts, LogBroadcaster, PipelineRunner,
        RoundStatsStore, TransactionQueue,
    },
    checkers::{PaymentChecker, SubmissionChecker, Thresholds},
    config::{Config, FluxJobConfig},
    error::FluxMonitorError,
    health::{HealthReport, ServiceState, SharedStatus},
    poll_manager::{PollManager, PollManagerConfig},
};
use worker::Worker;

/// Lifecycle the host process drives
#[async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&mut self, ctx: &AppContext) -> Result<(), FluxMonitorError>;

    async fn close(&mut self) -> Result<(), FluxMonitorError>;

    fn health(&self) -> HealthReport;
}

/// Static description of one flux monitor job
#[derive(Debug, Clone)]
pub struct FluxMonitorJob {
    pub job_id: JobId,
    pub name: String,
    pub pipeline: PipelineSpec,
    pub thresholds: Thresholds,
    /// Implied decimal places of the on-chain answer
    pub precision: u32,
    pub min_contract_payment: U256,
    pub min_job_payment: Option<U256>,
    pub poll_config: PollManagerConfig,
    /// Bound on every contract read and pipeline run
    pub call_timeout: Duration,
}

#[derive(Clone)]
pub struct FluxMonitorDeps {
    pub aggregator: Arc<dyn FluxAggregator>,
    pub flags: Option<Arc<dyn FlagsContract>>,
    pub key_store: Arc<dyn KeyStore>,
    pub pipeline_runner: Arc<dyn PipelineRunner>,
    pub store: Arc<dyn RoundStatsStore>,
    pub tx_queue: Arc<dyn TransactionQueue>,
    pub log_broadcaster: Arc<dyn LogBroadcaster>,
    pub metrics: FluxMonitorMetrics,
}

/// Handle to one flux monitor job.
///
/// All decisions happen on a single event loop task spawned by `start`, the
/// handle only drives the lifecycle and reads the shared status.
pub struct FluxMonitor {
    job: FluxMonitorJob,
    deps: FluxMonitorDeps,
    submission_checker: SubmissionChecker,
    state: ServiceState,
    status: SharedStatus,
    stop_sender: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl FluxMonitor {
    /// Reads the submission bounds from the aggregator and validates the timers
    #[instrument(skip_all, fields(subsys = "FluxMonitor", job_id = job.job_id))]
    pub async fn new(job: FluxMonitorJob, deps: FluxMonitorDeps) -> Result<Self, FluxMonitorError> {
        job.poll_config.validate()?;

        let min = deps.aggregator.min_submission_value().await?;
        let max = deps.aggregator.max_submission_value().await?;
        let submission_checker = SubmissionChecker::new(min, max, job.precision)?;

        tracing::debug!(
            aggregator = %deps.aggregator.address(),
            min = %submission_checker.min,
            max = %submission_checker.max,
            "flux monitor created"
        );

        Ok(Self {
            job,
            deps,
            submission_checker,
            state: ServiceState::Unstarted,
            status: SharedStatus::default(),
            stop_sender: None,
            handle: None,
        })
    }

    pub async fn from_config(
        job_config: &FluxJobConfig,
        config: &Config,
        deps: FluxMonitorDeps,
    ) -> Result<Self, FluxMonitorError> {
        let job = job_config
            .to_job(config)
            .map_err(FluxMonitorError::Config)?;
        Self::new(job, deps).await
    }

    pub fn job(&self) -> &FluxMonitorJob {
        &self.job
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn aggregator_address(&self) -> Address {
        self.deps.aggregator.address()
    }

    /// First sending key that is a registered oracle, else the first key at all
    async fn resolve_oracle_address(&self) -> Result<Address, FluxMonitorError> {
        let keys = self.deps.key_store.sending_keys().await?;
        let first = *keys.first().ok_or(FluxMonitorError::NoKeys)?;

        match self.deps.aggregator.get_oracles().await {
            Ok(oracles) => match keys.iter().find(|key| oracles.contains(key)) {
                Some(key) => Ok(*key),
                None => {
                    tracing::warn!(
                        %first,
                        "None of the node's keys are registered as oracles on the aggregator, using the first key"
                    );
                    Ok(first)
                }
            },
            Err(err) => {
                tracing::warn!(%first, "Unable to fetch oracle list, using the first key: {}", err);
                Ok(first)
            }
        }
    }
}

#[async_trait]
impl Service for FluxMonitor {
    fn name(&self) -> &str {
        &self.job.name
    }

    #[instrument(skip_all, fields(subsys = "FluxMonitor", job_id = self.job.job_id))]
    async fn start(&mut self, ctx: &AppContext) -> Result<(), FluxMonitorError> {
        if self.state != ServiceState::Unstarted {
            return Err(FluxMonitorError::AlreadyStarted);
        }

        let oracle_address = self.resolve_oracle_address().await?;
        let aggregator = self.deps.aggregator.address();

        let (log_sender, log_receiver) = mpsc::unbounded_channel();
        self.deps.log_broadcaster.register(
            ListenerOpts {
                contract: aggregator,
                events: LogKind::aggregator_events(),
            },
            log_sender.clone(),
        )?;
        if let Some(flags) = &self.deps.flags {
            self.deps.log_broadcaster.register(
                ListenerOpts {
                    contract: flags.address(),
                    events: LogKind::flag_events(),
                },
                log_sender.clone(),
            )?;
        }

        let (poll_manager, poll_requests) = PollManager::new(self.job.poll_config.clone())?;

        let mut worker = Worker::new(
            self.job.clone(),
            self.deps.clone(),
            self.submission_checker.clone(),
            PaymentChecker::new(self.job.min_contract_payment, self.job.min_job_payment),
            oracle_address,
            poll_manager,
            self.status.clone(),
            log_sender,
            log_receiver,
            poll_requests,
        );
        worker.start_timers().await;

        let (stop_sender, stop_receiver) = oneshot::channel();
        let kill_receiver = ctx.get_kill_receiver();
        self.handle = Some(ctx.rt.spawn(worker.run(stop_receiver, kill_receiver)));
        self.stop_sender = Some(stop_sender);
        self.state = ServiceState::Running;

        tracing::info!(%aggregator, oracle = %oracle_address, "flux monitor started");
        Ok(())
    }

    #[instrument(skip_all, fields(subsys = "FluxMonitor", job_id = self.job.job_id))]
    async fn close(&mut self) -> Result<(), FluxMonitorError> {
        if self.state != ServiceState::Running {
            return Err(FluxMonitorError::NotRunning(self.state));
        }
        self.state = ServiceState::Closed;

        if let Some(stop_sender) = self.stop_sender.take() {
            // the loop may already be gone after a kill
            let _ = stop_sender.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.await?;
        }

        tracing::info!("flux monitor closed");
        Ok(())
    }

    fn health(&self) -> HealthReport {
        let status = self
            .status
            .read()
            .map(|status| status.clone())
            .unwrap_or_default();

        HealthReport {
            name: self.job.name.clone(),
            timestamp: chrono::Utc::now().timestamp().max(0) as u64,
            state: self.state,
            mode: status.mode,
            log_source_connected: self.deps.log_broadcaster.is_connected(),
            last_error: status.last_error,
            last_submitted_round: status.last_submitted_round,
        }
    }
}
