pub mod apis;
pub mod args;
pub mod checkers;
pub mod config;
pub mod error;
pub mod evm; // chain adapters behind the apis
pub mod flux_monitor; // the per-job coordinator
pub mod health;
pub mod pipeline;
pub mod poll_manager;
pub mod store;
pub mod test_utils;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use utils::{
    context::AppContext,
    evm_client::{make_signer, EvmEndpoint},
    telemetry::FluxMonitorMetrics,
};

use crate::{
    config::Config,
    evm::{EvmFlags, EvmFluxAggregator, EvmLogStream, EvmTransactionQueue, LocalKeyStore},
    flux_monitor::{FluxMonitor, FluxMonitorDeps, Service},
    pipeline::HttpJsonRunner,
    store::{memory::DEFAULT_REPLAY_INTERVAL, MemoryLogBroadcaster, MemoryStore},
};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Entry point to start up every configured job
/// Blocks until the context is killed, e.g. by ctrl-c
pub fn run_server(ctx: AppContext, config: Config, metrics: FluxMonitorMetrics) -> Result<()> {
    let _ = ctrlc::set_handler({
        let ctx = ctx.clone();
        move || {
            ctx.kill();
        }
    });

    ctx.rt.clone().block_on(run_monitors(ctx, config, metrics))
}

async fn run_monitors(ctx: AppContext, config: Config, metrics: FluxMonitorMetrics) -> Result<()> {
    let credential = config
        .credential
        .as_deref()
        .context("a credential is required to sign submissions")?;
    let signer = make_signer(credential, config.hd_index)?;

    let ws_endpoint: EvmEndpoint = config
        .ws_endpoint
        .as_deref()
        .context("a websocket endpoint is required to watch contract logs")?
        .parse()?;
    let send_endpoint: EvmEndpoint = match config.http_endpoint.as_deref() {
        Some(http_endpoint) => http_endpoint.parse()?,
        None => ws_endpoint.clone(),
    };

    let query_provider = ws_endpoint.to_provider().await?;
    let signing_provider = send_endpoint.to_signing_provider(signer.clone()).await?;

    let log_broadcaster = MemoryLogBroadcaster::new();
    // nothing is delivered until the first subscription is up
    log_broadcaster.set_connected(false);

    let store = Arc::new(MemoryStore::default());
    let key_store = Arc::new(LocalKeyStore::new(&[signer]));
    let tx_queue = Arc::new(EvmTransactionQueue::spawn(
        signing_provider,
        config.gas_limit,
        ctx.get_kill_receiver(),
    ));
    let http_client = reqwest::Client::builder()
        .timeout(config.call_timeout())
        .build()?;

    let mut monitors = Vec::with_capacity(config.jobs.len());
    let mut contracts = Vec::new();

    for job_config in &config.jobs {
        let aggregator = EvmFluxAggregator::new(job_config.contract_address, query_provider.clone());
        let flags = job_config
            .flags_contract_address
            .map(|address| EvmFlags::new(address, query_provider.clone()));

        contracts.push(job_config.contract_address);
        contracts.extend(job_config.flags_contract_address);

        let deps = FluxMonitorDeps {
            aggregator: Arc::new(aggregator),
            flags: flags.map(|flags| Arc::new(flags) as _),
            key_store: key_store.clone(),
            pipeline_runner: Arc::new(HttpJsonRunner::new(
                http_client.clone(),
                &job_config.pipeline.path,
                job_config.pipeline.multiplier()?,
            )),
            store: store.clone(),
            tx_queue: tx_queue.clone(),
            log_broadcaster: Arc::new(log_broadcaster.clone()),
            metrics: metrics.clone(),
        };

        let mut monitor = FluxMonitor::from_config(job_config, &config, deps)
            .await
            .with_context(|| format!("unable to create job {}", job_config.job_id))?;
        monitor
            .start(&ctx)
            .await
            .with_context(|| format!("unable to start job {}", job_config.job_id))?;
        monitors.push(monitor);
    }

    contracts.sort();
    contracts.dedup();

    if contracts.is_empty() {
        tracing::warn!("No jobs configured");
    } else {
        ctx.rt.spawn(
            log_broadcaster
                .clone()
                .run_replay(DEFAULT_REPLAY_INTERVAL, ctx.get_kill_receiver()),
        );
        let log_stream = EvmLogStream::new(query_provider, contracts, log_broadcaster);
        ctx.rt.spawn(log_stream.run(ctx.get_kill_receiver()));
    }

    let mut kill_receiver = ctx.get_kill_receiver();
    let mut health_interval = tokio::time::interval(HEALTH_LOG_INTERVAL);
    loop {
        tokio::select! {
            biased;
            _ = kill_receiver.recv() => break,
            _ = health_interval.tick() => {
                for monitor in &monitors {
                    let report = monitor.health();
                    match report.check() {
                        Ok(()) => tracing::debug!(job = %report.name, mode = %report.mode, "healthy"),
                        Err(err) => tracing::warn!(job = %report.name, "unhealthy: {}", err),
                    }
                }
            }
        }
    }

    tracing::info!("Shutting down {} job(s)", monitors.len());
    for monitor in &mut monitors {
        if let Err(err) = monitor.close().await {
            tracing::error!(job = monitor.name(), "error closing job: {}", err);
        }
    }

    Ok(())
}

// the test version of init_tracing does not take a config
// since config itself is tested and modified from different parallel tests
// therefore, this only uses the default tracing settings
// it's not gated out because it is used in integration tests as well
pub fn init_tracing_tests() {
    use std::sync::LazyLock;

    // there is a race across test threads, so only the first caller initializes
    static INIT: LazyLock<std::sync::Mutex<bool>> = LazyLock::new(|| std::sync::Mutex::new(false));

    let Ok(mut init) = INIT.lock() else {
        return;
    };

    if !*init {
        *init = true;

        tracing_subscriber::fmt::init();
        tracing::debug!("Tracing initialized for tests");
    }
}
