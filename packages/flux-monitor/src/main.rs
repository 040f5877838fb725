use anyhow::Result;
use clap::Parser;
use flux_monitor::{args::CliArgs, config::Config};
use opentelemetry::global;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utils::{
    config::{ConfigBuilder, ConfigExt},
    context::AppContext,
    telemetry::{setup_metrics, setup_tracing, FluxMonitorMetrics},
};

fn main() -> Result<()> {
    let args = CliArgs::parse();
    let config: Config = ConfigBuilder::new(args).build()?;

    let ctx = AppContext::new()?;

    // setup tracing
    let filters = config.tracing_env_filter()?;
    let tracer_provider = match config.jaeger.as_ref() {
        Some(collector) => Some(ctx.rt.block_on(async {
            setup_tracing(collector, "flux-monitor", filters)
        })?),
        None => {
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .without_time()
                        .with_target(false),
                )
                .with(filters)
                .try_init()?;
            None
        }
    };

    let meter_provider = match config.prometheus.as_ref() {
        Some(collector) => Some(ctx.rt.block_on(async {
            setup_metrics(collector, "flux-monitor")
        })?),
        None => None,
    };

    let meter = global::meter("flux_monitor_metrics");
    let metrics = FluxMonitorMetrics::init(&meter);

    let result = flux_monitor::run_server(ctx, config, metrics);

    if let Some(tracer) = tracer_provider {
        if let Err(err) = tracer.shutdown() {
            eprintln!("Error shutting down tracer provider: {err}");
        }
    }
    if let Some(meter) = meter_provider {
        if let Err(err) = meter.shutdown() {
            eprintln!("Error shutting down meter provider: {err}");
        }
    }

    result
}
