use anyhow::{Context, Result};
use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Meter},
    trace::TracerProvider as _,
    KeyValue,
};
use opentelemetry_otlp::{Protocol, SpanExporter, WithExportConfig};
use opentelemetry_sdk::{
    metrics::SdkMeterProvider,
    resource::Resource,
    trace::{self, Sampler, SdkTracerProvider},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub fn setup_tracing(
    collector: &str,
    service_name: &str,
    filters: tracing_subscriber::EnvFilter,
) -> Result<SdkTracerProvider> {
    global::set_text_map_propagator(opentelemetry_jaeger_propagator::Propagator::new());
    let endpoint = format!("{}/v1/traces", collector);
    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .context("Failed to build OTLP span exporter")?;

    let batch_processor = trace::BatchSpanProcessor::builder(exporter).build();

    let provider = SdkTracerProvider::builder()
        .with_span_processor(batch_processor)
        .with_sampler(Sampler::AlwaysOn)
        .with_resource(
            Resource::builder()
                .with_service_name(service_name.to_owned())
                .build(),
        )
        .build();
    global::set_tracer_provider(provider.clone());
    let tracer = provider.tracer(format!("{}-tracer", service_name));
    let telemetry = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry()
        .with(filters)
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry)
        .try_init()
        .context("Failed to set global default subscriber")?;

    tracing::info!("Jaeger tracing enabled");
    Ok(provider)
}

pub fn setup_metrics(collector: &str, service_name: &str) -> Result<SdkMeterProvider> {
    let endpoint = format!("{}/api/v1/otlp/v1/metrics", collector);

    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(endpoint)
        .build()
        .context("Failed to build OTLP metric exporter")?;

    let meter_provider = SdkMeterProvider::builder()
        .with_resource(
            Resource::builder()
                .with_service_name(service_name.to_owned())
                .build(),
        )
        .with_periodic_exporter(exporter)
        .build();

    global::set_meter_provider(meter_provider.clone());

    tracing::info!("Metrics enabled and exporting to {}", collector);

    Ok(meter_provider)
}

/// Per-job gauges and counters. Every instrument is labelled with the job id.
#[derive(Clone, Debug)]
pub struct FluxMonitorMetrics {
    pub seen_round: Gauge<u64>,
    pub seen_value: Gauge<f64>,
    pub reported_round: Gauge<u64>,
    pub reported_value: Gauge<f64>,
    pub total_submissions: Counter<u64>,
    pub total_errors: Counter<u64>,
}

impl FluxMonitorMetrics {
    pub const LABEL: &'static str = "flux_monitor";

    pub fn init(meter: &Meter) -> Self {
        Self {
            seen_round: meter
                .u64_gauge(format!("{}_seen_round", Self::LABEL))
                .with_description("Latest round id seen in a NewRound log")
                .build(),
            seen_value: meter
                .f64_gauge(format!("{}_seen_value", Self::LABEL))
                .with_description("Latest answer produced by the pipeline")
                .build(),
            reported_round: meter
                .u64_gauge(format!("{}_reported_round", Self::LABEL))
                .with_description("Latest round id a submission was queued for")
                .build(),
            reported_value: meter
                .f64_gauge(format!("{}_reported_value", Self::LABEL))
                .with_description("Latest answer a submission was queued with")
                .build(),
            total_submissions: meter
                .u64_counter(format!("{}_total_submissions", Self::LABEL))
                .with_description("Total number of submissions queued")
                .build(),
            total_errors: meter
                .u64_counter(format!("{}_total_errors", Self::LABEL))
                .with_description("Total number of errors recorded against the job")
                .build(),
        }
    }

    /// Instruments backed by the global (no-op unless configured) meter provider
    pub fn noop() -> Self {
        Self::init(&global::meter("flux_monitor_noop"))
    }

    fn labels(job_id: i32) -> [KeyValue; 1] {
        [KeyValue::new("job_id", job_id.to_string())]
    }

    pub fn set_seen_round(&self, job_id: i32, round: u32) {
        self.seen_round.record(round.into(), &Self::labels(job_id));
    }

    pub fn set_seen_value(&self, job_id: i32, value: f64) {
        self.seen_value.record(value, &Self::labels(job_id));
    }

    pub fn record_submission(&self, job_id: i32, round: u32, value: f64) {
        let labels = Self::labels(job_id);
        self.reported_round.record(round.into(), &labels);
        self.reported_value.record(value, &labels);
        self.total_submissions.add(1, &labels);
    }

    pub fn increment_total_errors(&self, job_id: i32) {
        self.total_errors.add(1, &Self::labels(job_id));
    }
}
