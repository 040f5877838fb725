use std::{collections::HashSet, str::FromStr, time::Duration};

use alloy_primitives::{Address, U256};
use anyhow::{bail, ensure, Context, Result};
use bigdecimal::BigDecimal;
use flux_types::{JobId, PipelineSpec};
use serde::{Deserialize, Serialize};
use utils::{
    config::ConfigExt,
    serde::{deserialize_optional_u256, deserialize_u256},
};

use crate::{
    checkers::Thresholds,
    flux_monitor::FluxMonitorJob,
    poll_manager::{
        config::{
            DEFAULT_HIBERNATION_POLL_PERIOD, DEFAULT_MAX_RETRY_BACKOFF, DEFAULT_MIN_RETRY_BACKOFF,
        },
        PollManagerConfig,
    },
};

/// The fully parsed and validated config struct we use in the application
/// this is built up from the ConfigBuilder which can load from multiple sources (in order of preference):
///
/// 1. cli args
/// 2. environment variables
/// 3. config file
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// The log-level to use, in the format of [tracing directives](https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/struct.EnvFilter.html#directives).
    /// Default is `["info"]`
    pub log_level: Vec<String>,
    /// OTLP trace collector, tracing goes to stdout only if unset
    pub jaeger: Option<String>,
    /// OTLP metrics collector, metrics are not exported if unset
    pub prometheus: Option<String>,

    pub ws_endpoint: Option<String>,
    pub http_endpoint: Option<String>,
    pub credential: Option<String>,
    pub hd_index: Option<u32>,

    #[serde(deserialize_with = "deserialize_u256")]
    pub min_contract_payment: U256,
    /// Default is `15`
    pub minimum_polling_interval_secs: u64,
    /// Default is `10_000`
    pub call_timeout_ms: u64,
    /// Default is `500_000`
    pub gas_limit: u64,

    pub jobs: Vec<FluxJobConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: vec!["info".to_string()],
            jaeger: None,
            prometheus: None,
            ws_endpoint: None,
            http_endpoint: None,
            credential: None,
            hd_index: None,
            min_contract_payment: U256::ZERO,
            minimum_polling_interval_secs: 15,
            call_timeout_ms: 10_000,
            gas_limit: 500_000,
            jobs: Vec::new(),
        }
    }
}

impl ConfigExt for Config {
    const FILENAME: &'static str = "flux-monitor.toml";

    fn log_levels(&self) -> impl Iterator<Item = &str> {
        self.log_level.iter().map(|s| s.as_str())
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.call_timeout_ms > 0, "call_timeout_ms must be greater than zero");

        let mut job_ids = HashSet::new();
        for job in &self.jobs {
            ensure!(job_ids.insert(job.job_id), "duplicate job id {}", job.job_id);
            job.to_job(self)
                .with_context(|| format!("invalid job {} ({})", job.job_id, job.name))?;
        }

        Ok(())
    }
}

impl Config {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// One aggregator to watch, as written in the config file
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FluxJobConfig {
    pub job_id: JobId,
    pub name: String,
    pub contract_address: Address,
    #[serde(default)]
    pub flags_contract_address: Option<Address>,

    /// Relative deviation threshold, in percent
    #[serde(default)]
    pub threshold: f64,
    /// Absolute deviation threshold, in answer units
    #[serde(default)]
    pub absolute_threshold: f64,
    /// Implied decimal places of the on-chain answer
    #[serde(default)]
    pub precision: u32,
    #[serde(default, deserialize_with = "deserialize_optional_u256")]
    pub min_payment: Option<U256>,

    #[serde(default = "default_poll_timer_period_secs")]
    pub poll_timer_period_secs: u64,
    #[serde(default)]
    pub poll_timer_disabled: bool,
    #[serde(default = "default_idle_timer_period_secs")]
    pub idle_timer_period_secs: u64,
    #[serde(default)]
    pub idle_timer_disabled: bool,

    #[serde(default)]
    pub drumbeat_enabled: bool,
    /// Cron expression with a seconds field, e.g. `0 */5 * * * *`
    #[serde(default)]
    pub drumbeat_schedule: Option<String>,
    #[serde(default)]
    pub drumbeat_random_delay_secs: u64,

    #[serde(default = "default_hibernation_poll_period_secs")]
    pub hibernation_poll_period_secs: u64,
    #[serde(default = "default_min_retry_backoff_secs")]
    pub min_retry_backoff_secs: u64,
    #[serde(default = "default_max_retry_backoff_secs")]
    pub max_retry_backoff_secs: u64,

    pub pipeline: HttpJsonSource,
}

/// Where the answer comes from: a JSON document at `url`, read at `path`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpJsonSource {
    pub url: String,
    /// JSON pointer, e.g. `/data/price`, empty for the whole document
    #[serde(default)]
    pub path: String,
    /// Decimal factor applied to the extracted value
    #[serde(default)]
    pub multiply: Option<String>,
}

impl HttpJsonSource {
    pub fn multiplier(&self) -> Result<Option<BigDecimal>> {
        self.multiply
            .as_deref()
            .map(|multiply| {
                BigDecimal::from_str(multiply)
                    .with_context(|| format!("invalid multiply value: {multiply}"))
            })
            .transpose()
    }
}

fn default_poll_timer_period_secs() -> u64 {
    60
}

fn default_idle_timer_period_secs() -> u64 {
    60 * 60
}

fn default_hibernation_poll_period_secs() -> u64 {
    DEFAULT_HIBERNATION_POLL_PERIOD.as_secs()
}

fn default_min_retry_backoff_secs() -> u64 {
    DEFAULT_MIN_RETRY_BACKOFF.as_secs()
}

fn default_max_retry_backoff_secs() -> u64 {
    DEFAULT_MAX_RETRY_BACKOFF.as_secs()
}

impl FluxJobConfig {
    pub fn poll_config(&self, config: &Config) -> PollManagerConfig {
        PollManagerConfig {
            poll_ticker_interval: Duration::from_secs(self.poll_timer_period_secs),
            poll_ticker_disabled: self.poll_timer_disabled,
            idle_timer_period: Duration::from_secs(self.idle_timer_period_secs),
            idle_timer_disabled: self.idle_timer_disabled,
            hibernation_poll_period: Duration::from_secs(self.hibernation_poll_period_secs),
            min_retry_backoff_duration: Duration::from_secs(self.min_retry_backoff_secs),
            max_retry_backoff_duration: Duration::from_secs(self.max_retry_backoff_secs),
            drumbeat_enabled: self.drumbeat_enabled,
            drumbeat_schedule: self.drumbeat_schedule.clone(),
            drumbeat_random_delay: Duration::from_secs(self.drumbeat_random_delay_secs),
            minimum_polling_interval: Duration::from_secs(config.minimum_polling_interval_secs),
        }
    }

    /// Resolve against the node-wide settings, checking everything that can be checked offline
    pub fn to_job(&self, config: &Config) -> Result<FluxMonitorJob> {
        if self.contract_address == Address::ZERO {
            bail!("contract_address must be set");
        }
        self.pipeline.multiplier()?;

        let thresholds = Thresholds::new(self.threshold, self.absolute_threshold)?;
        let poll_config = self.poll_config(config);
        poll_config.validate()?;

        Ok(FluxMonitorJob {
            job_id: self.job_id,
            name: self.name.clone(),
            pipeline: PipelineSpec {
                job_id: self.job_id,
                job_name: self.name.clone(),
                source: self.pipeline.url.clone(),
            },
            thresholds,
            precision: self.precision,
            min_contract_payment: config.min_contract_payment,
            min_job_payment: self.min_payment,
            poll_config,
            call_timeout: config.call_timeout(),
        })
    }
}
