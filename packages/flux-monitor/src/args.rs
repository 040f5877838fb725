use alloy_primitives::U256;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use utils::{
    config::CliEnvExt,
    serde::{deserialize_optional_u256, deserialize_vec_string},
};

/// This struct is used for both args and environment variables
/// the basic idea is that every env var can be overriden by a cli arg
/// and these override the config file
/// env vars follow the pattern of FLUX_MONITOR_{UPPERCASE_ARG_NAME}
#[derive(Debug, Parser, Serialize, Deserialize, Default)]
#[command(version, about, long_about = None)]
#[serde(default)]
pub struct CliArgs {
    /// The home directory of the application, where the flux-monitor.toml configuration file is stored
    /// if not provided here or in an env var, a series of default directories will be tried
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home: Option<PathBuf>,

    /// The path to an optional dotenv file to try and load
    /// if not set, will be the current working directory's .env
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dotenv: Option<PathBuf>,

    /// Log level in the format of comma-separated tracing directives.
    #[arg(long, value_delimiter = ',')]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(deserialize_with = "deserialize_vec_string")]
    pub log_level: Vec<String>,

    /// OTLP collector for traces, e.g. http://localhost:4317
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jaeger: Option<String>,

    /// OTLP collector for metrics, e.g. http://localhost:9090
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prometheus: Option<String>,

    /// Websocket endpoint, needed to watch contract logs
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws_endpoint: Option<String>,

    /// Http endpoint, used for sending transactions if set
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_endpoint: Option<String>,

    /// mnemonic or 0x-prefixed private key of the oracle (usually leave this as None and override in env)
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,

    /// HD index to derive from the mnemonic
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hd_index: Option<u32>,

    /// Node-wide minimum payment per round, in the aggregator's token base units
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(deserialize_with = "deserialize_optional_u256")]
    pub min_contract_payment: Option<U256>,

    /// Smallest poll interval a job may configure
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum_polling_interval_secs: Option<u64>,

    /// Timeout for every contract read and pipeline run
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_timeout_ms: Option<u64>,

    /// Gas limit for submit transactions
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<u64>,
}

impl CliEnvExt for CliArgs {
    const ENV_VAR_PREFIX: &'static str = "FLUX_MONITOR";
    const TOML_IDENTIFIER: &'static str = "flux-monitor";
    const DIRNAME: &'static str = "flux-monitor";

    fn home_dir(&self) -> Option<PathBuf> {
        self.home.clone()
    }

    fn dotenv_path(&self) -> Option<PathBuf> {
        self.dotenv.clone()
    }
}
