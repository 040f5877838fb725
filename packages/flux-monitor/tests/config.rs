use std::{path::Path, str::FromStr, time::Duration};

use alloy_primitives::{Address, U256};
use flux_monitor::{args::CliArgs, config::Config};
use utils::config::{CliEnvExt, ConfigBuilder, ConfigExt};

const CONFIG_TOML: &str = r#"
[default]
log_level = ["info", "flux_monitor=debug"]

[flux-monitor]
ws_endpoint = "ws://localhost:8546"
min_contract_payment = "1000000000000000000"
call_timeout_ms = 2000

[[flux-monitor.jobs]]
job_id = 1
name = "eth-usd"
contract_address = "0x00000000000000000000000000000000000000aa"
flags_contract_address = "0x00000000000000000000000000000000000000ff"
threshold = 0.5
absolute_threshold = 0.01
precision = 8
poll_timer_period_secs = 30
pipeline = { url = "http://localhost:9000/price", path = "/usd", multiply = "100000000" }

[[flux-monitor.jobs]]
job_id = 2
name = "btc-usd"
contract_address = "0x00000000000000000000000000000000000000bb"
threshold = 1.0
drumbeat_enabled = true
drumbeat_schedule = "0 */5 * * * *"
pipeline = { url = "http://localhost:9000/btc" }
"#;

const OVERRIDDEN_VARS: [&str; 3] = ["CALL_TIMEOUT_MS", "LOG_LEVEL", "MIN_CONTRACT_PAYMENT"];

fn env_var(name: &str) -> String {
    format!("{}_{}", CliArgs::ENV_VAR_PREFIX, name)
}

fn write_config(dir: &Path, contents: &str) {
    std::fs::write(dir.join(Config::FILENAME), contents).unwrap();
}

fn cli_args(home: &Path) -> CliArgs {
    CliArgs {
        home: Some(home.to_path_buf()),
        ..Default::default()
    }
}

// every build runs with our vars pinned, so parallel tests can't leak into each other
fn build(args: CliArgs, vars: &[(&str, Option<&str>)]) -> anyhow::Result<Config> {
    let mut pinned: Vec<(String, Option<String>)> = OVERRIDDEN_VARS
        .iter()
        .map(|name| (env_var(name), None))
        .collect();
    for (name, value) in vars {
        let key = env_var(name);
        pinned.retain(|(existing, _)| *existing != key);
        pinned.push((key, value.map(|v| v.to_string())));
    }

    temp_env::with_vars(pinned, || {
        ConfigBuilder::<Config, CliArgs>::new(args).build()
    })
}

#[test]
fn config_file_is_loaded() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), CONFIG_TOML);

    let config = build(cli_args(dir.path()), &[]).unwrap();

    assert_eq!(config.log_level, ["info", "flux_monitor=debug"]);
    assert_eq!(config.ws_endpoint.as_deref(), Some("ws://localhost:8546"));
    assert_eq!(
        config.min_contract_payment,
        U256::from_str("1000000000000000000").unwrap()
    );
    assert_eq!(config.call_timeout(), Duration::from_millis(2000));
    // not in the file
    assert_eq!(config.gas_limit, Config::default().gas_limit);

    assert_eq!(config.jobs.len(), 2);
    let eth = &config.jobs[0];
    assert_eq!(eth.contract_address, Address::repeat_byte(0xaa));
    assert_eq!(eth.flags_contract_address, Some(Address::repeat_byte(0xff)));
    assert_eq!(eth.pipeline.multiply.as_deref(), Some("100000000"));

    let job = eth.to_job(&config).unwrap();
    assert_eq!(job.precision, 8);
    assert_eq!(job.poll_config.poll_ticker_interval, Duration::from_secs(30));
    assert_eq!(job.call_timeout, Duration::from_millis(2000));

    let btc = config.jobs[1].to_job(&config).unwrap();
    assert!(btc.poll_config.drumbeat_enabled);
    assert_eq!(btc.poll_config.idle_timer_period, Duration::from_secs(60 * 60));
}

#[test]
fn env_and_cli_override_the_file() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), CONFIG_TOML);

    let config = build(
        cli_args(dir.path()),
        &[
            ("CALL_TIMEOUT_MS", Some("3000")),
            ("LOG_LEVEL", Some("warn, flux_monitor=trace")),
            ("MIN_CONTRACT_PAYMENT", Some("42")),
        ],
    )
    .unwrap();
    assert_eq!(config.call_timeout_ms, 3000);
    assert_eq!(config.log_level, ["warn", "flux_monitor=trace"]);
    assert_eq!(config.min_contract_payment, U256::from(42));

    // cli beats env
    let args = CliArgs {
        call_timeout_ms: Some(4000),
        ..cli_args(dir.path())
    };
    let config = build(args, &[("CALL_TIMEOUT_MS", Some("3000"))]).unwrap();
    assert_eq!(config.call_timeout_ms, 4000);
}

#[test]
fn defaults_without_a_file() {
    let dir = tempfile::tempdir().unwrap();

    let config = build(cli_args(dir.path()), &[]).unwrap();
    assert_eq!(config.jobs.len(), 0);
    assert_eq!(config.minimum_polling_interval_secs, 15);
    assert!(config.tracing_env_filter().is_ok());
}

#[test]
fn invalid_jobs_fail_the_build() {
    let dir = tempfile::tempdir().unwrap();

    // below the 15s polling floor
    write_config(
        dir.path(),
        &CONFIG_TOML.replace("poll_timer_period_secs = 30", "poll_timer_period_secs = 5"),
    );
    assert!(build(cli_args(dir.path()), &[]).is_err());

    // but the floor itself is configurable
    let args = CliArgs {
        minimum_polling_interval_secs: Some(5),
        ..cli_args(dir.path())
    };
    assert!(build(args, &[]).is_ok());

    write_config(dir.path(), &CONFIG_TOML.replace("job_id = 2", "job_id = 1"));
    assert!(build(cli_args(dir.path()), &[]).is_err());

    write_config(
        dir.path(),
        &CONFIG_TOML.replace("drumbeat_schedule = \"0 */5 * * * *\"", "drumbeat_schedule = \"soon\""),
    );
    assert!(build(cli_args(dir.path()), &[]).is_err());
}

#[test]
fn home_directory_is_tried_first() {
    let args = cli_args(Path::new("/tmp/flux-monitor-home"));
    assert_eq!(
        ConfigBuilder::<Config, CliArgs>::filepaths_to_try(&args).first(),
        Some(&Path::new("/tmp/flux-monitor-home").join(Config::FILENAME))
    );
}
