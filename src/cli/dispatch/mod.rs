use crate::{
    cli::actions::Action,
    collectors::{
        config::CollectorConfig,
        util::{connect_options_from_dsn, is_valid_table_prefix, redact_dsn},
    },
};
use anyhow::{Context, Result, anyhow, bail};
use clap::ArgMatches;
use secrecy::SecretString;
use std::time::Duration;
use tracing::info;

/// Turn parsed arguments into an [`Action`], validating everything that must
/// hold before the listener is bound.
///
/// # Errors
///
/// Returns an error if `DATA_SOURCE_NAME` is missing, empty or unparseable, or
/// another option is invalid.
pub fn handler(matches: &ArgMatches) -> Result<Action> {
    let dsn = matches
        .get_one::<String>("dsn")
        .map(String::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            anyhow!("DATA_SOURCE_NAME needs to be set in environment (or passed with --dsn).")
        })?;
    let dsn = SecretString::from(dsn.to_string());

    connect_options_from_dsn(&dsn).context("DATA_SOURCE_NAME is not a valid DSN")?;

    let listen = matches
        .get_one::<String>("listen-address")
        .cloned()
        .ok_or_else(|| anyhow!("Listen address is required (--web.listen-address)."))?;

    let telemetry_path = normalize_telemetry_path(
        matches
            .get_one::<String>("telemetry-path")
            .map_or("", String::as_str),
    )?;

    let prefix = matches
        .get_one::<String>("prefix")
        .cloned()
        .unwrap_or_default();

    let table_prefix = matches
        .get_one::<String>("table-prefix")
        .cloned()
        .unwrap_or_default();

    if !is_valid_table_prefix(&table_prefix) {
        bail!("invalid Moodle table prefix '{table_prefix}'");
    }

    let scrape_timeout = matches
        .get_one::<u64>("scrape-timeout")
        .copied()
        .map(Duration::from_secs)
        .ok_or_else(|| anyhow!("Scrape timeout is required (--scrape-timeout)."))?;

    info!(
        dsn = %redact_dsn(&dsn),
        listen = %listen,
        telemetry_path = %telemetry_path,
        prefix = %prefix,
        table_prefix = %table_prefix,
        scrape_timeout_secs = scrape_timeout.as_secs(),
        "configuration loaded"
    );

    Ok(Action::Run {
        listen,
        telemetry_path,
        dsn,
        config: CollectorConfig::new()
            .with_prefix(&prefix)
            .with_table_prefix(&table_prefix)
            .with_scrape_timeout(scrape_timeout),
    })
}

/// Ensure the path is absolute: `metrics` becomes `/metrics`, empty becomes `/`.
///
/// The path is served literally, so route captures (`{name}`) and the legacy
/// `:name`/`*name` segment syntax the router refuses are rejected.
///
/// # Errors
///
/// Returns an error if the path holds braces or a segment starting with `:` or `*`.
pub fn normalize_telemetry_path(path: &str) -> Result<String> {
    let path = path.trim();

    if path.contains(['{', '}']) {
        bail!("invalid telemetry path '{path}': braces are not allowed");
    }

    if path
        .split('/')
        .any(|segment| segment.starts_with(':') || segment.starts_with('*'))
    {
        bail!("invalid telemetry path '{path}': segments cannot start with ':' or '*'");
    }

    if path.starts_with('/') {
        Ok(path.to_string())
    } else {
        Ok(format!("/{path}"))
    }
}
