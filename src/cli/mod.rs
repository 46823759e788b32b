pub mod actions;
pub mod commands;
pub mod dispatch;
pub mod telemetry;

use anyhow::Result;

/// Parse arguments, install logging and validate the configuration.
///
/// # Errors
///
/// Returns an error if logging cannot be installed or the configuration is
/// invalid (for example a missing `DATA_SOURCE_NAME`).
pub fn start() -> Result<(actions::Action, telemetry::Telemetry)> {
    let matches = commands::new().get_matches();

    let level = telemetry::level_from_verbosity(matches.get_count("verbosity"));
    let telemetry = telemetry::init(level)?;

    let action = dispatch::handler(&matches)?;

    Ok((action, telemetry))
}
