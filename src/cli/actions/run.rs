use crate::cli::actions::Action;
use crate::exporter::new;
use anyhow::Result;

/// Handle the run action
///
/// # Errors
///
/// Returns an error if the exporter fails to start
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Run {
            listen,
            telemetry_path,
            dsn,
            config,
        } => {
            new(&listen, &telemetry_path, &dsn, config).await?;
        }
    }

    Ok(())
}
