use anyhow::Result;
use moodledb_exporter::cli::{self, actions::run};

#[tokio::main]
async fn main() -> Result<()> {
    let (action, _telemetry) = cli::start()?;

    run::handle(action).await
}
