pub mod run;

use crate::collectors::config::CollectorConfig;
use secrecy::SecretString;

#[derive(Debug)]
pub enum Action {
    Run {
        listen: String,
        telemetry_path: String,
        dsn: SecretString,
        config: CollectorConfig,
    },
}
