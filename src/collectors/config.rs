use std::time::Duration;

pub const DEFAULT_PREFIX: &str = "db_";
pub const DEFAULT_TABLE_PREFIX: &str = "mdl_";
pub const DEFAULT_SCRAPE_TIMEOUT: Duration = Duration::from_secs(10);

/// Read-only settings for one exporter process, shared by every collection pass.
#[derive(Clone, Debug)]
pub struct CollectorConfig {
    /// Only schemas starting with this prefix are queried (case-sensitive).
    pub prefix: String,
    /// Moodle table prefix; the users table is `<table_prefix>user`.
    pub table_prefix: String,
    pub scrape_timeout: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            table_prefix: DEFAULT_TABLE_PREFIX.to_string(),
            scrape_timeout: DEFAULT_SCRAPE_TIMEOUT,
        }
    }
}

impl CollectorConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    #[must_use]
    pub fn with_table_prefix(mut self, table_prefix: &str) -> Self {
        self.table_prefix = table_prefix.to_string();
        self
    }

    #[must_use]
    pub fn with_scrape_timeout(mut self, timeout: Duration) -> Self {
        self.scrape_timeout = timeout;
        self
    }

    #[must_use]
    pub fn users_table(&self) -> String {
        format!("{}user", self.table_prefix)
    }
}
