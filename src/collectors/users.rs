use crate::collectors::{
    Collector,
    config::CollectorConfig,
    database::{Connector, TenantDatabase},
    util::has_prefix,
};
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use prometheus::core::{Collector as _, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{IntGaugeVec, Opts};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

pub const METRIC_NAME: &str = "moodle_users_total";
pub const METRIC_HELP: &str = "Number of users found in a MoodleDB";
pub const LABEL_DBNAME: &str = "dbname";

/// Active user count of one tenant schema, valid for a single pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserSample {
    pub schema: String,
    pub users: u64,
}

/// Counts non-deleted Moodle users per tenant schema on every scrape.
#[derive(Clone)]
pub struct UsersCollector {
    config: Arc<CollectorConfig>,
    connector: Arc<dyn Connector>,
}

impl UsersCollector {
    #[must_use]
    pub fn new(config: Arc<CollectorConfig>, connector: Arc<dyn Connector>) -> Self {
        Self { config, connector }
    }

    fn opts() -> Opts {
        Opts::new(METRIC_NAME, METRIC_HELP)
    }

    /// Connect, count users in every matching schema, release the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be opened or the schema list
    /// cannot be read. Failures of individual schemas only drop their sample.
    #[instrument(skip(self), level = "info", err, fields(collector = "users", prefix = %self.config.prefix))]
    pub async fn collect_samples(&self) -> Result<Vec<UserSample>> {
        let mut db = self.connector.connect().await?;

        let result = self.collect_from(db.as_mut()).await;

        if let Err(e) = db.close().await {
            debug!(error = %e, "connection was not closed cleanly");
        }

        result
    }

    async fn collect_from(&self, db: &mut dyn TenantDatabase) -> Result<Vec<UserSample>> {
        let schemas = db.list_schemas().await.context("schema enumeration failed")?;

        let matching: Vec<String> = schemas
            .into_iter()
            .filter(|name| has_prefix(name, &self.config.prefix))
            .collect();

        debug!(schemas = matching.len(), "matched tenant schemas");

        let table = self.config.users_table();
        let mut samples = Vec::with_capacity(matching.len());

        for schema in matching {
            match db.count_active_users(&schema, &table).await {
                Ok(users) => samples.push(UserSample { schema, users }),
                Err(e) => {
                    let reason = format!("{e:#}");
                    warn!(schema = %schema, error = %reason, "skipping schema");
                }
            }
        }

        Ok(samples)
    }

    /// Build the `moodle_users_total` family for one pass.
    ///
    /// # Errors
    ///
    /// Returns an error if the gauge cannot be created.
    pub fn families(samples: &[UserSample]) -> Result<Vec<MetricFamily>> {
        let gauge = IntGaugeVec::new(Self::opts(), &[LABEL_DBNAME])?;

        for sample in samples {
            gauge
                .with_label_values(&[sample.schema.as_str()])
                .set(i64::try_from(sample.users).unwrap_or(i64::MAX));
        }

        Ok(gauge.collect())
    }
}

impl Collector for UsersCollector {
    fn name(&self) -> &'static str {
        "users"
    }

    fn describe(&self) -> Result<Vec<Desc>> {
        let desc = Desc::new(
            METRIC_NAME.to_string(),
            METRIC_HELP.to_string(),
            vec![LABEL_DBNAME.to_string()],
            std::collections::HashMap::new(),
        )?;
        Ok(vec![desc])
    }

    fn collect(&self) -> BoxFuture<'_, Result<Vec<MetricFamily>>> {
        Box::pin(async move {
            let samples = self.collect_samples().await?;
            Self::families(&samples)
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use anyhow::anyhow;
    use prometheus::{Encoder, TextEncoder};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory stand-in for the database server.
    #[derive(Clone, Default)]
    pub struct FakeConnector {
        pub refuse: bool,
        pub schemas: Option<Vec<String>>,
        pub counts: HashMap<String, u64>,
        pub opened: Arc<AtomicUsize>,
        pub closed: Arc<AtomicUsize>,
        pub queried: Arc<std::sync::Mutex<Vec<(String, String)>>>,
    }

    impl FakeConnector {
        pub fn with_schemas(schemas: &[&str], counts: &[(&str, u64)]) -> Self {
            Self {
                schemas: Some(schemas.iter().map(ToString::to_string).collect()),
                counts: counts.iter().map(|(k, v)| ((*k).to_string(), *v)).collect(),
                ..Self::default()
            }
        }
    }

    struct FakeDatabase {
        source: FakeConnector,
    }

    impl Connector for FakeConnector {
        fn connect(&self) -> BoxFuture<'_, Result<Box<dyn TenantDatabase>>> {
            Box::pin(async move {
                if self.refuse {
                    return Err(anyhow!("connection refused"));
                }
                self.opened.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(FakeDatabase {
                    source: self.clone(),
                }) as Box<dyn TenantDatabase>)
            })
        }
    }

    impl TenantDatabase for FakeDatabase {
        fn list_schemas(&mut self) -> BoxFuture<'_, Result<Vec<String>>> {
            Box::pin(async move {
                self.source
                    .schemas
                    .clone()
                    .ok_or_else(|| anyhow!("SHOW DATABASES denied"))
            })
        }

        fn count_active_users<'a>(
            &'a mut self,
            schema: &'a str,
            table: &'a str,
        ) -> BoxFuture<'a, Result<u64>> {
            Box::pin(async move {
                if let Ok(mut queried) = self.source.queried.lock() {
                    queried.push((schema.to_string(), table.to_string()));
                }
                self.source
                    .counts
                    .get(schema)
                    .copied()
                    .ok_or_else(|| anyhow!("Table '{schema}.{table}' doesn't exist"))
            })
        }

        fn close(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
            Box::pin(async move {
                self.source.closed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    fn collector(connector: &FakeConnector, prefix: &str) -> UsersCollector {
        let config = CollectorConfig::new().with_prefix(prefix);
        UsersCollector::new(Arc::new(config), Arc::new(connector.clone()))
    }

    #[allow(clippy::expect_used)]
    fn render(families: &[MetricFamily]) -> String {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(families, &mut buffer)
            .expect("encode metrics");
        String::from_utf8(buffer).expect("utf8 metrics")
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_collect_filters_by_prefix() {
        let fake = FakeConnector::with_schemas(
            &["db_alpha", "db_beta", "sys", "information_schema"],
            &[("db_alpha", 12), ("db_beta", 0), ("sys", 99)],
        );

        let samples = collector(&fake, "db_").collect_samples().await.unwrap();

        assert_eq!(
            samples,
            vec![
                UserSample { schema: "db_alpha".into(), users: 12 },
                UserSample { schema: "db_beta".into(), users: 0 },
            ]
        );
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_collect_renders_expected_samples() {
        let fake = FakeConnector::with_schemas(
            &["db_alpha", "db_beta", "sys", "information_schema"],
            &[("db_alpha", 12), ("db_beta", 0)],
        );

        let families = collector(&fake, "db_").collect().await.unwrap();
        let text = render(&families);

        assert!(text.contains("moodle_users_total{dbname=\"db_alpha\"} 12"));
        assert!(text.contains("moodle_users_total{dbname=\"db_beta\"} 0"));
        assert_eq!(text.matches("moodle_users_total{").count(), 2);
        assert!(text.contains("# TYPE moodle_users_total gauge"));
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_schema_shorter_than_prefix_is_ignored() {
        let fake = FakeConnector::with_schemas(&["db"], &[("db", 5)]);

        let samples = collector(&fake, "db_").collect_samples().await.unwrap();

        assert!(samples.is_empty());
        assert!(fake.queried.lock().unwrap().is_empty());
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_failing_schema_is_isolated() {
        // db_beta has no users table
        let fake = FakeConnector::with_schemas(
            &["db_alpha", "db_beta", "db_gamma"],
            &[("db_alpha", 12), ("db_gamma", 3)],
        );

        let samples = collector(&fake, "db_").collect_samples().await.unwrap();

        assert_eq!(
            samples,
            vec![
                UserSample { schema: "db_alpha".into(), users: 12 },
                UserSample { schema: "db_gamma".into(), users: 3 },
            ]
        );
        assert_eq!(fake.queried.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_enumeration_failure_aborts_pass() {
        let fake = FakeConnector::default();

        let result = collector(&fake, "db_").collect_samples().await;

        assert!(result.is_err());
        assert_eq!(fake.closed.load(Ordering::SeqCst), 1, "connection must be released");
    }

    #[tokio::test]
    async fn test_connection_failure_is_an_error() {
        let fake = FakeConnector {
            refuse: true,
            ..FakeConnector::default()
        };

        let result = collector(&fake, "db_").collect_samples().await;

        assert!(result.is_err());
        assert_eq!(fake.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_each_pass_opens_and_releases_one_connection() {
        let fake = FakeConnector::with_schemas(&["db_a"], &[("db_a", 1)]);
        let collector = collector(&fake, "db_");

        collector.collect_samples().await.unwrap();
        collector.collect_samples().await.unwrap();

        assert_eq!(fake.opened.load(Ordering::SeqCst), 2);
        assert_eq!(fake.closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_empty_prefix_matches_everything() {
        let fake = FakeConnector::with_schemas(&["a", "db_b"], &[("a", 1), ("db_b", 2)]);

        let samples = collector(&fake, "").collect_samples().await.unwrap();

        assert_eq!(samples.len(), 2);
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_queries_configured_users_table() {
        let fake = FakeConnector::with_schemas(&["db_a"], &[("db_a", 1)]);
        let config = CollectorConfig::new().with_table_prefix("m_");
        let collector = UsersCollector::new(Arc::new(config), Arc::new(fake.clone()));

        collector.collect_samples().await.unwrap();

        assert_eq!(
            fake.queried.lock().unwrap().as_slice(),
            &[("db_a".to_string(), "m_user".to_string())]
        );
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_passes_do_not_share_samples() {
        let first = FakeConnector::with_schemas(&["db_a", "db_b"], &[("db_a", 1), ("db_b", 2)]);
        let families = collector(&first, "db_").collect().await.unwrap();
        assert!(render(&families).contains("db_b"));

        let second = FakeConnector::with_schemas(&["db_a"], &[("db_a", 1)]);
        let families = collector(&second, "db_").collect().await.unwrap();
        assert!(!render(&families).contains("db_b"));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_describe() {
        let fake = FakeConnector::default();
        let descs = collector(&fake, "db_").describe().unwrap();

        assert_eq!(descs.len(), 1);
        let desc = descs.first().unwrap();
        assert_eq!(desc.fq_name, "moodle_users_total");
        assert_eq!(desc.variable_labels, vec!["dbname".to_string()]);
        assert!(desc.const_label_pairs.is_empty());
    }

    #[test]
    fn test_collector_name() {
        let fake = FakeConnector::default();
        assert_eq!(collector(&fake, "db_").name(), "users");
    }
}
