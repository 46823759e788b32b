use crate::collectors::{
    Collector, config::CollectorConfig, database::Connector, scraper::ScraperCollector,
    users::UsersCollector,
};
use anyhow::Result;
use prometheus::core::Collector as _;
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info_span, instrument};
use tracing_futures::Instrument as _;

/// Renders one scrape: runs every collector pass and merges the result with
/// the exporter's own metrics.
pub struct CollectorRegistry {
    registry: Registry,
    collectors: Vec<Arc<dyn Collector + Send + Sync>>,
    scraper: ScraperCollector,
    scrape_timeout: Duration,
}

impl CollectorRegistry {
    /// Registry with the users collector backed by `connector`.
    ///
    /// # Errors
    ///
    /// Returns an error if a metric fails to register.
    pub fn new(config: &Arc<CollectorConfig>, connector: Arc<dyn Connector>) -> Result<Self> {
        let users = UsersCollector::new(Arc::clone(config), connector);
        Self::with_collectors(vec![Arc::new(users)], config.scrape_timeout)
    }

    /// # Errors
    ///
    /// Returns an error if a metric fails to register or a collector has an
    /// invalid description.
    pub fn with_collectors(
        collectors: Vec<Arc<dyn Collector + Send + Sync>>,
        scrape_timeout: Duration,
    ) -> Result<Self> {
        let registry = Registry::new();

        let scraper = ScraperCollector::new();
        scraper.register(&registry)?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        for collector in &collectors {
            for desc in collector.describe()? {
                debug!(
                    collector = collector.name(),
                    metric = %desc.fq_name,
                    labels = ?desc.variable_labels,
                    "described metric"
                );
            }
        }

        Ok(Self {
            registry,
            collectors,
            scraper,
            scrape_timeout,
        })
    }

    fn up_family(up: bool) -> Result<Vec<MetricFamily>> {
        let gauge = IntGauge::with_opts(Opts::new(
            "moodledb_up",
            "Whether the last collection pass reached the database (1) or was aborted (0)",
        ))?;
        gauge.set(i64::from(up));
        Ok(gauge.collect())
    }

    /// Run one pass of every collector and encode everything in the text
    /// exposition format. Collector failures never fail the scrape; they show
    /// up as `moodledb_up 0` and missing series.
    ///
    /// # Errors
    ///
    /// Returns an error only if the metrics cannot be encoded.
    #[instrument(skip(self), level = "info", err, fields(otel.kind = "internal"))]
    pub async fn collect_all(&self) -> Result<String> {
        self.scraper.increment_scrapes();

        let mut families = Vec::new();
        let mut up = true;

        for collector in &self.collectors {
            let name = collector.name();
            let timer = self.scraper.start_scrape(name);
            let span = info_span!("collector.collect", collector = %name, otel.kind = "internal");

            match timeout(self.scrape_timeout, collector.collect().instrument(span)).await {
                Ok(Ok(collected)) => {
                    timer.success();
                    families.extend(collected);
                }
                Ok(Err(e)) => {
                    timer.error();
                    up = false;
                    let reason = format!("{e:#}");
                    error!(collector = name, error = %reason, "collection pass aborted");
                }
                Err(_) => {
                    timer.error();
                    up = false;
                    error!(
                        collector = name,
                        timeout_secs = self.scrape_timeout.as_secs_f64(),
                        "collection pass timed out"
                    );
                }
            }
        }

        families.extend(Self::up_family(up)?);
        families.extend(self.registry.gather());

        families.retain(|mf| !mf.get_metric().is_empty());

        // +1 for moodledb_exporter_metrics_total itself
        self.scraper
            .update_metrics_count(i64::try_from(families.len() + 1).unwrap_or(i64::MAX));
        families.extend(self.scraper.metrics_count_family());

        families.sort_by(|a, b| a.name().cmp(b.name()));

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;

        Ok(String::from_utf8(buffer)?)
    }
}
