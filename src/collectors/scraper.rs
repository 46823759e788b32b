use anyhow::Result;
use prometheus::core::Collector as _;
use prometheus::proto::MetricFamily;
use prometheus::{CounterVec, GaugeVec, HistogramOpts, HistogramVec, IntGauge, Opts, Registry};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Exporter self-monitoring: how long passes take and whether they succeed.
#[derive(Clone)]
pub struct ScraperCollector {
    scrape_duration_seconds: HistogramVec,
    scrape_errors_total: CounterVec,
    last_scrape_timestamp: GaugeVec,
    last_scrape_success: GaugeVec,
    metrics_total: IntGauge,
    scrapes_total: IntGauge,
}

impl Default for ScraperCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl ScraperCollector {
    #[must_use]
    #[allow(clippy::expect_used)]
    ///
    /// # Panics
    ///
    /// Panics if metric creation fails.
    pub fn new() -> Self {
        let scrape_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "moodledb_exporter_collector_scrape_duration_seconds",
                "Time spent in one collection pass per collector in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["collector"],
        )
        .expect("moodledb_exporter_collector_scrape_duration_seconds");

        let scrape_errors_total = CounterVec::new(
            Opts::new(
                "moodledb_exporter_collector_scrape_errors_total",
                "Total number of aborted collection passes per collector",
            ),
            &["collector"],
        )
        .expect("moodledb_exporter_collector_scrape_errors_total");

        let last_scrape_timestamp = GaugeVec::new(
            Opts::new(
                "moodledb_exporter_collector_last_scrape_timestamp_seconds",
                "Unix timestamp of the last collection pass per collector",
            ),
            &["collector"],
        )
        .expect("moodledb_exporter_collector_last_scrape_timestamp_seconds");

        let last_scrape_success = GaugeVec::new(
            Opts::new(
                "moodledb_exporter_collector_last_scrape_success",
                "Whether the last collection pass succeeded (1=success, 0=failure)",
            ),
            &["collector"],
        )
        .expect("moodledb_exporter_collector_last_scrape_success");

        let metrics_total = IntGauge::with_opts(Opts::new(
            "moodledb_exporter_metrics_total",
            "Number of metric families rendered by the last scrape",
        ))
        .expect("moodledb_exporter_metrics_total");

        let scrapes_total = IntGauge::with_opts(Opts::new(
            "moodledb_exporter_scrapes_total",
            "Total number of scrapes served since start",
        ))
        .expect("moodledb_exporter_scrapes_total");

        Self {
            scrape_duration_seconds,
            scrape_errors_total,
            last_scrape_timestamp,
            last_scrape_success,
            metrics_total,
            scrapes_total,
        }
    }

    #[must_use]
    pub fn start_scrape(&self, collector_name: &str) -> ScrapeTimer {
        ScrapeTimer {
            collector_name: collector_name.to_string(),
            start: Instant::now(),
            scraper: self.clone(),
            finished: false,
        }
    }

    pub fn update_metrics_count(&self, count: i64) {
        self.metrics_total.set(count);
    }

    /// `moodledb_exporter_metrics_total` is not registered; it is rendered
    /// after the rest of the scrape so it can count itself.
    #[must_use]
    pub fn metrics_count_family(&self) -> Vec<MetricFamily> {
        self.metrics_total.collect()
    }

    pub fn increment_scrapes(&self) {
        self.scrapes_total.inc();
    }

    fn record_success(&self, collector_name: &str, duration: f64) {
        self.scrape_duration_seconds
            .with_label_values(&[collector_name])
            .observe(duration);

        self.last_scrape_timestamp
            .with_label_values(&[collector_name])
            .set(unix_now());

        self.last_scrape_success
            .with_label_values(&[collector_name])
            .set(1.0);
    }

    fn record_error(&self, collector_name: &str, duration: f64) {
        self.scrape_duration_seconds
            .with_label_values(&[collector_name])
            .observe(duration);

        self.scrape_errors_total
            .with_label_values(&[collector_name])
            .inc();

        self.last_scrape_timestamp
            .with_label_values(&[collector_name])
            .set(unix_now());

        self.last_scrape_success
            .with_label_values(&[collector_name])
            .set(0.0);
    }

    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails.
    pub fn register(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.scrape_duration_seconds.clone()))?;
        registry.register(Box::new(self.scrape_errors_total.clone()))?;
        registry.register(Box::new(self.last_scrape_timestamp.clone()))?;
        registry.register(Box::new(self.last_scrape_success.clone()))?;
        registry.register(Box::new(self.scrapes_total.clone()))?;
        Ok(())
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Times one collector pass. A timer dropped without an outcome (the pass
/// future was cancelled) counts as an error.
pub struct ScrapeTimer {
    collector_name: String,
    start: Instant,
    scraper: ScraperCollector,
    finished: bool,
}

impl ScrapeTimer {
    pub fn success(mut self) {
        self.finished = true;
        let duration = self.start.elapsed().as_secs_f64();
        self.scraper.record_success(&self.collector_name, duration);
    }

    pub fn error(mut self) {
        self.finished = true;
        let duration = self.start.elapsed().as_secs_f64();
        self.scraper.record_error(&self.collector_name, duration);
    }
}

impl Drop for ScrapeTimer {
    fn drop(&mut self) {
        if !self.finished {
            let duration = self.start.elapsed().as_secs_f64();
            self.scraper.record_error(&self.collector_name, duration);
        }
    }
}
