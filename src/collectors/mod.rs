use anyhow::Result;
use futures::future::BoxFuture;
use prometheus::core::Desc;
use prometheus::proto::MetricFamily;

pub trait Collector {
    fn name(&self) -> &'static str;

    /// Static description of the metrics this collector emits.
    ///
    /// # Errors
    ///
    /// Returns an error if a metric descriptor is invalid.
    fn describe(&self) -> Result<Vec<Desc>>;

    /// Run one collection pass and return freshly built metric families.
    ///
    /// An `Err` means the whole pass was aborted; partial failures are absorbed
    /// by the collector and reported through logs.
    fn collect(&self) -> BoxFuture<'_, Result<Vec<MetricFamily>>>;
}

pub mod config;
pub mod database;
pub mod registry;
pub mod scraper;
pub mod users;
pub mod util;
