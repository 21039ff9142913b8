//!
//! Sources of metric statistics
//!
use crate::datapoint::Datapoint;
use crate::query::Query;
use crate::Result;

pub mod http;

/// Fetches datapoints for a query.
///
/// An empty list means there is no data for the window yet. Implementations own
/// their retry policy, callers never retry.
#[async_trait::async_trait]
pub trait MetricSource: Send + Sync {
    /// Fetch the datapoints of `query`
    async fn fetch(&self, query: &Query) -> Result<Vec<Datapoint>>;
}
