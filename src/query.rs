//!
//! Query parameters for the statistics API
//!
use crate::config::MetricSpec;
use crate::datapoint::Statistic;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Time window of a query, `end = now - delay` and `start = end - range`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct QueryWindow {
    /// Start of the window
    pub start: DateTime<Utc>,
    /// End of the window
    pub end: DateTime<Utc>,
}

impl QueryWindow {
    /// Compute the window ending `delay_seconds` before `now`
    #[must_use]
    pub fn ending_before(now: DateTime<Utc>, delay_seconds: u32, range_seconds: u32) -> Self {
        let end = now - Duration::seconds(i64::from(delay_seconds));
        let start = end - Duration::seconds(i64::from(range_seconds));
        Self { start, end }
    }
}

/// One dimension filter
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Dimension {
    /// Dimension name, e.g. `InstanceId`
    pub name: String,
    /// Dimension value
    pub value: String,
}

/// Fully resolved statistics request
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    /// Metric namespace
    pub namespace: String,
    /// Metric name
    pub metric_name: String,
    /// Time window
    pub window: QueryWindow,
    /// Granularity in seconds
    pub period_seconds: u32,
    /// Requested statistics
    pub statistics: Vec<Statistic>,
    /// Dimension filters
    pub dimensions: Vec<Dimension>,
}

/// Expand a dimension selection into name/value pairs, one per selected value.
#[must_use]
pub fn expand_dimensions(spec: &MetricSpec) -> Vec<Dimension> {
    spec.dimension_select
        .iter()
        .flat_map(|(name, values)| {
            values.iter().map(move |value| Dimension {
                name: name.clone(),
                value: value.clone(),
            })
        })
        .collect()
}

/// Build the request for `spec` as of `now`, resolving unset fields to their defaults.
///
/// All dimension pairs are carried in a single request.
#[must_use]
pub fn build_query(spec: &MetricSpec, now: DateTime<Utc>) -> Query {
    Query {
        namespace: spec.namespace.clone(),
        metric_name: spec.metric_name.clone(),
        window: QueryWindow::ending_before(now, spec.delay(), spec.range()),
        period_seconds: spec.granularity(),
        statistics: spec.requested_statistics(),
        dimensions: expand_dimensions(spec),
    }
}
