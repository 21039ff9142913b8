//!
//! A prospector polls the metrics of one group and publishes their events
//!
use crate::config::{GroupConfig, MetricSpec};
use crate::datapoint::pick_latest;
use crate::event::to_event;
use crate::query::build_query;
use crate::sink::EventSink;
use crate::source::MetricSource;
use crate::MetricError;
use std::sync::Arc;

/// A metric that did not produce an event
#[derive(Debug)]
pub struct MetricFailure {
    /// `namespace/metric_name`
    pub metric: String,
    /// Why no event was published
    pub error: MetricError,
}

/// Outcome of one pass over a group
#[derive(Debug, Default)]
pub struct RunReport {
    /// Group id
    pub group: String,
    /// Number of events handed to the sink
    pub published: usize,
    /// Metrics that were skipped
    pub skipped: Vec<MetricFailure>,
}

impl RunReport {
    /// Number of skipped metrics that count as failures, i.e. excluding "no data"
    #[must_use]
    pub fn failures(&self) -> usize {
        self.skipped.iter().filter(|f| f.error.is_failure()).count()
    }
}

/// Polls the metrics of one group
pub struct Prospector {
    id: String,
    metrics: Vec<MetricSpec>,
    source: Arc<dyn MetricSource>,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for Prospector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prospector")
            .field("id", &self.id)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl Prospector {
    /// Create a prospector for `group`, metric defaults are applied here
    #[must_use]
    pub fn new(
        group: GroupConfig,
        source: Arc<dyn MetricSource>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let mut metrics = group.metrics;
        for metric in &mut metrics {
            metric.apply_defaults();
            if metric.dimension_pairs() > 1 {
                tracing::warn!(
                    "{} in group {} selects {} dimension pairs, they are sent in one request and only the first is reported",
                    metric.label(),
                    group.id,
                    metric.dimension_pairs()
                );
            }
        }

        Self {
            id: group.id,
            metrics,
            source,
            sink,
        }
    }

    /// Group id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Metrics, with defaults applied
    #[must_use]
    pub fn metrics(&self) -> &[MetricSpec] {
        &self.metrics
    }

    /// Poll every metric once, in order. A failing metric never stops the others.
    #[tracing::instrument(level = "debug", skip(self), fields(group = %self.id))]
    pub async fn run(&self) -> RunReport {
        let mut report = RunReport {
            group: self.id.clone(),
            ..Default::default()
        };

        for metric in &self.metrics {
            match self.poll(metric).await {
                Ok(()) => report.published += 1,
                Err(error) => {
                    match &error {
                        MetricError::NoData => {
                            tracing::debug!("{}: {}", metric.label(), error);
                        }
                        MetricError::NoStatistics => {
                            tracing::warn!("{}: {}", metric.label(), error);
                        }
                        MetricError::Fetch(_) | MetricError::Publish(_) => {
                            tracing::error!("{}: {}", metric.label(), error);
                        }
                    }
                    report.skipped.push(MetricFailure {
                        metric: metric.label(),
                        error,
                    });
                }
            }
        }

        tracing::info!(
            "group {}: published {}, no data {}, failed {}",
            report.group,
            report.published,
            report.skipped.len() - report.failures(),
            report.failures()
        );
        report
    }

    async fn poll(&self, metric: &MetricSpec) -> Result<(), MetricError> {
        let query = build_query(metric, chrono::Utc::now());

        let points = self
            .source
            .fetch(&query)
            .await
            .map_err(MetricError::Fetch)?;

        let latest = pick_latest(&points).ok_or(MetricError::NoData)?;
        let event = to_event(&self.id, metric, &query.dimensions, latest)?;

        self.sink
            .publish(event)
            .await
            .map_err(MetricError::Publish)
    }
}
