//!
//! Datapoints returned by the statistics API and their reduction
//!
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Statistic kinds that can be requested for a metric
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Statistic {
    /// Sum of all values in the period
    Sum,
    /// Average value in the period
    Average,
    /// Highest value in the period
    Maximum,
    /// Lowest value in the period
    Minimum,
    /// Number of samples in the period
    SampleCount,
}

impl Statistic {
    /// All statistic kinds, in the order they are projected into events
    pub const ALL: [Self; 5] = [
        Self::Sum,
        Self::Average,
        Self::Maximum,
        Self::Minimum,
        Self::SampleCount,
    ];

    /// Event field suffix
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Average => "avg",
            Self::Maximum => "max",
            Self::Minimum => "min",
            Self::SampleCount => "count",
        }
    }

    /// Name used by the API
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sum => "Sum",
            Self::Average => "Average",
            Self::Maximum => "Maximum",
            Self::Minimum => "Minimum",
            Self::SampleCount => "SampleCount",
        }
    }
}

impl std::fmt::Display for Statistic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single sample. Only the statistics that were requested and have data are set.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Datapoint {
    /// Start of the aggregation period
    pub timestamp: DateTime<Utc>,
    /// Sum
    pub sum: Option<f64>,
    /// Average
    pub average: Option<f64>,
    /// Maximum
    pub maximum: Option<f64>,
    /// Minimum
    pub minimum: Option<f64>,
    /// Sample count
    pub sample_count: Option<f64>,
}

impl Datapoint {
    /// Create a datapoint without any statistic values
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            ..Default::default()
        }
    }

    /// Set a statistic value
    #[must_use]
    pub fn with(mut self, statistic: Statistic, value: f64) -> Self {
        *self.slot(statistic) = Some(value);
        self
    }

    /// Value of one statistic, if present
    #[must_use]
    pub fn get(&self, statistic: Statistic) -> Option<f64> {
        match statistic {
            Statistic::Sum => self.sum,
            Statistic::Average => self.average,
            Statistic::Maximum => self.maximum,
            Statistic::Minimum => self.minimum,
            Statistic::SampleCount => self.sample_count,
        }
    }

    /// Populated statistics, in [`Statistic::ALL`] order
    #[must_use]
    pub fn statistics(&self) -> Vec<(Statistic, f64)> {
        Statistic::ALL
            .into_iter()
            .filter_map(|s| self.get(s).map(|v| (s, v)))
            .collect()
    }

    fn slot(&mut self, statistic: Statistic) -> &mut Option<f64> {
        match statistic {
            Statistic::Sum => &mut self.sum,
            Statistic::Average => &mut self.average,
            Statistic::Maximum => &mut self.maximum,
            Statistic::Minimum => &mut self.minimum,
            Statistic::SampleCount => &mut self.sample_count,
        }
    }
}

/// Pick the datapoint with the latest timestamp, the first one wins on ties.
///
/// Returns `None` for an empty slice, which callers treat as "no data yet".
#[must_use]
pub fn pick_latest(points: &[Datapoint]) -> Option<&Datapoint> {
    points.iter().fold(None, |latest, dp| match latest {
        Some(l) if l.timestamp >= dp.timestamp => Some(l),
        _ => Some(dp),
    })
}
