//!
//! Flat events built from datapoints
//!
use crate::config::MetricSpec;
use crate::datapoint::Datapoint;
use crate::naming::to_snake_case;
use crate::query::Dimension;
use crate::MetricError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Event timestamp field
pub const TIMESTAMP: &str = "@timestamp";
/// Prospector group id field
pub const GROUP_ID: &str = "group_id";
/// Metric namespace field
pub const NAMESPACE: &str = "namespace";
/// Snake cased name of the resource dimension
pub const RESOURCE_DIMENSION: &str = "resource_dimension";
/// Value of the resource dimension
pub const RESOURCE_VALUE: &str = "resource_value";

/// Value of an event field
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Text
    String(String),
    /// Number
    Number(f64),
    /// Absolute instant, serialized as RFC 3339
    Timestamp(DateTime<Utc>),
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(ts: DateTime<Utc>) -> Self {
        Self::Timestamp(ts)
    }
}

/// A flat event, field names are lowercase with underscores
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Event {
    fields: BTreeMap<String, FieldValue>,
}

impl Event {
    /// Set a field
    pub fn insert<V: Into<FieldValue>>(&mut self, name: &str, value: V) {
        let _ = self.fields.insert(name.to_string(), value.into());
    }

    /// Get a field
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Number of fields
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// `true` if the event has no fields
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate over the fields in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Event timestamp
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self.get(TIMESTAMP) {
            Some(FieldValue::Timestamp(ts)) => Some(*ts),
            _ => None,
        }
    }
}

/// Map the chosen datapoint of `spec` into an event.
///
/// Only the first dimension pair is reported as the resource.
pub fn to_event(
    group_id: &str,
    spec: &MetricSpec,
    dimensions: &[Dimension],
    dp: &Datapoint,
) -> Result<Event, MetricError> {
    let statistics = dp.statistics();
    if statistics.is_empty() {
        return Err(MetricError::NoStatistics);
    }

    let mut event = Event::default();
    event.insert(TIMESTAMP, dp.timestamp);
    event.insert(GROUP_ID, group_id);
    event.insert(NAMESPACE, spec.namespace.as_str());

    if let Some(resource) = dimensions.first() {
        event.insert(RESOURCE_DIMENSION, to_snake_case(&resource.name));
        event.insert(RESOURCE_VALUE, resource.value.as_str());
    }

    let metric = to_snake_case(&spec.metric_name);
    for (statistic, value) in statistics {
        event.insert(&format!("{}.{}", metric, statistic.suffix()), value);
    }

    Ok(event)
}
