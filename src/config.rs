//!
//! Collector configuration
//!
use crate::datapoint::Statistic;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

/// Default aggregation period for datapoints
pub const DEFAULT_PERIOD_SECONDS: u32 = 60;
/// Default delay from now, upstream data takes a while to settle
pub const DEFAULT_DELAY_SECONDS: u32 = 300;
/// Default length of the query window
pub const DEFAULT_RANGE_SECONDS: u32 = 600;
/// Statistic requested when none is configured
pub const DEFAULT_STATISTIC: Statistic = Statistic::Average;
/// Default polling interval
pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_secs(60);
/// Default region
pub const DEFAULT_REGION: &str = "us-east-1";

/// Configuration errors, these prevent the collector from starting
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No prospector groups
    #[error("no groups configured")]
    NoGroups,

    /// A group without an id
    #[error("group id must not be empty")]
    EmptyGroupId,

    /// Two groups share an id
    #[error("duplicate group id '{0}'")]
    DuplicateGroupId(String),

    /// A group without metrics
    #[error("group '{0}' has no metrics")]
    NoMetrics(String),

    /// A required metric field is empty
    #[error("group '{group}': metric {field} must not be empty")]
    EmptyField {
        /// Group id
        group: String,
        /// Field name
        field: &'static str,
    },

    /// The same statistic is requested twice
    #[error("metric '{metric}': statistic {statistic} requested twice")]
    DuplicateStatistic {
        /// Metric label
        metric: String,
        /// Repeated statistic
        statistic: Statistic,
    },

    /// No dimension selected, events need a resource dimension
    #[error("metric '{0}' selects no dimension")]
    NoDimensions(String),

    /// A dimension name without values
    #[error("metric '{metric}': dimension '{dimension}' has no values")]
    EmptyDimension {
        /// Metric label
        metric: String,
        /// Dimension name
        dimension: String,
    },

    /// The API only accepts 1, 5, 10, 30 or multiples of 60
    #[error("metric '{metric}': period of {seconds}s must be 1, 5, 10, 30 or a multiple of 60")]
    InvalidGranularity {
        /// Metric label
        metric: String,
        /// Configured period
        seconds: u32,
    },

    /// Unsupported configuration file
    #[error("unsupported configuration format '{0}', expected .json, .yml or .yaml")]
    UnknownFormat(String),

    /// Unparsable polling period
    #[error("invalid period '{0}'")]
    InvalidPeriod(String),
}

/// Polling interval, zero means run once.
///
/// Deserialized from integer seconds or from `"<n>s"`, `"<n>m"` and `"<n>h"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Period(Duration);

impl Period {
    /// Create a period
    #[must_use]
    pub const fn new(duration: Duration) -> Self {
        Self(duration)
    }

    /// Interval between polls
    #[must_use]
    pub const fn as_duration(self) -> Duration {
        self.0
    }

    /// A positive period polls repeatedly, zero polls once
    #[must_use]
    pub fn is_repeating(self) -> bool {
        !self.0.is_zero()
    }
}

impl Default for Period {
    fn default() -> Self {
        Self(DEFAULT_POLL_PERIOD)
    }
}

impl std::str::FromStr for Period {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || ConfigError::InvalidPeriod(s.to_string());

        let (digits, unit) = match s.char_indices().last() {
            Some((i, 's')) => (&s[..i], 1),
            Some((i, 'm')) => (&s[..i], 60),
            Some((i, 'h')) => (&s[..i], 3600),
            Some(_) => (s, 1),
            None => return Err(invalid()),
        };

        let value: u64 = digits.trim().parse().map_err(|_e| invalid())?;
        value
            .checked_mul(unit)
            .map(|secs| Self(Duration::from_secs(secs)))
            .ok_or_else(invalid)
    }
}

impl serde::ser::Serialize for Period {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(&format!("{}s", self.0.as_secs()))
    }
}

impl<'de> serde::de::Deserialize<'de> for Period {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::de::Deserializer<'de>,
    {
        struct PeriodVisitor;

        impl<'de> serde::de::Visitor<'de> for PeriodVisitor {
            type Value = Period;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("seconds or a duration such as \"30s\", \"5m\" or \"1h\"")
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> std::result::Result<Period, E> {
                Ok(Period(Duration::from_secs(v)))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> std::result::Result<Period, E> {
                u64::try_from(v)
                    .map(|v| Period(Duration::from_secs(v)))
                    .map_err(|_e| E::custom(format!("negative period {v}")))
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> std::result::Result<Period, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(PeriodVisitor)
    }
}

/// One monitored metric
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSpec {
    /// Metric namespace, e.g. `AWS/EC2`
    pub namespace: String,
    /// Metric name, e.g. `CPUUtilization`
    pub metric_name: String,
    /// Requested statistics
    #[serde(default)]
    pub statistics: Vec<Statistic>,
    /// Dimension name to selected values
    #[serde(default)]
    pub dimension_select: BTreeMap<String, Vec<String>>,
    /// Granularity of the returned datapoints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_seconds: Option<u32>,
    /// Offset from now to the end of the query window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_seconds: Option<u32>,
    /// Length of the query window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_seconds: Option<u32>,
}

fn positive_or(value: Option<u32>, default: u32) -> u32 {
    value.filter(|v| *v > 0).unwrap_or(default)
}

impl MetricSpec {
    /// Create a metric with all optional fields unset
    #[must_use]
    pub fn new(namespace: &str, metric_name: &str) -> Self {
        Self {
            namespace: namespace.into(),
            metric_name: metric_name.into(),
            statistics: Vec::new(),
            dimension_select: BTreeMap::new(),
            period_seconds: None,
            delay_seconds: None,
            range_seconds: None,
        }
    }

    /// Request a statistic
    #[must_use]
    pub fn statistic(mut self, statistic: Statistic) -> Self {
        self.statistics.push(statistic);
        self
    }

    /// Select a dimension value
    #[must_use]
    pub fn dimension(mut self, name: &str, value: &str) -> Self {
        self.dimension_select
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    /// Set the datapoint granularity
    #[must_use]
    pub fn period_seconds(self, seconds: u32) -> Self {
        Self {
            period_seconds: Some(seconds),
            ..self
        }
    }

    /// Set the delay from now
    #[must_use]
    pub fn delay_seconds(self, seconds: u32) -> Self {
        Self {
            delay_seconds: Some(seconds),
            ..self
        }
    }

    /// Set the query window length
    #[must_use]
    pub fn range_seconds(self, seconds: u32) -> Self {
        Self {
            range_seconds: Some(seconds),
            ..self
        }
    }

    /// Fill unset (or zero) fields with their defaults. Applying it again is a no-op.
    pub fn apply_defaults(&mut self) {
        self.period_seconds = Some(self.granularity());
        self.delay_seconds = Some(self.delay());
        self.range_seconds = Some(self.range());
        if self.statistics.is_empty() {
            self.statistics.push(DEFAULT_STATISTIC);
        }
    }

    /// Datapoint granularity in seconds, defaulted
    #[must_use]
    pub fn granularity(&self) -> u32 {
        positive_or(self.period_seconds, DEFAULT_PERIOD_SECONDS)
    }

    /// Delay from now in seconds, defaulted
    #[must_use]
    pub fn delay(&self) -> u32 {
        positive_or(self.delay_seconds, DEFAULT_DELAY_SECONDS)
    }

    /// Query window length in seconds, defaulted
    #[must_use]
    pub fn range(&self) -> u32 {
        positive_or(self.range_seconds, DEFAULT_RANGE_SECONDS)
    }

    /// Requested statistics, defaulted
    #[must_use]
    pub fn requested_statistics(&self) -> Vec<Statistic> {
        if self.statistics.is_empty() {
            vec![DEFAULT_STATISTIC]
        } else {
            self.statistics.clone()
        }
    }

    /// `namespace/metric_name`, used in logs
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}/{}", self.namespace, self.metric_name)
    }

    /// Number of dimension pairs the selection expands to
    #[must_use]
    pub fn dimension_pairs(&self) -> usize {
        self.dimension_select.values().map(Vec::len).sum()
    }

    fn validate(&self, group: &str) -> std::result::Result<(), ConfigError> {
        if self.namespace.trim().is_empty() {
            return Err(ConfigError::EmptyField {
                group: group.into(),
                field: "namespace",
            });
        }
        if self.metric_name.trim().is_empty() {
            return Err(ConfigError::EmptyField {
                group: group.into(),
                field: "metricName",
            });
        }

        let mut seen = HashSet::new();
        if let Some(statistic) = self.statistics.iter().find(|s| !seen.insert(**s)) {
            return Err(ConfigError::DuplicateStatistic {
                metric: self.label(),
                statistic: *statistic,
            });
        }

        if self.dimension_select.is_empty() {
            return Err(ConfigError::NoDimensions(self.label()));
        }
        if let Some((dimension, _)) = self.dimension_select.iter().find(|(_, v)| v.is_empty()) {
            return Err(ConfigError::EmptyDimension {
                metric: self.label(),
                dimension: dimension.clone(),
            });
        }

        let seconds = self.granularity();
        if !matches!(seconds, 1 | 5 | 10 | 30) && seconds % 60 != 0 {
            return Err(ConfigError::InvalidGranularity {
                metric: self.label(),
                seconds,
            });
        }

        Ok(())
    }
}

/// A named set of metrics sharing a correlation id in events
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct GroupConfig {
    /// Group id, unique among groups
    pub id: String,
    /// Metrics, evaluated in order
    pub metrics: Vec<MetricSpec>,
}

/// Top level configuration
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Polling interval, zero polls once and exits
    #[serde(default)]
    pub period: Period,
    /// API region
    #[serde(default = "default_region")]
    pub region: String,
    /// API endpoint override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Prospector groups
    #[serde(alias = "prospectors")]
    pub groups: Vec<GroupConfig>,
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

impl Config {
    /// Parse and validate a JSON configuration
    pub fn from_json(data: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a YAML configuration
    pub fn from_yaml(data: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file, the format is picked from the extension
    #[tracing::instrument]
    pub async fn from_path<P: AsRef<std::path::Path> + std::fmt::Debug>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(std::ffi::OsStr::to_str)
            .unwrap_or_default()
            .to_ascii_lowercase();

        let data = tokio::fs::read_to_string(path).await?;
        let config = match ext.as_str() {
            "json" => Self::from_json(&data),
            "yml" | "yaml" => Self::from_yaml(&data),
            _ => Err(ConfigError::UnknownFormat(path.display().to_string()).into()),
        }?;

        tracing::info!(
            "Loaded {} groups from {}, period {:?}",
            config.groups.len(),
            path.display(),
            config.period.as_duration()
        );
        Ok(config)
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.groups.is_empty() {
            return Err(ConfigError::NoGroups);
        }

        let mut ids = HashSet::new();
        for group in &self.groups {
            if group.id.trim().is_empty() {
                return Err(ConfigError::EmptyGroupId);
            }
            if !ids.insert(group.id.as_str()) {
                return Err(ConfigError::DuplicateGroupId(group.id.clone()));
            }
            if group.metrics.is_empty() {
                return Err(ConfigError::NoMetrics(group.id.clone()));
            }
            for metric in &group.metrics {
                metric.validate(&group.id)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::{Config, ConfigError, MetricSpec, Period};
    use crate::datapoint::Statistic;
    use std::time::Duration;

    const YAML: &str = r"
period: 5m
region: eu-west-1
prospectors:
  - id: web
    metrics:
      - namespace: AWS/EC2
        metricName: CPUUtilization
        statistics: [Average, Maximum]
        dimensionSelect:
          InstanceId: [i-123, i-456]
        periodSeconds: 300
  - id: lb
    metrics:
      - namespace: AWS/ELB
        metricName: RequestCount
        dimensionSelect:
          LoadBalancerName: [front]
";

    fn metric() -> MetricSpec {
        MetricSpec::new("AWS/EC2", "CPUUtilization").dimension("InstanceId", "i-123")
    }

    fn config_with(metric: MetricSpec) -> Config {
        Config {
            period: Period::default(),
            region: "us-east-1".into(),
            endpoint: None,
            groups: vec![super::GroupConfig {
                id: "web".into(),
                metrics: vec![metric],
            }],
        }
    }

    #[test]
    fn yaml() {
        let config = Config::from_yaml(YAML).unwrap();
        assert_eq!(config.period.as_duration(), Duration::from_secs(300));
        assert_eq!(&config.region, "eu-west-1");
        assert_eq!(config.groups.len(), 2);

        let web = &config.groups[0].metrics[0];
        assert_eq!(web.statistics, vec![Statistic::Average, Statistic::Maximum]);
        assert_eq!(web.dimension_select["InstanceId"], vec!["i-123", "i-456"]);
        assert_eq!(web.granularity(), 300);
        assert_eq!(web.delay(), 300);
        assert_eq!(web.range(), 600);

        let lb = &config.groups[1].metrics[0];
        assert!(lb.statistics.is_empty());
        assert_eq!(lb.requested_statistics(), vec![Statistic::Average]);
    }

    #[test]
    fn json_defaults() {
        let config = Config::from_json(
            r#"{"groups":[{"id":"web","metrics":[{"namespace":"AWS/EC2","metricName":"CPUUtilization","dimensionSelect":{"InstanceId":["i-123"]}}]}]}"#,
        )
        .unwrap();
        assert_eq!(config.period, Period::default());
        assert_eq!(&config.region, "us-east-1");
        assert!(config.endpoint.is_none());
    }

    #[test]
    fn period() {
        assert_eq!("30s".parse::<Period>().unwrap().as_duration().as_secs(), 30);
        assert_eq!("2m".parse::<Period>().unwrap().as_duration().as_secs(), 120);
        assert_eq!("1h".parse::<Period>().unwrap().as_duration().as_secs(), 3600);
        assert_eq!("45".parse::<Period>().unwrap().as_duration().as_secs(), 45);
        assert!("".parse::<Period>().is_err());
        assert!("5d".parse::<Period>().is_err());
        assert!("m".parse::<Period>().is_err());

        let zero: Period = serde_json::from_str("0").unwrap();
        assert!(!zero.is_repeating());
        let repeating: Period = serde_json::from_str(r#""10s""#).unwrap();
        assert!(repeating.is_repeating());
        assert!(serde_json::from_str::<Period>("-5").is_err());

        assert_eq!(serde_json::to_string(&repeating).unwrap(), r#""10s""#);
    }

    #[test]
    fn defaults_idempotent() {
        let mut once = MetricSpec::new("AWS/EC2", "CPUUtilization").delay_seconds(0);
        once.apply_defaults();
        let mut twice = once.clone();
        twice.apply_defaults();
        assert_eq!(once, twice);

        assert_eq!(once.period_seconds, Some(60));
        assert_eq!(once.delay_seconds, Some(300));
        assert_eq!(once.range_seconds, Some(600));
        assert_eq!(once.statistics, vec![Statistic::Average]);

        let mut custom = metric()
            .statistic(Statistic::Sum)
            .period_seconds(120)
            .range_seconds(3600);
        custom.apply_defaults();
        assert_eq!(custom.period_seconds, Some(120));
        assert_eq!(custom.range_seconds, Some(3600));
        assert_eq!(custom.statistics, vec![Statistic::Sum]);
    }

    #[test]
    fn validation() {
        assert!(config_with(metric()).validate().is_ok());

        let mut config = config_with(metric());
        config.groups.push(config.groups[0].clone());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateGroupId(id)) if id == "web"
        ));

        let mut config = config_with(metric());
        config.groups[0].metrics.clear();
        assert!(matches!(config.validate(), Err(ConfigError::NoMetrics(_))));

        let mut config = config_with(metric());
        config.groups.clear();
        assert!(matches!(config.validate(), Err(ConfigError::NoGroups)));

        let config = config_with(MetricSpec::new("AWS/EC2", "CPUUtilization"));
        assert!(matches!(config.validate(), Err(ConfigError::NoDimensions(_))));

        let config = config_with(MetricSpec::new("", "CPUUtilization").dimension("a", "b"));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyField { field: "namespace", .. })
        ));

        let config = config_with(
            metric()
                .statistic(Statistic::Sum)
                .statistic(Statistic::Sum),
        );
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateStatistic { statistic: Statistic::Sum, .. })
        ));

        let mut empty_dim = metric();
        empty_dim.dimension_select.insert("AutoScalingGroupName".into(), vec![]);
        assert!(matches!(
            config_with(empty_dim).validate(),
            Err(ConfigError::EmptyDimension { .. })
        ));

        assert!(matches!(
            config_with(metric().period_seconds(90)).validate(),
            Err(ConfigError::InvalidGranularity { seconds: 90, .. })
        ));
        assert!(config_with(metric().period_seconds(10)).validate().is_ok());
        assert!(config_with(metric().period_seconds(180)).validate().is_ok());
    }

    #[test]
    fn invalid_file_is_an_error() {
        let err = Config::from_json(r#"{"groups":[]}"#).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Config(ConfigError::NoGroups)
        ));
        assert!(Config::from_yaml("groups: 12").is_err());
    }

    #[tokio::test]
    async fn from_path() {
        let dir = std::env::temp_dir().join(format!("cwmb-config-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();

        let yaml = dir.join("beat.yml");
        tokio::fs::write(&yaml, YAML).await.unwrap();
        let config = Config::from_path(&yaml).await.unwrap();
        assert_eq!(config.groups[1].id, "lb");

        let toml = dir.join("beat.toml");
        tokio::fs::write(&toml, "period = 1").await.unwrap();
        assert!(matches!(
            Config::from_path(&toml).await,
            Err(crate::Error::Config(ConfigError::UnknownFormat(_)))
        ));

        assert!(matches!(
            Config::from_path(dir.join("missing.yml")).await,
            Err(crate::Error::IO(_))
        ));

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
