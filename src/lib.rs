//!
//! Library for polling CloudWatch metric statistics and turning them into flat events.
//!
//! ## Collector
//! Groups of metrics (prospectors) are loaded from configuration, each metric is
//! queried for a recent window, the latest datapoint is reduced into an [`event::Event`]
//! and handed to an [`sink::EventSink`].
//! ```no_run
//! #[tokio::main]
//! async fn main() -> Result<(), cloudwatch_metricbeat::Error> {
//!     use std::sync::Arc;
//!     use cloudwatch_metricbeat::{config::Config, scheduler::Scheduler};
//!     use cloudwatch_metricbeat::{sink::ChannelSink, source::http::HttpSourceBuilder};
//!
//!     let config = Config::from_path("cloudwatch-metricbeat.yml").await?;
//!
//!     let source = HttpSourceBuilder::new().region(&config.region).build()?;
//!     let (sink, mut events) = ChannelSink::new();
//!
//!     let scheduler = Scheduler::new(&config, Arc::new(source), Arc::new(sink));
//!     let stop = tokio_util::sync::CancellationToken::new();
//!
//!     tokio::spawn(async move {
//!         while let Some(event) = events.recv().await {
//!             println!("{}", serde_json::to_string(&event)?);
//!         }
//!         Ok::<_, serde_json::Error>(())
//!     });
//!
//!     scheduler.run(stop).await?;
//!     Ok(())
//! }
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::missing_errors_doc)]
use serde::Deserialize;

pub mod config;
pub mod datapoint;
pub mod event;
pub mod naming;
pub mod prospector;
pub mod query;
pub mod scheduler;
pub mod sink;
pub mod source;

/// Description of an error from the REST API
#[derive(Debug, Deserialize)]
pub struct RESTError {
    /// Error type, e.g. `InvalidParameterValue`
    #[serde(rename = "__type")]
    pub kind: String,
    /// Error message
    #[serde(alias = "Message")]
    pub message: Option<String>,
}

/// Error returned by library functions
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration is not usable
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Failed returned by the HTTP server
    #[error("HTTP failed {0}, {1}")]
    WebServer(u16, String),

    /// This error is returned from the REST API, this typically means the query was
    /// rejected.
    #[error("REST error {0:?}")]
    REST(RESTError),

    /// JSON serialization/deserialization error
    #[error("Serde JSON error: {0}")]
    Serde(#[from] serde_json::Error),

    /// YAML deserialization error
    #[error("Serde YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// URL parsing error
    #[error("URL: {0}")]
    URL(#[from] url::ParseError),

    /// HTTP client error
    #[error("Reqwest: {0}")]
    HTTPClient(#[from] reqwest::Error),

    /// IO Errors
    #[error("IO error {0}")]
    IO(#[from] std::io::Error),

    /// The event sink was closed
    #[error("Event sink closed")]
    SinkClosed,

    /// General Error
    #[error("Error {0}")]
    General(String),
}

impl Error {
    /// Create a general error
    #[must_use]
    pub fn general(err: &str) -> Self {
        Self::General(err.to_string())
    }
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Reason a single metric did not produce an event during a prospector run.
#[derive(Debug, thiserror::Error)]
pub enum MetricError {
    /// The remote call failed
    #[error("fetch failed: {0}")]
    Fetch(#[source] Error),

    /// The remote call succeeded but returned no datapoints
    #[error("successful call to cloudwatch, but no data")]
    NoData,

    /// The chosen datapoint has no statistic values
    #[error("datapoint has no statistics")]
    NoStatistics,

    /// The event could not be handed to the sink
    #[error("publish failed: {0}")]
    Publish(#[source] Error),
}

impl MetricError {
    /// `NoData` is expected while upstream data settles and is not counted as a failure
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        !matches!(self, Self::NoData)
    }
}
