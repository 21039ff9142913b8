//!
//! `GetMetricStatistics` over the CloudWatch JSON protocol.
//!
//! Requests are sent unsigned, point the endpoint at a signing proxy or a local emulator.
use super::MetricSource;
use crate::datapoint::{Datapoint, Statistic};
use crate::query::{Dimension, Query};
use crate::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

const TARGET: &str = "GraniteServiceVersion20100801.GetMetricStatistics";
const CONTENT_TYPE: &str = "application/x-amz-json-1.0";

/// Builder for an [`HttpSource`]
#[derive(Clone)]
pub struct HttpSourceBuilder {
    region: String,
    endpoint: Option<String>,
    root_certificates: Vec<reqwest::Certificate>,
    disable_cert_verification: bool,
}

impl HttpSourceBuilder {
    /// Create a new builder instance
    #[must_use]
    pub fn new() -> Self {
        Self {
            region: crate::config::DEFAULT_REGION.to_string(),
            endpoint: None,
            root_certificates: Vec::new(),
            disable_cert_verification: false,
        }
    }

    /// Region, used to derive the default endpoint
    #[must_use]
    pub fn region(self, region: &str) -> Self {
        Self {
            region: region.to_string(),
            ..self
        }
    }

    /// Override the endpoint
    #[must_use]
    pub fn endpoint(self, endpoint: Option<&str>) -> Self {
        Self {
            endpoint: endpoint.map(str::to_string),
            ..self
        }
    }

    /// Add a root certificate for API certificate verification
    pub fn add_root_certificate(mut self, cert: &[u8]) -> Result<Self> {
        self.root_certificates
            .push(reqwest::Certificate::from_pem(cert)?);
        Ok(self)
    }

    /// Disable certificate verification
    #[must_use]
    pub fn danger_accept_invalid_certs(self) -> Self {
        Self {
            disable_cert_verification: true,
            ..self
        }
    }

    /// Build the source
    pub fn build(self) -> Result<HttpSource> {
        let endpoint = match &self.endpoint {
            Some(endpoint) => url::Url::parse(endpoint)?,
            None => url::Url::parse(&format!("https://monitoring.{}.amazonaws.com/", self.region))?,
        };

        let client = self
            .root_certificates
            .into_iter()
            .fold(reqwest::Client::builder(), reqwest::ClientBuilder::add_root_certificate)
            .danger_accept_invalid_certs(self.disable_cert_verification)
            .build()?;

        tracing::debug!("Statistics endpoint {}", endpoint);
        Ok(HttpSource { client, endpoint })
    }
}

impl std::fmt::Debug for HttpSourceBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSourceBuilder")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("root_certificates", &self.root_certificates.len())
            .field("disable_cert_verification", &self.disable_cert_verification)
            .finish()
    }
}

impl Default for HttpSourceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Fetches statistics from a CloudWatch compatible HTTP endpoint
#[derive(Clone, Debug)]
pub struct HttpSource {
    client: reqwest::Client,
    endpoint: url::Url,
}

impl HttpSource {
    /// Create a source builder
    #[must_use]
    pub fn builder() -> HttpSourceBuilder {
        HttpSourceBuilder::new()
    }

    /// API endpoint
    #[must_use]
    pub const fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl MetricSource for HttpSource {
    #[tracing::instrument(level = "debug", skip(self), fields(metric = %query.metric_name))]
    async fn fetch(&self, query: &Query) -> Result<Vec<Datapoint>> {
        let request = Request::from(query);
        tracing::debug!("making request: {:?}", request);

        let result = self
            .client
            .post(self.endpoint.clone())
            .header("X-Amz-Target", TARGET)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .body(serde_json::to_vec(&request)?)
            .send()
            .await?;

        let status = result.status();
        let body = result.bytes().await?;

        if status.is_success() {
            let response: Response = serde_json::from_slice(&body)?;
            response.into_datapoints()
        } else {
            tracing::error!("GetMetricStatistics failed with {}", status);
            match serde_json::from_slice(&body) {
                Ok(err) => Err(Error::REST(err)),
                Err(_) => Err(Error::WebServer(status.as_u16(), status.to_string())),
            }
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Request<'a> {
    namespace: &'a str,
    metric_name: &'a str,
    dimensions: &'a [Dimension],
    start_time: i64,
    end_time: i64,
    period: u32,
    statistics: &'a [Statistic],
}

impl<'a> From<&'a Query> for Request<'a> {
    fn from(query: &'a Query) -> Self {
        Self {
            namespace: &query.namespace,
            metric_name: &query.metric_name,
            dimensions: &query.dimensions,
            start_time: query.window.start.timestamp(),
            end_time: query.window.end.timestamp(),
            period: query.period_seconds,
            statistics: &query.statistics,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Response {
    #[serde(default)]
    datapoints: Vec<WireDatapoint>,
}

impl Response {
    fn into_datapoints(self) -> Result<Vec<Datapoint>> {
        self.datapoints
            .into_iter()
            .map(WireDatapoint::into_datapoint)
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireDatapoint {
    /// Epoch seconds, may carry a fraction
    timestamp: f64,
    sum: Option<f64>,
    average: Option<f64>,
    maximum: Option<f64>,
    minimum: Option<f64>,
    sample_count: Option<f64>,
}

impl WireDatapoint {
    #[allow(clippy::cast_possible_truncation)]
    fn into_datapoint(self) -> Result<Datapoint> {
        let millis = (self.timestamp * 1000.0).round() as i64;
        let timestamp: DateTime<Utc> = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| Error::General(format!("invalid timestamp {}", self.timestamp)))?;

        Ok(Datapoint {
            timestamp,
            sum: self.sum,
            average: self.average,
            maximum: self.maximum,
            minimum: self.minimum,
            sample_count: self.sample_count,
        })
    }
}
