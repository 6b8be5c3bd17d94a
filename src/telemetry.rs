//! Telemetry source: instant/range metric queries and log tailing.
//!
//! The core consumes telemetry through the narrow [`TelemetrySource`] trait;
//! [`PromClient`] is the HTTP implementation against a Prometheus-compatible
//! API. Responses are parsed into explicit structs at this boundary - a
//! malformed sample is logged and skipped rather than silently propagated as
//! an empty result deep in the pipeline.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::config::{env_or, env_parse};

/// Default telemetry service URL (internal cluster DNS)
const DEFAULT_TELEMETRY_URL: &str = "http://prometheus-server.observability.svc.cluster.local:80";

/// Configuration for the telemetry client
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Base URL for the query API
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            base_url: env_or("MENDER_TELEMETRY_URL", DEFAULT_TELEMETRY_URL),
            timeout_secs: env_parse("MENDER_TELEMETRY_TIMEOUT_SECS", 30),
        }
    }
}

/// A single instant-query sample.
#[derive(Debug, Clone)]
pub struct InstantSample {
    /// Labels associated with this metric
    pub labels: HashMap<String, String>,
    /// The metric value
    pub value: f64,
    /// Timestamp of the sample
    pub timestamp: DateTime<Utc>,
}

/// One time series from a range query.
#[derive(Debug, Clone)]
pub struct RangeSeries {
    /// Labels associated with this series
    pub labels: HashMap<String, String>,
    /// `(unix seconds, value)` points in time order
    pub points: Vec<(f64, f64)>,
}

/// Read-only telemetry collaborator consumed by the detectors.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Execute an instant query.
    async fn query_instant(&self, query: &str) -> Result<Vec<InstantSample>>;

    /// Execute a range query.
    async fn query_range(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: &str,
    ) -> Result<Vec<RangeSeries>>;

    /// Tail the most recent log lines for a pod.
    async fn tail_logs(&self, pod: &str, namespace: &str, lines: u32) -> Result<Vec<String>>;
}

// Wire format of the query API.

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    data: QueryData,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    result: Vec<QueryResult>,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    metric: HashMap<String, String>,
    /// Instant queries: one `[ts, "value"]` pair
    value: Option<(f64, String)>,
    /// Range queries: many `[ts, "value"]` pairs
    values: Option<Vec<(f64, String)>>,
}

#[derive(Debug, Deserialize)]
struct LogsResponse {
    logs: Vec<String>,
}

/// HTTP telemetry client.
#[derive(Debug, Clone)]
pub struct PromClient {
    config: TelemetryConfig,
    client: reqwest::Client,
}

impl PromClient {
    /// Create a new telemetry client with the given configuration.
    ///
    /// # Panics
    /// Panics if the HTTP client cannot be created.
    #[must_use]
    pub fn new(config: TelemetryConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");
        Self { config, client }
    }

    /// Create a new client with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(TelemetryConfig::default())
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    async fn fetch(&self, url: &str, params: &[(&str, &str)]) -> Result<QueryResponse> {
        let response = self
            .client
            .get(url)
            .query(params)
            .send()
            .await
            .context("Failed to send request to telemetry service")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Telemetry query failed with status {status}: {body}");
        }

        let parsed: QueryResponse = response
            .json()
            .await
            .context("Failed to parse telemetry response")?;

        if parsed.status != "success" {
            anyhow::bail!("Telemetry query returned status: {}", parsed.status);
        }

        Ok(parsed)
    }
}

#[async_trait]
impl TelemetrySource for PromClient {
    async fn query_instant(&self, query: &str) -> Result<Vec<InstantSample>> {
        debug!(query = %query, "Executing instant query");
        let response = self
            .fetch(&self.api_url("/api/v1/query"), &[("query", query)])
            .await?;

        let mut samples = Vec::new();
        for result in response.data.result {
            let Some((timestamp, value_str)) = result.value else {
                continue;
            };
            let Ok(value) = value_str.parse::<f64>() else {
                warn!(value = %value_str, "Skipping unparsable sample value");
                continue;
            };
            let ts = DateTime::from_timestamp(timestamp as i64, 0).unwrap_or_else(Utc::now);
            samples.push(InstantSample {
                labels: result.metric,
                value,
                timestamp: ts,
            });
        }
        Ok(samples)
    }

    async fn query_range(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: &str,
    ) -> Result<Vec<RangeSeries>> {
        debug!(query = %query, start = %start, end = %end, step = %step, "Executing range query");
        let start_s = start.timestamp().to_string();
        let end_s = end.timestamp().to_string();
        let response = self
            .fetch(
                &self.api_url("/api/v1/query_range"),
                &[
                    ("query", query),
                    ("start", &start_s),
                    ("end", &end_s),
                    ("step", step),
                ],
            )
            .await?;

        let mut series = Vec::new();
        for result in response.data.result {
            let Some(values) = result.values else {
                continue;
            };
            let mut points = Vec::with_capacity(values.len());
            for (ts, value_str) in values {
                match value_str.parse::<f64>() {
                    Ok(v) => points.push((ts, v)),
                    Err(_) => warn!(value = %value_str, "Skipping unparsable range value"),
                }
            }
            series.push(RangeSeries {
                labels: result.metric,
                points,
            });
        }
        Ok(series)
    }

    async fn tail_logs(&self, pod: &str, namespace: &str, lines: u32) -> Result<Vec<String>> {
        debug!(pod, namespace, lines, "Tailing logs");
        let lines_s = lines.to_string();
        let response = self
            .client
            .get(self.api_url("/api/v1/logs"))
            .query(&[("pod", pod), ("namespace", namespace), ("lines", &lines_s)])
            .send()
            .await
            .context("Failed to send log tail request")?;

        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!("Log tail failed with status {status}");
        }

        let parsed: LogsResponse = response
            .json()
            .await
            .context("Failed to parse log tail response")?;
        Ok(parsed.logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = TelemetryConfig::default();
        assert_eq!(config.timeout_secs, 30);
        assert!(!config.base_url.is_empty());
    }

    #[test]
    fn test_api_url_trims_trailing_slash() {
        let client = PromClient::new(TelemetryConfig {
            base_url: "http://prom:9090/".to_string(),
            timeout_secs: 5,
        });
        assert_eq!(client.api_url("/api/v1/query"), "http://prom:9090/api/v1/query");
    }

    #[test]
    fn test_wire_format_parses_instant_result() {
        let body = r#"{
            "status": "success",
            "data": {
                "resultType": "vector",
                "result": [
                    {"metric": {"pod": "web-1", "namespace": "prod"}, "value": [1700000000.0, "42.5"]}
                ]
            }
        }"#;
        let parsed: QueryResponse = serde_json::from_str(body).expect("valid wire format");
        assert_eq!(parsed.status, "success");
        assert_eq!(parsed.data.result.len(), 1);
        assert_eq!(parsed.data.result[0].value.as_ref().map(|v| v.1.as_str()), Some("42.5"));
    }

    #[test]
    fn test_wire_format_parses_range_result() {
        let body = r#"{
            "status": "success",
            "data": {
                "resultType": "matrix",
                "result": [
                    {"metric": {"pod": "web-1"}, "values": [[1.0, "1.5"], [2.0, "2.5"]]}
                ]
            }
        }"#;
        let parsed: QueryResponse = serde_json::from_str(body).expect("valid wire format");
        let values = parsed.data.result[0].values.as_ref().expect("range values");
        assert_eq!(values.len(), 2);
    }
}
