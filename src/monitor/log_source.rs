//! CloudWatch Logs query client
//!
//! Speaks the JSON 1.1 protocol of `FilterLogEvents`. Requests are not signed
//! here; point `logs_endpoint` at a SigV4 signing proxy (or a local emulator)
//! that holds the credentials.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error};

use super::exporter_metrics::ExporterMetrics;

/// `FilterLogEvents` accepts at most this many stream names per request
pub const MAX_STREAMS_PER_REQUEST: usize = 100;

const FILTER_LOG_EVENTS_TARGET: &str = "Logs_20140328.FilterLogEvents";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";

/// One page request
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterRequest {
    pub log_group_name: String,
    pub log_stream_names: Vec<String>,
    /// Inclusive, milliseconds since the epoch
    pub start_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

/// One log event as returned by the service
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawLogEvent {
    pub log_stream_name: String,
    /// Event time, milliseconds since the epoch
    pub timestamp: i64,
    /// Ingestion time, milliseconds since the epoch
    pub ingestion_time: i64,
    pub message: String,
    pub event_id: String,
}

/// One page of results
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEventsPage {
    #[serde(default)]
    pub events: Vec<RawLogEvent>,
    /// Absent when there are no more pages
    pub next_token: Option<String>,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("decoding response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Upstream log query API
pub trait LogSource: Send + Sync {
    /// Fetch one page of events
    fn filter_log_events(
        &self,
        request: &FilterRequest,
    ) -> impl Future<Output = Result<LogEventsPage, SourceError>> + Send;
}

/// HTTP client for the CloudWatch Logs API
pub struct CloudWatchLogsClient {
    http: reqwest::Client,
    endpoint: String,
    metrics: Option<Arc<ExporterMetrics>>,
}

impl CloudWatchLogsClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(5)
            .pool_idle_timeout(Duration::from_secs(120))
            .build()?;

        Ok(CloudWatchLogsClient {
            http,
            endpoint: endpoint.into(),
            metrics: None,
        })
    }

    /// Record request counts and latencies into `metrics`
    pub fn with_metrics(mut self, metrics: Arc<ExporterMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn send(&self, request: &FilterRequest) -> Result<LogEventsPage, SourceError> {
        let start = Instant::now();
        if let Some(metrics) = &self.metrics {
            metrics.requests_total.inc();
        }

        let result = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", CONTENT_TYPE)
            .header("X-Amz-Target", FILTER_LOG_EVENTS_TARGET)
            .json(request)
            .send()
            .await;
        let elapsed = start.elapsed();

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                if let Some(metrics) = &self.metrics {
                    metrics.observe_response("err", elapsed);
                }
                error!(
                    component = "transport",
                    endpoint = %self.endpoint,
                    duration_ms = elapsed.as_millis(),
                    error = %e,
                    "FilterLogEvents request failed"
                );
                return Err(e.into());
            }
        };

        let status = response.status();
        if let Some(metrics) = &self.metrics {
            metrics.observe_response(status.as_str(), elapsed);
        }
        debug!(
            component = "transport",
            endpoint = %self.endpoint,
            status = status.as_u16(),
            duration_ms = elapsed.as_millis(),
            "FilterLogEvents"
        );

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl LogSource for CloudWatchLogsClient {
    fn filter_log_events(
        &self,
        request: &FilterRequest,
    ) -> impl Future<Output = Result<LogEventsPage, SourceError>> + Send {
        self.send(request)
    }
}
