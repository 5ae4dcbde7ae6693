//! Self-monitoring metrics for the exporter
//!
//! Exposed on the `/metrics` endpoint, separate from the enhanced monitoring
//! samples so that scrape configs can keep them apart.

use anyhow::{Context, Result};
use prometheus::{
    GaugeVec, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Reasons an event is skipped during a poll
pub const DROP_UNKNOWN_INSTANCE: &str = "unknown_instance";
pub const DROP_PARSE_ERROR: &str = "parse_error";
pub const DROP_BAD_TIMESTAMP: &str = "bad_timestamp";

pub struct ExporterMetrics {
    registry: Registry,

    /// Total CloudWatch Logs API requests.
    pub requests_total: IntCounter,
    /// API response latency by HTTP status ("err" on transport failure).
    pub responses_duration: HistogramVec,
    /// Duration of a full poll cycle per group.
    pub poll_duration: HistogramVec,
    /// Log events dropped during polling, by reason.
    pub dropped_events: IntCounterVec,
    /// Log query batches that failed, by group.
    pub failed_batches: IntCounterVec,
    /// Polls cut short by the cycle deadline or shutdown, by group.
    pub truncated_polls: IntCounterVec,
    /// Distance between wall clock and the group's watermark.
    pub watermark_lag: GaugeVec,
    /// Instances with fresh data in the last published snapshot, by group.
    pub instances_reporting: GaugeVec,
}

impl ExporterMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests_total = IntCounter::new(
            "rds_pulse_requests_total",
            "Total number of CloudWatch Logs API requests.",
        )?;
        let responses_duration = HistogramVec::new(
            HistogramOpts::new(
                "rds_pulse_responses_duration_seconds",
                "CloudWatch Logs API responses latency distributions.",
            ),
            &["status"],
        )?;
        let poll_duration = HistogramVec::new(
            HistogramOpts::new(
                "rds_pulse_poll_duration_seconds",
                "Duration of enhanced metrics poll cycles.",
            )
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
            &["group"],
        )?;
        let dropped_events = IntCounterVec::new(
            Opts::new(
                "rds_pulse_dropped_events_total",
                "Log events skipped during polling.",
            ),
            &["reason"],
        )?;
        let failed_batches = IntCounterVec::new(
            Opts::new(
                "rds_pulse_failed_batches_total",
                "Log query batches that failed.",
            ),
            &["group"],
        )?;
        let truncated_polls = IntCounterVec::new(
            Opts::new(
                "rds_pulse_truncated_polls_total",
                "Polls cut short by their deadline or by shutdown.",
            ),
            &["group"],
        )?;
        let watermark_lag = GaugeVec::new(
            Opts::new(
                "rds_pulse_watermark_lag_seconds",
                "Seconds between now and the start of the next poll window.",
            ),
            &["group"],
        )?;
        let instances_reporting = GaugeVec::new(
            Opts::new(
                "rds_pulse_instances_reporting",
                "Instances with fresh samples in the last snapshot.",
            ),
            &["group"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(responses_duration.clone()))?;
        registry.register(Box::new(poll_duration.clone()))?;
        registry.register(Box::new(dropped_events.clone()))?;
        registry.register(Box::new(failed_batches.clone()))?;
        registry.register(Box::new(truncated_polls.clone()))?;
        registry.register(Box::new(watermark_lag.clone()))?;
        registry.register(Box::new(instances_reporting.clone()))?;

        Ok(ExporterMetrics {
            registry,
            requests_total,
            responses_duration,
            poll_duration,
            dropped_events,
            failed_batches,
            truncated_polls,
            watermark_lag,
            instances_reporting,
        })
    }

    /// Record one outbound API call
    pub fn observe_response(&self, status: &str, duration: Duration) {
        self.responses_duration
            .with_label_values(&[status])
            .observe(duration.as_secs_f64());
    }

    pub fn drop_event(&self, reason: &str) {
        self.dropped_events.with_label_values(&[reason]).inc();
    }

    /// Render the registry in Prometheus text format
    pub fn render(&self) -> Result<String> {
        TextEncoder::new()
            .encode_to_string(&self.registry.gather())
            .context("encoding exporter metrics")
    }
}
