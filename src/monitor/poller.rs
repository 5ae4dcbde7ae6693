//! Enhanced monitoring log poller
//!
//! One poll queries every instance of a group, in batches of at most
//! [`MAX_STREAMS_PER_REQUEST`] stream names, all starting at the same
//! watermark. Events are bucketed per instance and per event timestamp; only
//! after every batch is drained (or the deadline hits) does reconciliation
//! pick one timestamp per instance and move the watermark.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::exporter_metrics::{
    ExporterMetrics, DROP_BAD_TIMESTAMP, DROP_PARSE_ERROR, DROP_UNKNOWN_INSTANCE,
};
use super::instance::MonitoredInstance;
use super::log_source::{
    FilterRequest, LogSource, RawLogEvent, SourceError, MAX_STREAMS_PER_REQUEST,
};
use super::reconciler::reconcile;
use crate::utils::exposition::MetricSample;
use crate::utils::os_metrics::{MessageParser, ParseError};

/// How far back the very first poll looks
pub const INITIAL_LOOKBACK: ChronoDuration = ChronoDuration::minutes(3);

/// What one instance reported at one event timestamp
#[derive(Debug, Clone)]
struct Observation {
    samples: Vec<MetricSample>,
    message: String,
}

/// Resource id -> event timestamp -> observation, rebuilt every poll
type Accumulator = HashMap<String, BTreeMap<DateTime<Utc>, Observation>>;

fn merge(into: &mut Accumulator, from: Accumulator) {
    for (resource_id, by_time) in from {
        into.entry(resource_id).or_default().extend(by_time);
    }
}

/// How draining one batch ended
enum BatchEnd {
    Complete,
    /// Deadline or cancellation; pages read so far are kept
    Interrupted,
    Failed(SourceError),
}

/// Result of one poll
#[derive(Debug, Default)]
pub struct PollOutcome {
    /// Resource id -> samples of its newest event
    pub samples: HashMap<String, Vec<MetricSample>>,
    /// Resource id -> raw message of its newest event
    pub messages: HashMap<String, String>,
    /// Start of the next poll window
    pub watermark: DateTime<Utc>,
    /// True if the deadline or cancellation cut the poll short
    pub truncated: bool,
    pub failed_batches: usize,
}

/// Polls one group of instances and owns its watermark
pub struct LogEventPoller<S> {
    group: String,
    source: S,
    instances: Arc<[MonitoredInstance]>,
    log_group: String,
    parser: MessageParser,
    watermark: DateTime<Utc>,
    metrics: Option<Arc<ExporterMetrics>>,
}

impl<S: LogSource> LogEventPoller<S> {
    pub fn new(
        group: impl Into<String>,
        source: S,
        instances: Arc<[MonitoredInstance]>,
        log_group: impl Into<String>,
        parser: MessageParser,
    ) -> Self {
        LogEventPoller {
            group: group.into(),
            source,
            instances,
            log_group: log_group.into(),
            parser,
            watermark: Utc::now() - INITIAL_LOOKBACK,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<ExporterMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Override the start of the next poll window
    #[cfg(test)]
    pub fn with_watermark(mut self, watermark: DateTime<Utc>) -> Self {
        self.watermark = watermark;
        self
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    #[cfg(test)]
    pub fn watermark(&self) -> DateTime<Utc> {
        self.watermark
    }

    /// Run one poll and advance the watermark
    ///
    /// Never fails: unknown streams, undecodable events and failed batches
    /// are logged and skipped. Hitting `deadline` or `cancel` truncates the
    /// poll; whatever was collected is still reconciled and returned.
    pub async fn poll(&mut self, deadline: Instant, cancel: &CancellationToken) -> PollOutcome {
        let instances = self.instances.clone();
        let by_id: HashMap<&str, &MonitoredInstance> = instances
            .iter()
            .map(|i| (i.resource_id.as_str(), i))
            .collect();
        let stream_names: Vec<String> = instances.iter().map(|i| i.resource_id.clone()).collect();
        let start_time = self.watermark.timestamp_millis();

        debug!(
            group = %self.group,
            next_start = %self.watermark,
            since_last_ms = (Utc::now() - self.watermark).num_milliseconds(),
            streams = stream_names.len(),
            "Requesting enhanced metrics"
        );

        let mut accumulated = Accumulator::new();
        let mut truncated = false;
        let mut failed_batches = 0;

        for batch in stream_names.chunks(MAX_STREAMS_PER_REQUEST) {
            if cancel.is_cancelled() || Instant::now() >= deadline {
                truncated = true;
                break;
            }

            let mut batch_acc = Accumulator::new();
            match self
                .drain_batch(batch, start_time, deadline, cancel, &by_id, &mut batch_acc)
                .await
            {
                BatchEnd::Complete => merge(&mut accumulated, batch_acc),
                BatchEnd::Interrupted => {
                    merge(&mut accumulated, batch_acc);
                    truncated = true;
                    break;
                }
                BatchEnd::Failed(e) => {
                    failed_batches += 1;
                    if let Some(metrics) = &self.metrics {
                        metrics
                            .failed_batches
                            .with_label_values(&[self.group.as_str()])
                            .inc();
                    }
                    error!(
                        group = %self.group,
                        batch_size = batch.len(),
                        error = %e,
                        "Failed to filter log events"
                    );
                }
            }
        }

        if truncated {
            warn!(
                group = %self.group,
                "Poll deadline reached or cancelled, publishing partial results"
            );
        }

        let now = Utc::now();
        let reconciled = reconcile(
            accumulated.iter().map(|(id, by_time)| (id, by_time.keys())),
            now,
        );

        let mut outcome = PollOutcome {
            watermark: reconciled.next_watermark,
            truncated,
            failed_batches,
            ..Default::default()
        };
        for (resource_id, timestamp) in reconciled.selected {
            let observation = accumulated
                .get_mut(&resource_id)
                .and_then(|by_time| by_time.remove(&timestamp));
            if let Some(observation) = observation {
                outcome.samples.insert(resource_id.clone(), observation.samples);
                outcome.messages.insert(resource_id, observation.message);
            }
        }

        self.watermark = reconciled.next_watermark;
        if let Some(metrics) = &self.metrics {
            metrics
                .watermark_lag
                .with_label_values(&[self.group.as_str()])
                .set((now - self.watermark).num_milliseconds() as f64 / 1000.0);
        }

        info!(
            group = %self.group,
            instances_reporting = outcome.samples.len(),
            failed_batches,
            truncated,
            next_start = %self.watermark,
            "Enhanced metrics poll completed"
        );

        outcome
    }

    /// Read every page of one batch into `acc`
    async fn drain_batch(
        &self,
        batch: &[String],
        start_time: i64,
        deadline: Instant,
        cancel: &CancellationToken,
        by_id: &HashMap<&str, &MonitoredInstance>,
        acc: &mut Accumulator,
    ) -> BatchEnd {
        let mut request = FilterRequest {
            log_group_name: self.log_group.clone(),
            log_stream_names: batch.to_vec(),
            start_time,
            next_token: None,
        };

        loop {
            let result = tokio::select! {
                biased;

                () = cancel.cancelled() => return BatchEnd::Interrupted,
                () = tokio::time::sleep_until(deadline) => return BatchEnd::Interrupted,
                result = self.source.filter_log_events(&request) => result,
            };

            let page = match result {
                Ok(page) => page,
                Err(e) => return BatchEnd::Failed(e),
            };

            for event in page.events {
                self.record_event(event, by_id, acc);
            }

            // An empty page with a token is not the end; only a missing or
            // repeated token is.
            match page.next_token {
                Some(token)
                    if !token.is_empty() && request.next_token.as_deref() != Some(&token) =>
                {
                    request.next_token = Some(token);
                }
                _ => return BatchEnd::Complete,
            }
        }
    }

    fn record_event(
        &self,
        event: RawLogEvent,
        by_id: &HashMap<&str, &MonitoredInstance>,
        acc: &mut Accumulator,
    ) {
        let Some(instance) = by_id.get(event.log_stream_name.as_str()) else {
            error!(
                group = %self.group,
                event_id = %event.event_id,
                log_stream_name = %event.log_stream_name,
                "Failed to find instance"
            );
            self.drop_event(DROP_UNKNOWN_INSTANCE);
            return;
        };

        if instance.disable_enhanced_metrics {
            debug!(
                instance = %instance.instance,
                region = %instance.region,
                "Enhanced metrics are disabled for instance"
            );
            return;
        }

        let Some(timestamp) = DateTime::from_timestamp_millis(event.timestamp) else {
            warn!(
                event_id = %event.event_id,
                instance = %instance.instance,
                timestamp = event.timestamp,
                "Event timestamp out of range"
            );
            self.drop_event(DROP_BAD_TIMESTAMP);
            return;
        };

        let os_metrics = match self.parser.parse(&event.message) {
            Ok(os_metrics) => os_metrics,
            Err(ParseError::UnknownFields(fields)) if self.parser.strict_unknown_fields => {
                panic!("new enhanced metrics fields must be mapped: {}", fields.join(", "));
            }
            Err(e) => {
                error!(
                    event_id = %event.event_id,
                    instance = %instance.instance,
                    region = %instance.region,
                    error = %e,
                    "Failed to parse metrics"
                );
                self.drop_event(DROP_PARSE_ERROR);
                return;
            }
        };

        if os_metrics.instance_resource_id != instance.resource_id {
            warn!(
                event_id = %event.event_id,
                instance = %instance.instance,
                log_stream_name = %event.log_stream_name,
                document_resource_id = %os_metrics.instance_resource_id,
                "Document resource id differs from its log stream"
            );
        }

        debug!(
            event_id = %event.event_id,
            instance = %instance.instance,
            engine = %os_metrics.engine,
            instance_id = %os_metrics.instance_id,
            uptime = %os_metrics.uptime,
            message_timestamp = %os_metrics.timestamp,
            event_timestamp = %timestamp,
            ingestion_time = event.ingestion_time,
            "Decoded enhanced metrics event"
        );

        let observation = Observation {
            samples: os_metrics.to_samples(instance),
            message: event.message,
        };
        acc.entry(instance.resource_id.clone())
            .or_default()
            .insert(timestamp, observation);
    }

    fn drop_event(&self, reason: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.drop_event(reason);
        }
    }
}
