//! Poll loop - drives one poller on a timer and publishes its snapshots
//!
//! Every tick runs one poll bounded by the group's interval and hands the
//! result to the snapshot cache over an mpsc channel. The first poll runs
//! immediately, so the endpoint has data before a full interval elapses.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::exporter_metrics::ExporterMetrics;
use super::log_source::LogSource;
use super::poller::LogEventPoller;
use crate::utils::exposition::MetricSample;

/// Result of one poll cycle of one group
#[derive(Clone, Debug)]
pub struct PollSnapshot {
    pub group: String,
    /// Resource id -> samples
    pub samples: HashMap<String, Vec<MetricSample>>,
    /// Resource id -> raw message, for diagnostics
    pub messages: HashMap<String, String>,
    pub watermark: DateTime<Utc>,
    pub truncated: bool,
    pub collected_at: DateTime<Utc>,
}

pub struct PollLoop<S> {
    poller: LogEventPoller<S>,
    interval: Duration,
    sender: mpsc::Sender<PollSnapshot>,
    metrics: Option<Arc<ExporterMetrics>>,
}

impl<S: LogSource> PollLoop<S> {
    pub fn new(
        poller: LogEventPoller<S>,
        interval: Duration,
        sender: mpsc::Sender<PollSnapshot>,
    ) -> Self {
        PollLoop {
            poller,
            interval,
            sender,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<ExporterMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Poll until `cancel` fires or the snapshot receiver goes away
    ///
    /// A poll interrupted by cancellation still publishes what it collected.
    pub async fn run(mut self, cancel: CancellationToken) {
        let group = self.poller.group().to_string();
        info!(
            group = %group,
            interval_ms = self.interval.as_millis(),
            "Starting enhanced metrics poll loop"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let cycle_start = Instant::now();
            let deadline = cycle_start + self.interval;
            let outcome = self.poller.poll(deadline, &cancel).await;
            let elapsed = cycle_start.elapsed();

            if let Some(metrics) = &self.metrics {
                let labels = [group.as_str()];
                metrics
                    .poll_duration
                    .with_label_values(&labels)
                    .observe(elapsed.as_secs_f64());
                metrics
                    .instances_reporting
                    .with_label_values(&labels)
                    .set(outcome.samples.len() as f64);
                if outcome.truncated {
                    metrics.truncated_polls.with_label_values(&labels).inc();
                }
            }

            let reporting = outcome.samples.len();
            let failed_batches = outcome.failed_batches;
            let snapshot = PollSnapshot {
                group: group.clone(),
                samples: outcome.samples,
                messages: outcome.messages,
                watermark: outcome.watermark,
                truncated: outcome.truncated,
                collected_at: Utc::now(),
            };

            if self.sender.send(snapshot).await.is_err() {
                warn!(group = %group, "Snapshot receiver closed, stopping poll loop");
                break;
            }

            debug!(
                group = %group,
                instances_reporting = reporting,
                failed_batches,
                duration_ms = elapsed.as_millis(),
                "Snapshot published"
            );
        }

        info!(group = %group, "Enhanced metrics poll loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::testing::{at, event, instance, page, ScriptedSource};
    use crate::utils::os_metrics::MessageParser;
    use std::sync::atomic::{AtomicI64, Ordering};

    fn poller(source: &Arc<ScriptedSource>) -> LogEventPoller<Arc<ScriptedSource>> {
        LogEventPoller::new(
            "us-east-1",
            source.clone(),
            vec![instance("a"), instance("b")].into(),
            "RDSOSMetrics",
            MessageParser::new(true),
        )
        .with_watermark(at(0))
    }

    #[tokio::test]
    async fn test_first_poll_is_immediate() {
        let source = Arc::new(ScriptedSource::new(|_| {
            Some(Ok(page(vec![event("a", 10), event("b", 12)], None)))
        }));
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let poll_loop = PollLoop::new(poller(&source), Duration::from_secs(3600), tx);
        let handle = tokio::spawn(poll_loop.run(cancel.clone()));

        let snapshot = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("first snapshot should not wait for the interval")
            .unwrap();
        assert_eq!(snapshot.group, "us-east-1");
        assert_eq!(snapshot.samples.len(), 2);
        assert_eq!(snapshot.watermark, at(10));
        assert!(!snapshot.truncated);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_watermark_carries_across_ticks() {
        let tick = Arc::new(AtomicI64::new(0));
        let counter = tick.clone();
        let source = Arc::new(ScriptedSource::new(move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Some(Ok(page(vec![event("a", 10 * (n + 1))], None)))
        }));
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let poll_loop = PollLoop::new(poller(&source), Duration::from_millis(20), tx);
        let handle = tokio::spawn(poll_loop.run(cancel.clone()));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        let third = rx.recv().await.unwrap();
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(first.watermark, at(10));
        assert_eq!(second.watermark, at(20));
        assert_eq!(third.watermark, at(30));

        let requests = source.requests();
        let starts: Vec<i64> = requests.iter().take(3).map(|r| r.start_time).collect();
        assert_eq!(
            starts,
            vec![
                at(0).timestamp_millis(),
                at(10).timestamp_millis(),
                at(20).timestamp_millis()
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_poll_still_publishes() {
        let source = Arc::new(ScriptedSource::new(|_| Some(Ok(page(vec![], None)))));
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let metrics = Arc::new(ExporterMetrics::new().unwrap());
        let poll_loop = PollLoop::new(poller(&source), Duration::from_secs(3600), tx)
            .with_metrics(metrics.clone());
        let handle = tokio::spawn(poll_loop.run(cancel.clone()));

        let snapshot = rx.recv().await.unwrap();
        assert!(snapshot.samples.is_empty());
        assert!(snapshot.messages.is_empty());

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(
            metrics
                .poll_duration
                .with_label_values(&["us-east-1"])
                .get_sample_count(),
            1
        );
    }

    #[tokio::test]
    async fn test_cancel_publishes_partial_poll_and_stops() {
        let source = Arc::new(ScriptedSource::new(|req| match req.next_token {
            None => Some(Ok(page(vec![event("a", 10)], Some("next")))),
            Some(_) => None,
        }));
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let poll_loop = PollLoop::new(poller(&source), Duration::from_secs(3600), tx);
        let handle = tokio::spawn(poll_loop.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let snapshot = rx.recv().await.unwrap();
        assert!(snapshot.truncated);
        assert!(snapshot.samples.contains_key("db-a"));

        handle.await.unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stops_when_receiver_dropped() {
        let source = Arc::new(ScriptedSource::new(|_| Some(Ok(page(vec![], None)))));
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let poll_loop = PollLoop::new(poller(&source), Duration::from_millis(10), tx);

        let run = poll_loop.run(CancellationToken::new());
        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("loop should exit once the receiver is gone");
        assert_eq!(source.requests().len(), 1);
    }
}
