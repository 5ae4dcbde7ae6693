//! Application context and dependency injection
//!
//! This module provides a centralized container for all application singletons.
//! All services are created once during startup and accessed through this context.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::monitor::exporter_metrics::ExporterMetrics;
use crate::monitor::instance::InstanceDirectory;
use crate::monitor::log_source::CloudWatchLogsClient;
use crate::monitor::poll_loop::{PollLoop, PollSnapshot};
use crate::monitor::poller::LogEventPoller;
use crate::monitor::snapshot_cache::SnapshotCache;
use crate::utils::os_metrics::MessageParser;

/// Snapshots buffered between the poll loops and the cache updater
const SNAPSHOT_CHANNEL_CAPACITY: usize = 16;

/// Application context holding all singleton instances
///
/// Services are created once at startup and accessed through this context
/// in all handlers and background tasks.
#[derive(Clone)]
pub struct AppContext {
    /// Every configured instance
    directory: Arc<InstanceDirectory>,

    /// Latest snapshot per poll group
    snapshot_cache: Arc<SnapshotCache>,

    /// Self-monitoring registry
    exporter_metrics: Arc<ExporterMetrics>,

    log_group: String,
    request_timeout: Duration,
}

impl AppContext {
    /// Create a new application context from a validated configuration
    pub fn new(config: Config, log_group: String) -> Result<Self> {
        tracing::info!("Initializing application context");

        config.validate()?;
        if log_group.is_empty() {
            return Err(anyhow::anyhow!("log group missing"));
        }

        let directory = Arc::new(InstanceDirectory::new(config.instances));
        let snapshot_cache = Arc::new(SnapshotCache::new());
        let exporter_metrics = Arc::new(ExporterMetrics::new()?);
        tracing::info!(
            instances = directory.instances().len(),
            "Instance directory loaded"
        );

        Ok(AppContext {
            directory,
            snapshot_cache,
            exporter_metrics,
            log_group,
            request_timeout: config.request_timeout,
        })
    }

    /// Spawn one poll loop per poll group plus the snapshot cache updater
    ///
    /// Every task stops when `cancel` fires; the updater exits once the last
    /// poll loop has dropped its sender.
    pub fn start(&self, cancel: CancellationToken) -> Result<()> {
        let (sender, receiver) = mpsc::channel::<PollSnapshot>(SNAPSHOT_CHANNEL_CAPACITY);

        for group in self.directory.poll_groups() {
            let client = CloudWatchLogsClient::new(&group.logs_endpoint, self.request_timeout)?
                .with_metrics(self.exporter_metrics.clone());
            let poller = LogEventPoller::new(
                group.name.clone(),
                client,
                group.instances.clone(),
                self.log_group.clone(),
                MessageParser::new(false),
            )
            .with_metrics(self.exporter_metrics.clone());
            let poll_loop = PollLoop::new(poller, group.interval, sender.clone())
                .with_metrics(self.exporter_metrics.clone());

            tracing::info!(
                group = %group.name,
                region = %group.region,
                endpoint = %group.logs_endpoint,
                instances = group.instances.len(),
                interval_secs = group.interval.as_secs_f64(),
                "Poll group initialized"
            );
            tokio::spawn(poll_loop.run(cancel.clone()));
        }
        drop(sender);

        let snapshot_cache = self.snapshot_cache.clone();
        tokio::spawn(async move {
            snapshot_cache.run(receiver).await;
        });

        Ok(())
    }

    /// Get reference to the instance directory
    pub fn directory(&self) -> &Arc<InstanceDirectory> {
        &self.directory
    }

    /// Get reference to the snapshot cache
    pub fn snapshot_cache(&self) -> &Arc<SnapshotCache> {
        &self.snapshot_cache
    }

    /// Get reference to the exporter self-metrics
    pub fn exporter_metrics(&self) -> &Arc<ExporterMetrics> {
        &self.exporter_metrics
    }
}
