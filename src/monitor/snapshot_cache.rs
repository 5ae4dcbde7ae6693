use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use super::poll_loop::PollSnapshot;
use crate::utils::exposition::{PrometheusFormat, PrometheusMetrics};

type Snapshots = HashMap<String, Arc<PollSnapshot>>;

/// Latest snapshot of every poll group
///
/// Readers clone the inner `Arc` under a brief lock and never wait for a poll.
/// Publishing a snapshot builds a new map and swaps the pointer, replacing
/// only the publishing group's entry.
#[derive(Clone)]
pub struct SnapshotCache {
    current: Arc<Mutex<Arc<Snapshots>>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        SnapshotCache {
            current: Arc::new(Mutex::new(Arc::new(HashMap::new()))),
        }
    }

    /// Current view of all groups
    pub async fn snapshots(&self) -> Arc<Snapshots> {
        self.current.lock().await.clone()
    }

    /// Replace the stored snapshot of `snapshot.group`
    pub async fn install(&self, snapshot: PollSnapshot) {
        let group = snapshot.group.clone();
        let instances = snapshot.samples.len();
        let watermark = snapshot.watermark;
        let truncated = snapshot.truncated;
        let collected_at = snapshot.collected_at;

        let mut current = self.current.lock().await;
        let mut next: Snapshots = (**current).clone();
        next.insert(group.clone(), Arc::new(snapshot));
        *current = Arc::new(next);

        debug!(
            group = %group,
            instances,
            %watermark,
            truncated,
            %collected_at,
            "Snapshot installed"
        );
    }

    /// Install snapshots until every sender is gone
    pub async fn run(&self, mut receiver: mpsc::Receiver<PollSnapshot>) {
        while let Some(snapshot) = receiver.recv().await {
            self.install(snapshot).await;
        }
        info!("All poll loops stopped, snapshot cache updater exiting");
    }

    /// Prometheus text exposition of every stored sample
    pub async fn render_enhanced(&self) -> String {
        let snapshots = self.snapshots().await;

        let mut groups: Vec<&Arc<PollSnapshot>> = snapshots.values().collect();
        groups.sort_by(|a, b| a.group.cmp(&b.group));

        let mut metrics = PrometheusMetrics::new();
        for snapshot in groups {
            let mut ids: Vec<&String> = snapshot.samples.keys().collect();
            ids.sort();
            for id in ids {
                metrics.extend(&snapshot.samples[id]);
            }
        }

        debug!(samples = metrics.sample_count(), "Rendering enhanced metrics");
        metrics.to_prometheus_format()
    }

    /// Last raw message per resource id, across all groups
    pub async fn messages(&self) -> BTreeMap<String, String> {
        let snapshots = self.snapshots().await;
        snapshots
            .values()
            .flat_map(|s| s.messages.iter())
            .map(|(id, message)| (id.clone(), message.clone()))
            .collect()
    }
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::testing::{at, instance};
    use crate::utils::exposition::MetricSample;
    use chrono::Utc;

    fn snapshot(group: &str, names: &[&str]) -> PollSnapshot {
        let mut samples = HashMap::new();
        let mut messages = HashMap::new();
        for name in names {
            let inst = instance(name);
            let mut labels = BTreeMap::new();
            labels.insert("instance".to_string(), inst.instance.clone());
            labels.insert("region".to_string(), group.to_string());
            samples.insert(
                inst.resource_id.clone(),
                vec![MetricSample {
                    name: "node_load1".to_string(),
                    help: "System load average over 1 minute.",
                    labels,
                    value: 0.5,
                    timestamp: Some(at(10).timestamp_millis()),
                }],
            );
            let raw = format!("{{\"instanceID\":\"{name}\"}}");
            messages.insert(inst.resource_id.clone(), raw);
        }
        PollSnapshot {
            group: group.to_string(),
            samples,
            messages,
            watermark: at(10),
            truncated: false,
            collected_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_empty_cache_renders_nothing() {
        let cache = SnapshotCache::new();
        assert_eq!(cache.render_enhanced().await, "");
        assert!(cache.messages().await.is_empty());
    }

    #[tokio::test]
    async fn test_groups_do_not_erase_each_other() {
        let cache = SnapshotCache::new();
        cache.install(snapshot("us-east-1", &["a", "b"])).await;
        cache.install(snapshot("eu-west-1", &["c"])).await;

        let output = cache.render_enhanced().await;
        assert_eq!(output.matches("# TYPE node_load1 gauge").count(), 1);
        assert!(output.contains("instance=\"a\""));
        assert!(output.contains("instance=\"c\""));
        assert_eq!(cache.messages().await.len(), 3);
    }

    #[tokio::test]
    async fn test_new_snapshot_replaces_group() {
        let cache = SnapshotCache::new();
        cache.install(snapshot("us-east-1", &["a", "b"])).await;
        cache.install(snapshot("us-east-1", &["b"])).await;

        let output = cache.render_enhanced().await;
        assert!(!output.contains("instance=\"a\""));
        assert!(output.contains("instance=\"b\""));

        let messages = cache.messages().await;
        assert_eq!(messages.keys().collect::<Vec<_>>(), vec!["db-b"]);
    }

    #[tokio::test]
    async fn test_readers_keep_their_view() {
        let cache = SnapshotCache::new();
        cache.install(snapshot("us-east-1", &["a"])).await;

        let before = cache.snapshots().await;
        cache.install(snapshot("us-east-1", &["b"])).await;

        assert!(before["us-east-1"].samples.contains_key("db-a"));
        let after = cache.snapshots().await;
        assert!(after["us-east-1"].samples.contains_key("db-b"));
    }

    #[tokio::test]
    async fn test_run_drains_channel() {
        let cache = SnapshotCache::new();
        let (tx, rx) = mpsc::channel(4);
        tx.send(snapshot("us-east-1", &["a"])).await.unwrap();
        tx.send(snapshot("eu-west-1", &["c"])).await.unwrap();
        drop(tx);

        cache.run(rx).await;
        assert_eq!(cache.snapshots().await.len(), 2);
    }
}
