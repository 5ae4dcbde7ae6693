use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound for a poll group's interval
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// One RDS instance under observation
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct MonitoredInstance {
    /// AWS region, e.g. "us-east-1"
    pub region: String,
    /// DB instance identifier, exported as the `instance` label
    pub instance: String,
    /// DbiResourceId, also the log stream name in `RDSOSMetrics`
    pub resource_id: String,
    /// Extra labels attached to every sample of this instance
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub disable_enhanced_metrics: bool,
    /// Granularity configured for enhanced monitoring on this instance
    #[serde(default, with = "humantime_serde")]
    pub enhanced_monitoring_interval: Option<Duration>,
    /// CloudWatch Logs endpoint that signs requests for this region
    pub logs_endpoint: String,
}

impl MonitoredInstance {
    /// Endpoint used for log queries of this instance
    pub fn endpoint(&self) -> &str {
        self.logs_endpoint.trim_end_matches('/')
    }
}

/// Instances sharing one upstream endpoint, and therefore one watermark
#[derive(Clone, Debug)]
pub struct PollGroup {
    pub name: String,
    pub region: String,
    pub logs_endpoint: String,
    pub instances: Arc<[MonitoredInstance]>,
    pub interval: Duration,
}

/// Read-only view of every configured instance
#[derive(Clone, Debug, Default)]
pub struct InstanceDirectory {
    instances: Arc<[MonitoredInstance]>,
}

impl InstanceDirectory {
    pub fn new(instances: Vec<MonitoredInstance>) -> Self {
        InstanceDirectory {
            instances: instances.into(),
        }
    }

    pub fn instances(&self) -> &[MonitoredInstance] {
        &self.instances
    }

    /// Split instances into poll groups by (region, logs endpoint)
    ///
    /// A group polls every `min(enhanced_monitoring_interval)` of its
    /// instances, capped at [`MAX_POLL_INTERVAL`]. Groups are returned in
    /// first-seen order.
    pub fn poll_groups(&self) -> Vec<PollGroup> {
        let mut order: Vec<(String, String)> = Vec::new();
        let mut members: HashMap<(String, String), Vec<MonitoredInstance>> = HashMap::new();

        for instance in self.instances.iter() {
            let key = (instance.region.clone(), instance.endpoint().to_string());
            if !members.contains_key(&key) {
                order.push(key.clone());
            }
            members.entry(key).or_default().push(instance.clone());
        }

        order
            .into_iter()
            .filter_map(|key| {
                let instances = members.remove(&key)?;
                let interval = instances
                    .iter()
                    .filter_map(|i| i.enhanced_monitoring_interval)
                    .filter(|d| !d.is_zero())
                    .fold(MAX_POLL_INTERVAL, |acc, d| acc.min(d));
                let (region, logs_endpoint) = key;
                Some(PollGroup {
                    name: format!("{region}@{logs_endpoint}"),
                    region,
                    logs_endpoint,
                    instances: instances.into(),
                    interval,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROXY: &str = "http://127.0.0.1:8080";

    fn instance(region: &str, name: &str, interval: Option<u64>) -> MonitoredInstance {
        MonitoredInstance {
            region: region.to_string(),
            instance: name.to_string(),
            resource_id: format!("db-{name}"),
            enhanced_monitoring_interval: interval.map(Duration::from_secs),
            logs_endpoint: PROXY.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let mut inst = instance("eu-west-1", "a", None);
        assert_eq!(inst.endpoint(), PROXY);

        inst.logs_endpoint = format!("{PROXY}/");
        assert_eq!(inst.endpoint(), PROXY);
    }

    #[test]
    fn test_poll_groups_by_region() {
        let dir = InstanceDirectory::new(vec![
            instance("us-east-1", "a", None),
            instance("eu-west-1", "b", None),
            instance("us-east-1", "c", None),
        ]);

        let groups = dir.poll_groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].name, "us-east-1@http://127.0.0.1:8080");
        assert_eq!(groups[0].region, "us-east-1");
        assert_eq!(groups[0].instances.len(), 2);
        assert_eq!(groups[0].instances[1].instance, "c");
        assert_eq!(groups[1].region, "eu-west-1");
    }

    #[test]
    fn test_poll_group_interval_is_smallest_capped() {
        let dir = InstanceDirectory::new(vec![
            instance("us-east-1", "a", Some(30)),
            instance("us-east-1", "b", Some(5)),
            instance("eu-west-1", "c", Some(120)),
            instance("ap-south-1", "d", None),
        ]);

        let groups = dir.poll_groups();
        assert_eq!(groups[0].interval, Duration::from_secs(5));
        assert_eq!(groups[1].interval, MAX_POLL_INTERVAL);
        assert_eq!(groups[2].interval, MAX_POLL_INTERVAL);
    }

    #[test]
    fn test_endpoint_splits_group() {
        let mut other = instance("us-east-1", "b", None);
        other.logs_endpoint = "http://proxy:8080/".to_string();
        let dir = InstanceDirectory::new(vec![instance("us-east-1", "a", None), other]);

        let groups = dir.poll_groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].name, "us-east-1@http://proxy:8080");
        assert_eq!(groups[1].logs_endpoint, "http://proxy:8080");
    }
}
