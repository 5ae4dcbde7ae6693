use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::monitor::instance::MonitoredInstance;

// HTTP endpoint paths
pub const INDEX_URL: &str = "/";
pub const DEFAULT_ENHANCED_PATH: &str = "/enhanced";
pub const MESSAGES_URL: &str = "/messages";
pub const INSTANCES_URL: &str = "/instances";
pub const METRICS_URL: &str = "/metrics";

/// Log group RDS writes enhanced monitoring documents to
pub const DEFAULT_LOG_GROUP: &str = "RDSOSMetrics";

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

/// Check that `path` can be routed next to the fixed endpoints
pub fn validate_enhanced_path(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        bail!("enhanced path {path:?} must start with '/'");
    }
    if path.contains("//") || path.contains(['{', '}', '*']) {
        bail!("enhanced path {path:?} must be a plain path");
    }
    let reserved = [INDEX_URL, MESSAGES_URL, INSTANCES_URL, METRICS_URL];
    if reserved.contains(&path) {
        bail!("enhanced path {path:?} is already served by the exporter");
    }
    Ok(())
}

/// Contents of the YAML configuration file
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub instances: Vec<MonitoredInstance>,

    /// Timeout of a single log query request
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Config {
    /// Read and validate the configuration file at `path`
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_yaml(&contents)
            .with_context(|| format!("loading config file {}", path.display()))
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(contents).context("parsing config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.instances.is_empty() {
            bail!("no instances configured");
        }
        if self.request_timeout.is_zero() {
            bail!("request_timeout must be > 0");
        }

        let mut seen = HashSet::new();
        for (idx, instance) in self.instances.iter().enumerate() {
            let name = &instance.instance;
            if instance.region.is_empty() {
                bail!("instances[{idx}]: region missing");
            }
            if name.is_empty() {
                bail!("instances[{idx}]: instance missing");
            }
            if instance.resource_id.is_empty() {
                bail!("instances[{idx}] ({name}): resource_id missing");
            }
            if !seen.insert(instance.resource_id.as_str()) {
                bail!(
                    "instances[{idx}] ({name}): duplicate resource_id {}",
                    instance.resource_id
                );
            }
            if instance.enhanced_monitoring_interval == Some(Duration::ZERO) {
                bail!(
                    "instances[{idx}] ({name}): enhanced_monitoring_interval must be > 0"
                );
            }

            // Requests are sent unsigned, so the endpoint has to sign them.
            let endpoint = instance.endpoint();
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                bail!(
                    "instances[{idx}] ({name}): logs_endpoint is not a signing proxy URL"
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
request_timeout: 5s
instances:
  - region: us-east-1
    instance: rds-mysql57
    resource_id: db-J6JH3LJAWBZ6MXDDWYRG4RRJ6A
    enhanced_monitoring_interval: 10s
    logs_endpoint: http://127.0.0.1:8080
    labels:
      env: prod
  - region: us-east-1
    instance: aurora-pg-1
    resource_id: db-P5QCHK7PNGYH7ABB2CNQYJLUWA
    disable_enhanced_metrics: true
    logs_endpoint: http://127.0.0.1:8080
  - region: eu-west-1
    instance: rds-pg-eu
    resource_id: db-XQ2IOZHHMUDM5CKHSTCG4E4BHE
    logs_endpoint: http://127.0.0.1:4566
"#;

    #[test]
    fn test_parse_sample_config() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.instances.len(), 3);

        let mysql = &config.instances[0];
        assert_eq!(
            mysql.enhanced_monitoring_interval,
            Some(Duration::from_secs(10))
        );
        assert_eq!(mysql.labels["env"], "prod");
        assert!(!mysql.disable_enhanced_metrics);

        assert!(config.instances[1].disable_enhanced_metrics);
        assert_eq!(config.instances[1].enhanced_monitoring_interval, None);
        assert_eq!(config.instances[2].logs_endpoint, "http://127.0.0.1:4566");
    }

    #[test]
    fn test_default_request_timeout() {
        let yaml = r#"
instances:
  - region: us-east-1
    instance: a
    resource_id: db-A
    logs_endpoint: http://127.0.0.1:8080
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.instances.len(), 3);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(dir.path().join("absent.yml")).unwrap_err();
        assert!(format!("{err:#}").contains("absent.yml"));
    }

    #[test]
    fn test_rejects_empty_instances() {
        assert!(Config::from_yaml("instances: []\n").is_err());
    }

    #[test]
    fn test_rejects_duplicate_resource_id() {
        let yaml = r#"
instances:
  - region: us-east-1
    instance: a
    resource_id: db-A
    logs_endpoint: http://127.0.0.1:8080
  - region: eu-west-1
    instance: b
    resource_id: db-A
    logs_endpoint: http://127.0.0.1:8080
"#;
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(format!("{err:#}").contains("duplicate resource_id db-A"));
    }

    #[test]
    fn test_rejects_missing_resource_id() {
        let yaml = r#"
instances:
  - region: us-east-1
    instance: a
    resource_id: ""
    logs_endpoint: http://127.0.0.1:8080
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_rejects_zero_interval() {
        let yaml = r#"
instances:
  - region: us-east-1
    instance: a
    resource_id: db-A
    enhanced_monitoring_interval: 0s
    logs_endpoint: http://127.0.0.1:8080
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_rejects_instance_without_logs_endpoint() {
        let missing = r#"
instances:
  - region: us-east-1
    instance: a
    resource_id: db-A
"#;
        let err = Config::from_yaml(missing).unwrap_err();
        assert!(format!("{err:#}").contains("logs_endpoint"));

        let empty = r#"
instances:
  - region: us-east-1
    instance: a
    resource_id: db-A
    logs_endpoint: ""
"#;
        let err = Config::from_yaml(empty).unwrap_err();
        assert!(format!("{err:#}").contains("signing proxy"));
    }

    #[test]
    fn test_rejects_unknown_top_level_key() {
        let yaml = "instance: []\n";
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_enhanced_path_validation() {
        assert!(validate_enhanced_path(DEFAULT_ENHANCED_PATH).is_ok());
        assert!(validate_enhanced_path("/rds/os").is_ok());

        assert!(validate_enhanced_path("enhanced").is_err());
        assert!(validate_enhanced_path("").is_err());
        assert!(validate_enhanced_path("//enhanced").is_err());
        assert!(validate_enhanced_path("/{instance}").is_err());
        for reserved in ["/", "/messages", "/instances", "/metrics"] {
            let err = validate_enhanced_path(reserved).unwrap_err();
            assert!(err.to_string().contains("already served"));
        }
    }
}
