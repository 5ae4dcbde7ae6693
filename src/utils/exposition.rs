//! Prometheus text exposition for enhanced monitoring samples
//!
//! Samples are produced per instance by the OS metrics mapping and grouped here
//! into metric families, so every family gets exactly one `# HELP`/`# TYPE`
//! header no matter how many instances contributed to it.

use serde::Serialize;
use std::collections::BTreeMap;

/// Trait for converting metrics to Prometheus text format
pub trait PrometheusFormat {
    /// Render as Prometheus text exposition (version 0.0.4)
    fn to_prometheus_format(&self) -> String;
}

/// A single labeled, timestamped sample ready for exposition
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MetricSample {
    /// Metric name (e.g., "node_load1")
    pub name: String,
    /// Help text shared by every sample of the family
    pub help: &'static str,
    /// Label key-value pairs, sorted for stable output
    pub labels: BTreeMap<String, String>,
    /// Metric value
    pub value: f64,
    /// Timestamp in milliseconds since the epoch
    pub timestamp: Option<i64>,
}

/// All samples sharing one metric name
#[derive(Clone, Debug, Default)]
pub struct PrometheusMetric {
    pub name: String,
    pub metric_type: Option<String>,
    pub help: Option<String>,
    pub samples: Vec<MetricSample>,
}

/// Metric families keyed by name
#[derive(Clone, Debug, Default)]
pub struct PrometheusMetrics {
    pub metrics: BTreeMap<String, PrometheusMetric>,
}

impl PrometheusMetrics {
    /// Create an empty metrics container
    pub fn new() -> Self {
        PrometheusMetrics {
            metrics: BTreeMap::new(),
        }
    }

    /// Get or create a metric family entry
    fn get_or_create_metric(&mut self, sample: &MetricSample) -> &mut PrometheusMetric {
        self.metrics
            .entry(sample.name.clone())
            .or_insert_with(|| PrometheusMetric {
                name: sample.name.clone(),
                metric_type: Some("gauge".to_string()),
                help: Some(sample.help.to_string()),
                samples: Vec::new(),
            })
    }

    /// Add one sample to its family
    pub fn push(&mut self, sample: MetricSample) {
        self.get_or_create_metric(&sample).samples.push(sample);
    }

    /// Add every sample from an iterator
    pub fn extend<'a>(&mut self, samples: impl IntoIterator<Item = &'a MetricSample>) {
        for sample in samples {
            self.push(sample.clone());
        }
    }

    /// Number of samples across all families
    pub fn sample_count(&self) -> usize {
        self.metrics.values().map(|m| m.samples.len()).sum()
    }
}

/// Escape label values for Prometheus format
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(ch),
        }
    }
    result
}

/// Escape help text (only backslash and newline are special there)
fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else {
        value.to_string()
    }
}

impl PrometheusFormat for PrometheusMetrics {
    fn to_prometheus_format(&self) -> String {
        let mut output = String::new();

        for metric in self.metrics.values() {
            if let Some(help) = &metric.help {
                output.push_str(&format!(
                    "# HELP {} {}\n",
                    metric.name,
                    escape_help(help)
                ));
            }

            if let Some(metric_type) = &metric.metric_type {
                output.push_str(&format!("# TYPE {} {}\n", metric.name, metric_type));
            }

            for sample in &metric.samples {
                output.push_str(&sample.name);

                if !sample.labels.is_empty() {
                    output.push('{');
                    let mut first = true;
                    for (label_name, label_value) in &sample.labels {
                        if !first {
                            output.push(',');
                        }
                        first = false;
                        output.push_str(&format!(
                            "{}=\"{}\"",
                            label_name,
                            escape_label_value(label_value)
                        ));
                    }
                    output.push('}');
                }

                output.push(' ');
                output.push_str(&format_value(sample.value));

                if let Some(timestamp) = sample.timestamp {
                    output.push(' ');
                    output.push_str(&timestamp.to_string());
                }

                output.push('\n');
            }
        }

        output
    }
}
