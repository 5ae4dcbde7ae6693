//! Enhanced monitoring OS metrics documents
//!
//! RDS writes one JSON document per instance and reporting period into the
//! `RDSOSMetrics` log group. The schema grows upstream without notice, so every
//! object keeps the fields it does not know about in an `unknown` map instead of
//! rejecting them. A strict parser reports those leftovers as an error, which is
//! how tests notice schema drift.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Fields present in the document but not modelled here
pub type UnknownFields = BTreeMap<String, Value>;

/// Errors returned while decoding a status message
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid OS metrics document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown fields in OS metrics document: {}", .0.join(", "))]
    UnknownFields(Vec<String>),
}

/// Decodes raw log event bodies into [`OsMetrics`]
#[derive(Clone, Copy, Debug, Default)]
pub struct MessageParser {
    /// Treat any unrecognized field as a parse error
    pub strict_unknown_fields: bool,
}

impl MessageParser {
    pub fn new(strict_unknown_fields: bool) -> Self {
        MessageParser {
            strict_unknown_fields,
        }
    }

    /// Parse one status message
    pub fn parse(&self, raw: &str) -> Result<OsMetrics, ParseError> {
        let metrics: OsMetrics = serde_json::from_str(raw)?;

        if self.strict_unknown_fields {
            let mut unknown = Vec::new();
            metrics.collect_unknown("", &mut unknown);
            if !unknown.is_empty() {
                return Err(ParseError::UnknownFields(unknown));
            }
        }

        Ok(metrics)
    }
}

/// Walks a decoded document and records the paths of unmodelled fields
trait CollectUnknown {
    fn collect_unknown(&self, prefix: &str, out: &mut Vec<String>);
}

fn push_unknown(unknown: &UnknownFields, prefix: &str, out: &mut Vec<String>) {
    for key in unknown.keys() {
        if prefix.is_empty() {
            out.push(key.clone());
        } else {
            out.push(format!("{prefix}.{key}"));
        }
    }
}

fn join_path(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_string()
    } else {
        format!("{prefix}.{field}")
    }
}

impl<T: CollectUnknown> CollectUnknown for Option<T> {
    fn collect_unknown(&self, prefix: &str, out: &mut Vec<String>) {
        if let Some(inner) = self {
            inner.collect_unknown(prefix, out);
        }
    }
}

impl<T: CollectUnknown> CollectUnknown for Vec<T> {
    fn collect_unknown(&self, prefix: &str, out: &mut Vec<String>) {
        for (idx, item) in self.iter().enumerate() {
            item.collect_unknown(&format!("{prefix}[{idx}]"), out);
        }
    }
}

/// One decoded enhanced monitoring document
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OsMetrics {
    pub engine: String,
    #[serde(rename = "instanceID")]
    pub instance_id: String,
    #[serde(rename = "instanceResourceID")]
    pub instance_resource_id: String,
    pub timestamp: DateTime<Utc>,
    #[allow(dead_code)]
    #[serde(default)]
    pub version: f64,
    #[serde(default)]
    pub uptime: String,
    #[serde(rename = "numVCPUs", default)]
    pub num_vcpus: i64,

    pub cpu_utilization: Option<CpuUtilization>,
    pub load_average_minute: Option<LoadAverageMinute>,
    pub memory: Option<Memory>,
    pub tasks: Option<Tasks>,
    pub swap: Option<Swap>,
    #[serde(default)]
    pub network: Vec<NetworkInterface>,
    #[serde(rename = "diskIO", default)]
    pub disk_io: Vec<DiskIo>,
    #[serde(rename = "fileSys", default)]
    pub file_sys: Vec<FileSystem>,
    /// Parsed for completeness, never exported
    #[serde(default)]
    pub process_list: Vec<Process>,

    #[serde(flatten)]
    pub unknown: UnknownFields,
}

impl CollectUnknown for OsMetrics {
    fn collect_unknown(&self, prefix: &str, out: &mut Vec<String>) {
        push_unknown(&self.unknown, prefix, out);
        self.cpu_utilization
            .collect_unknown(&join_path(prefix, "cpuUtilization"), out);
        self.load_average_minute
            .collect_unknown(&join_path(prefix, "loadAverageMinute"), out);
        self.memory.collect_unknown(&join_path(prefix, "memory"), out);
        self.tasks.collect_unknown(&join_path(prefix, "tasks"), out);
        self.swap.collect_unknown(&join_path(prefix, "swap"), out);
        self.network.collect_unknown(&join_path(prefix, "network"), out);
        self.disk_io.collect_unknown(&join_path(prefix, "diskIO"), out);
        self.file_sys.collect_unknown(&join_path(prefix, "fileSys"), out);
        self.process_list
            .collect_unknown(&join_path(prefix, "processList"), out);
    }
}

/// CPU time percentages by mode
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CpuUtilization {
    pub guest: Option<f64>,
    pub irq: Option<f64>,
    pub system: Option<f64>,
    pub wait: Option<f64>,
    pub idle: Option<f64>,
    pub user: Option<f64>,
    pub total: Option<f64>,
    pub steal: Option<f64>,
    pub nice: Option<f64>,

    #[serde(flatten)]
    pub unknown: UnknownFields,
}

impl CpuUtilization {
    /// (mode, percent) pairs for the modes present in the document
    pub fn modes(&self) -> Vec<(&'static str, f64)> {
        [
            ("guest", self.guest),
            ("irq", self.irq),
            ("system", self.system),
            ("wait", self.wait),
            ("idle", self.idle),
            ("user", self.user),
            ("total", self.total),
            ("steal", self.steal),
            ("nice", self.nice),
        ]
        .into_iter()
        .filter_map(|(mode, value)| value.map(|v| (mode, v)))
        .collect()
    }
}

impl CollectUnknown for CpuUtilization {
    fn collect_unknown(&self, prefix: &str, out: &mut Vec<String>) {
        push_unknown(&self.unknown, prefix, out);
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct LoadAverageMinute {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,

    #[serde(flatten)]
    pub unknown: UnknownFields,
}

impl CollectUnknown for LoadAverageMinute {
    fn collect_unknown(&self, prefix: &str, out: &mut Vec<String>) {
        push_unknown(&self.unknown, prefix, out);
    }
}

/// Memory figures, all in kilobytes except the huge page counts
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    pub active: Option<f64>,
    pub buffers: Option<f64>,
    pub cached: Option<f64>,
    pub dirty: Option<f64>,
    pub free: Option<f64>,
    pub huge_pages_free: Option<f64>,
    pub huge_pages_rsvd: Option<f64>,
    pub huge_pages_size: Option<f64>,
    pub huge_pages_surp: Option<f64>,
    pub huge_pages_total: Option<f64>,
    pub inactive: Option<f64>,
    pub mapped: Option<f64>,
    pub page_tables: Option<f64>,
    pub slab: Option<f64>,
    pub total: Option<f64>,
    pub writeback: Option<f64>,

    #[serde(flatten)]
    pub unknown: UnknownFields,
}

impl CollectUnknown for Memory {
    fn collect_unknown(&self, prefix: &str, out: &mut Vec<String>) {
        push_unknown(&self.unknown, prefix, out);
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Tasks {
    pub blocked: Option<f64>,
    pub running: Option<f64>,
    pub sleeping: Option<f64>,
    pub stopped: Option<f64>,
    pub total: Option<f64>,
    pub zombie: Option<f64>,

    #[serde(flatten)]
    pub unknown: UnknownFields,
}

impl CollectUnknown for Tasks {
    fn collect_unknown(&self, prefix: &str, out: &mut Vec<String>) {
        push_unknown(&self.unknown, prefix, out);
    }
}

/// Swap figures in kilobytes; `in`/`out` are kilobytes per second
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Swap {
    pub cached: Option<f64>,
    pub free: Option<f64>,
    pub total: Option<f64>,
    #[serde(rename = "in")]
    pub swap_in: Option<f64>,
    #[serde(rename = "out")]
    pub swap_out: Option<f64>,

    #[serde(flatten)]
    pub unknown: UnknownFields,
}

impl CollectUnknown for Swap {
    fn collect_unknown(&self, prefix: &str, out: &mut Vec<String>) {
        push_unknown(&self.unknown, prefix, out);
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct NetworkInterface {
    pub interface: String,
    pub rx: f64,
    pub tx: f64,

    #[serde(flatten)]
    pub unknown: UnknownFields,
}

impl CollectUnknown for NetworkInterface {
    fn collect_unknown(&self, prefix: &str, out: &mut Vec<String>) {
        push_unknown(&self.unknown, prefix, out);
    }
}

/// Per-device I/O statistics.
///
/// Classic engines report iostat-style fields with a device name; Aurora
/// reports latency/throughput fields and no device.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskIo {
    pub device: Option<String>,

    pub avg_queue_len: Option<f64>,
    pub avg_req_sz: Option<f64>,
    #[serde(rename = "await")]
    pub await_ms: Option<f64>,
    #[serde(rename = "readIOsPS")]
    pub read_ios_ps: Option<f64>,
    pub read_kb: Option<f64>,
    #[serde(rename = "readKbPS")]
    pub read_kb_ps: Option<f64>,
    #[serde(rename = "rrqmPS")]
    pub rrqm_ps: Option<f64>,
    pub tps: Option<f64>,
    pub util: Option<f64>,
    #[serde(rename = "writeIOsPS")]
    pub write_ios_ps: Option<f64>,
    pub write_kb: Option<f64>,
    #[serde(rename = "writeKbPS")]
    pub write_kb_ps: Option<f64>,
    #[serde(rename = "wrqmPS")]
    pub wrqm_ps: Option<f64>,

    pub disk_queue_depth: Option<f64>,
    pub read_latency: Option<f64>,
    pub read_throughput: Option<f64>,
    pub write_latency: Option<f64>,
    pub write_throughput: Option<f64>,

    #[serde(flatten)]
    pub unknown: UnknownFields,
}

impl CollectUnknown for DiskIo {
    fn collect_unknown(&self, prefix: &str, out: &mut Vec<String>) {
        push_unknown(&self.unknown, prefix, out);
    }
}

/// File system usage; `used`/`total` in kilobytes
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSystem {
    pub name: String,
    pub mount_point: String,
    pub used: f64,
    pub total: f64,
    pub used_files: f64,
    pub max_files: f64,
    pub used_percent: Option<f64>,
    pub used_file_percent: Option<f64>,

    #[serde(flatten)]
    pub unknown: UnknownFields,
}

impl CollectUnknown for FileSystem {
    fn collect_unknown(&self, prefix: &str, out: &mut Vec<String>) {
        push_unknown(&self.unknown, prefix, out);
    }
}

#[allow(dead_code)]
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    pub name: String,
    pub id: Option<i64>,
    pub tgid: Option<i64>,
    #[serde(rename = "parentID")]
    pub parent_id: Option<i64>,
    pub vss: Option<f64>,
    pub rss: Option<f64>,
    pub memory_used_pc: Option<f64>,
    pub cpu_used_pc: Option<f64>,

    #[serde(flatten)]
    pub unknown: UnknownFields,
}

impl CollectUnknown for Process {
    fn collect_unknown(&self, prefix: &str, out: &mut Vec<String>) {
        push_unknown(&self.unknown, prefix, out);
    }
}
