//! OS metrics to Prometheus samples
//!
//! Names follow node_exporter where a counterpart exists so that existing
//! dashboards work for RDS instances; everything else lives under the
//! `rdsosmetrics_` prefix. Kilobyte figures are converted to bytes.

use std::collections::BTreeMap;

use crate::monitor::instance::MonitoredInstance;
use crate::utils::exposition::MetricSample;
use crate::utils::os_metrics::{DiskIo, OsMetrics};

const KB: f64 = 1024.0;

/// Accumulates samples sharing one base label set and timestamp
struct SampleBuilder {
    base_labels: BTreeMap<String, String>,
    timestamp: i64,
    samples: Vec<MetricSample>,
}

impl SampleBuilder {
    fn new(instance: &MonitoredInstance, timestamp: i64) -> Self {
        let mut base_labels = instance.labels.clone();
        base_labels.insert("instance".to_string(), instance.instance.clone());
        base_labels.insert("region".to_string(), instance.region.clone());

        SampleBuilder {
            base_labels,
            timestamp,
            samples: Vec::new(),
        }
    }

    fn gauge(&mut self, name: impl Into<String>, help: &'static str, value: f64) {
        self.gauge_with(name, help, value, &[]);
    }

    fn gauge_opt(&mut self, name: impl Into<String>, help: &'static str, value: Option<f64>) {
        if let Some(value) = value {
            self.gauge(name, help, value);
        }
    }

    fn gauge_with(
        &mut self,
        name: impl Into<String>,
        help: &'static str,
        value: f64,
        extra: &[(&str, &str)],
    ) {
        let mut labels = self.base_labels.clone();
        for (key, val) in extra {
            labels.insert((*key).to_string(), (*val).to_string());
        }

        self.samples.push(MetricSample {
            name: name.into(),
            help,
            labels,
            value,
            timestamp: Some(self.timestamp),
        });
    }
}

impl OsMetrics {
    /// Build the labeled samples for this document
    ///
    /// Every sample carries the instance's configured labels plus `instance`
    /// and `region`, and the document's own timestamp.
    pub fn to_samples(&self, instance: &MonitoredInstance) -> Vec<MetricSample> {
        let mut b = SampleBuilder::new(instance, self.timestamp.timestamp_millis());

        b.gauge(
            "rdsosmetrics_timestamp",
            "Metrics timestamp (UNIX seconds).",
            self.timestamp.timestamp() as f64,
        );
        b.gauge(
            "rdsosmetrics_General_numVCPUs",
            "The number of virtual CPUs for the DB instance.",
            self.num_vcpus as f64,
        );

        if let Some(cpu) = &self.cpu_utilization {
            for (mode, value) in cpu.modes() {
                b.gauge_with(
                    "node_cpu_average",
                    "The percentage of CPU utilization.",
                    value,
                    &[("cpu", "All"), ("mode", mode)],
                );
            }
        }

        if let Some(load) = &self.load_average_minute {
            b.gauge(
                "node_load1",
                "The number of processes requesting CPU time over the last minute.",
                load.one,
            );
            b.gauge(
                "node_load5",
                "The number of processes requesting CPU time over the last 5 minutes.",
                load.five,
            );
            b.gauge(
                "node_load15",
                "The number of processes requesting CPU time over the last 15 minutes.",
                load.fifteen,
            );
        }

        if let Some(mem) = &self.memory {
            let bytes = |v: Option<f64>| v.map(|kb| kb * KB);
            b.gauge_opt(
                "node_memory_Active_bytes",
                "The amount of assigned memory, in bytes.",
                bytes(mem.active),
            );
            b.gauge_opt(
                "node_memory_Buffers_bytes",
                "The amount of memory used for buffering I/O requests prior to writing to the storage device, in bytes.",
                bytes(mem.buffers),
            );
            b.gauge_opt(
                "node_memory_Cached_bytes",
                "The amount of memory used for caching file system-based I/O.",
                bytes(mem.cached),
            );
            b.gauge_opt(
                "node_memory_Dirty_bytes",
                "The amount of memory pages in RAM that have been modified but not written to their related data block in storage, in bytes.",
                bytes(mem.dirty),
            );
            b.gauge_opt(
                "node_memory_MemFree_bytes",
                "The amount of unassigned memory, in bytes.",
                bytes(mem.free),
            );
            b.gauge_opt(
                "node_memory_HugePages_Free",
                "The number of free huge pages. Huge pages are a feature of the Linux kernel.",
                mem.huge_pages_free,
            );
            b.gauge_opt(
                "node_memory_HugePages_Rsvd",
                "The number of committed huge pages.",
                mem.huge_pages_rsvd,
            );
            b.gauge_opt(
                "node_memory_Hugepagesize_bytes",
                "The size for each huge pages unit, in bytes.",
                bytes(mem.huge_pages_size),
            );
            b.gauge_opt(
                "node_memory_HugePages_Surp",
                "The number of available surplus huge pages over the total.",
                mem.huge_pages_surp,
            );
            b.gauge_opt(
                "node_memory_HugePages_Total",
                "The total number of huge pages for the system.",
                mem.huge_pages_total,
            );
            b.gauge_opt(
                "node_memory_Inactive_bytes",
                "The amount of least-frequently used memory pages, in bytes.",
                bytes(mem.inactive),
            );
            b.gauge_opt(
                "node_memory_Mapped_bytes",
                "The total amount of file-system contents that is memory mapped inside a process address space, in bytes.",
                bytes(mem.mapped),
            );
            b.gauge_opt(
                "node_memory_PageTables_bytes",
                "The amount of memory used by page tables, in bytes.",
                bytes(mem.page_tables),
            );
            b.gauge_opt(
                "node_memory_Slab_bytes",
                "The amount of reusable kernel data structures, in bytes.",
                bytes(mem.slab),
            );
            b.gauge_opt(
                "node_memory_MemTotal_bytes",
                "The total amount of memory, in bytes.",
                bytes(mem.total),
            );
            b.gauge_opt(
                "node_memory_Writeback_bytes",
                "The amount of dirty pages in RAM that are still being written to the backing storage, in bytes.",
                bytes(mem.writeback),
            );
        }

        if let Some(tasks) = &self.tasks {
            b.gauge_opt(
                "node_procs_blocked",
                "The number of tasks that are blocked.",
                tasks.blocked,
            );
            b.gauge_opt(
                "node_procs_running",
                "The number of tasks that are running.",
                tasks.running,
            );
            b.gauge_opt(
                "rdsosmetrics_tasks_sleeping",
                "The number of tasks that are sleeping.",
                tasks.sleeping,
            );
            b.gauge_opt(
                "rdsosmetrics_tasks_stopped",
                "The number of tasks that are stopped.",
                tasks.stopped,
            );
            b.gauge_opt(
                "rdsosmetrics_tasks_total",
                "The total number of tasks.",
                tasks.total,
            );
            b.gauge_opt(
                "rdsosmetrics_tasks_zombie",
                "The number of child tasks that are inactive with an active parent task.",
                tasks.zombie,
            );
        }

        if let Some(swap) = &self.swap {
            b.gauge_opt(
                "node_memory_SwapCached_bytes",
                "The amount of swap memory used as cache memory, in bytes.",
                swap.cached.map(|kb| kb * KB),
            );
            b.gauge_opt(
                "node_memory_SwapFree_bytes",
                "The total amount of swap memory free, in bytes.",
                swap.free.map(|kb| kb * KB),
            );
            b.gauge_opt(
                "node_memory_SwapTotal_bytes",
                "The total amount of swap memory available, in bytes.",
                swap.total.map(|kb| kb * KB),
            );
            b.gauge_opt(
                "node_vmstat_pswpin",
                "The amount of memory, in kilobytes, swapped in from disk.",
                swap.swap_in,
            );
            b.gauge_opt(
                "node_vmstat_pswpout",
                "The amount of memory, in kilobytes, swapped out to disk.",
                swap.swap_out,
            );
        }

        for iface in &self.network {
            let labels = [("interface", iface.interface.as_str())];
            b.gauge_with(
                "rdsosmetrics_network_rx",
                "The number of bytes received per second.",
                iface.rx,
                &labels,
            );
            b.gauge_with(
                "rdsosmetrics_network_tx",
                "The number of bytes uploaded per second.",
                iface.tx,
                &labels,
            );
        }

        for disk in &self.disk_io {
            let device = disk.device.as_deref().unwrap_or("");
            for (field, help, value) in disk_io_fields(disk) {
                if let Some(value) = value {
                    b.gauge_with(
                        format!("rdsosmetrics_diskIO_{field}"),
                        help,
                        value,
                        &[("device", device)],
                    );
                }
            }
        }

        for fs in &self.file_sys {
            let labels = [
                ("name", fs.name.as_str()),
                ("mountpoint", fs.mount_point.as_str()),
            ];
            b.gauge_with(
                "node_filesystem_size_bytes",
                "The total amount of disk space available for the file system, in bytes.",
                fs.total * KB,
                &labels,
            );
            b.gauge_with(
                "node_filesystem_free_bytes",
                "The amount of disk space not used by the file system, in bytes.",
                (fs.total - fs.used) * KB,
                &labels,
            );
            b.gauge_with(
                "node_filesystem_files",
                "The maximum number of files that can be created for the file system.",
                fs.max_files,
                &labels,
            );
            b.gauge_with(
                "node_filesystem_files_free",
                "The number of files that can still be created for the file system.",
                fs.max_files - fs.used_files,
                &labels,
            );
            if let Some(pct) = fs.used_percent {
                b.gauge_with(
                    "rdsosmetrics_fileSys_usedPercent",
                    "The percentage of available disk-space in use.",
                    pct,
                    &labels,
                );
            }
            if let Some(pct) = fs.used_file_percent {
                b.gauge_with(
                    "rdsosmetrics_fileSys_usedFilePercent",
                    "The percentage of available files in use.",
                    pct,
                    &labels,
                );
            }
        }

        b.samples
    }
}

fn disk_io_fields(d: &DiskIo) -> [(&'static str, &'static str, Option<f64>); 18] {
    [
        (
            "avgQueueLen",
            "The number of requests waiting in the I/O device's queue.",
            d.avg_queue_len,
        ),
        (
            "avgReqSz",
            "The average request size, in kilobytes.",
            d.avg_req_sz,
        ),
        (
            "await",
            "The number of milliseconds required to respond to requests, including queue time and service time.",
            d.await_ms,
        ),
        (
            "readIOsPS",
            "The number of read operations per second.",
            d.read_ios_ps,
        ),
        ("readKb", "The total number of kilobytes read.", d.read_kb),
        (
            "readKbPS",
            "The number of kilobytes read per second.",
            d.read_kb_ps,
        ),
        (
            "rrqmPS",
            "The number of merged read requests queued per second.",
            d.rrqm_ps,
        ),
        ("tps", "The number of I/O transactions per second.", d.tps),
        (
            "util",
            "The percentage of CPU time during which requests were issued.",
            d.util,
        ),
        (
            "writeIOsPS",
            "The number of write operations per second.",
            d.write_ios_ps,
        ),
        (
            "writeKb",
            "The total number of kilobytes written.",
            d.write_kb,
        ),
        (
            "writeKbPS",
            "The number of kilobytes written per second.",
            d.write_kb_ps,
        ),
        (
            "wrqmPS",
            "The number of merged write requests queued per second.",
            d.wrqm_ps,
        ),
        (
            "diskQueueDepth",
            "The number of outstanding I/Os waiting to access the disk.",
            d.disk_queue_depth,
        ),
        (
            "readLatency",
            "The average amount of time taken per disk read operation, in milliseconds.",
            d.read_latency,
        ),
        (
            "readThroughput",
            "The amount of network throughput used by read requests, in bytes per second.",
            d.read_throughput,
        ),
        (
            "writeLatency",
            "The average amount of time taken per disk write operation, in milliseconds.",
            d.write_latency,
        ),
        (
            "writeThroughput",
            "The amount of network throughput used by write requests, in bytes per second.",
            d.write_throughput,
        ),
    ]
}
