pub mod exporter_metrics;
pub mod instance;
pub mod log_source;
pub mod poll_loop;
pub mod poller;
pub mod reconciler;
pub mod snapshot_cache;

#[cfg(test)]
pub(crate) mod testing;
