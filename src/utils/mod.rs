pub mod exposition;
pub mod os_metrics;
pub mod os_samples;
