//! 抓包统计

pub mod metrics;

pub use metrics::{CaptureMetrics, MetricsSnapshot};
