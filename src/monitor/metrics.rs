use std::sync::atomic::{AtomicU64, Ordering};

/// 抓包计数器，多个接口线程并发累加
#[derive(Debug, Default)]
pub struct CaptureMetrics {
    frames_seen: AtomicU64,
    payload_segments: AtomicU64,
    payload_bytes: AtomicU64,
    callback_failures: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub frames_seen: u64,
    pub payload_segments: u64,
    pub payload_bytes: u64,
    pub callback_failures: u64,
}

impl CaptureMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame(&self) {
        self.frames_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_segment(&self, bytes: usize) {
        self.payload_segments.fetch_add(1, Ordering::Relaxed);
        self.payload_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_callback_failures(&self, count: usize) {
        self.callback_failures.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_seen: self.frames_seen.load(Ordering::Relaxed),
            payload_segments: self.payload_segments.load(Ordering::Relaxed),
            payload_bytes: self.payload_bytes.load(Ordering::Relaxed),
            callback_failures: self.callback_failures.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.frames_seen.store(0, Ordering::Relaxed);
        self.payload_segments.store(0, Ordering::Relaxed);
        self.payload_bytes.store(0, Ordering::Relaxed);
        self.callback_failures.store(0, Ordering::Relaxed);
    }
}
