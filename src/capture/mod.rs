//! 数据包捕获模块
//!
//! 每个网络接口一个抓包线程，任一接口凑齐推流地址和推流码后停止全部接口。

pub mod interface;
pub mod packet;

pub use interface::InterfaceManager;
pub use packet::{CaptureSource, Frame, PacketFilter, PcapSource, Segment};

use chrono::Local;
use log::{error, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::discovery::{DiscoveryState, ResultSink};
use crate::error::{Result, SnifferError};
use crate::monitor::{CaptureMetrics, MetricsSnapshot};
use crate::protocol::common::decode_lossy;
use crate::protocol::RtmpHandshakeParser;

/// 数据包审计日志的 target
pub const PACKET_LOG_TARGET: &str = "packet";

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// 捕获配置
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// stop() 等待线程退出的上限
    pub join_timeout: Duration,
    /// 检测可用时每个接口的抓包时长
    pub probe_timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            join_timeout: Duration::from_millis(200),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

struct Session {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

struct Shared {
    running: AtomicBool,
    sessions: Mutex<HashMap<String, Session>>,
    // 锁顺序: discovery 先于 sessions
    discovery: Mutex<DiscoveryState>,
    sink: ResultSink,
    metrics: CaptureMetrics,
    parser: RtmpHandshakeParser,
}

impl Shared {
    fn process_segment(&self, segment: &Segment) {
        self.metrics.record_segment(segment.payload.len());
        info!(
            target: PACKET_LOG_TARGET,
            "[{}] {} -> {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            segment.source,
            segment.destination
        );

        let payload = decode_lossy(&segment.payload);

        let mut state = self.discovery.lock();
        if state.needs_server() {
            if let Some(server) = self.parser.extract_server(&payload) {
                info!(">>> Found stream server: {}", server);
                state.fill_server(server);
            }
        }
        if state.needs_key() {
            if let Some(key) = self.parser.extract_key(&payload) {
                info!(">>> Found stream key: {}", key);
                state.fill_key(key);
            }
        }
        if let Some(credentials) = state.take_completion() {
            let report = self.sink.dispatch(&credentials);
            self.metrics.record_callback_failures(report.failed);
            self.halt();
            info!("Stream credentials captured, stopping capture on all interfaces");
        }
    }

    /// 工作线程退出时调用
    ///
    /// 线程仍属于当前周期且已无存活接口时清除全局标志，避免停留在"抓包中"。
    /// 调用方不能持有 sessions 锁。
    fn release(&self, running: &Arc<AtomicBool>) {
        let sessions = self.sessions.lock();
        let current = sessions.values().any(|s| Arc::ptr_eq(&s.running, running));
        if current && sessions.values().all(|s| !s.running.load(Ordering::SeqCst)) {
            self.running.store(false, Ordering::SeqCst);
            info!("No capture thread left, capture stopped");
        }
    }

    /// 清除全局与所有接口的运行标志
    fn halt(&self) {
        self.running.store(false, Ordering::SeqCst);
        for session in self.sessions.lock().values() {
            session.running.store(false, Ordering::SeqCst);
        }
    }
}

/// 线程退出时(包括 panic)清除接口运行标志
struct RunningGuard<'a> {
    shared: &'a Shared,
    running: &'a Arc<AtomicBool>,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.shared.release(self.running);
    }
}

/// 多接口抓包调度器
pub struct CaptureSupervisor<S: CaptureSource = PcapSource> {
    source: Arc<S>,
    config: CaptureConfig,
    shared: Arc<Shared>,
}

impl<S: CaptureSource> CaptureSupervisor<S> {
    pub fn new(source: S, config: CaptureConfig) -> Self {
        Self {
            source: Arc::new(source),
            config,
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                sessions: Mutex::new(HashMap::new()),
                discovery: Mutex::new(DiscoveryState::new()),
                sink: ResultSink::new(),
                metrics: CaptureMetrics::new(),
                parser: RtmpHandshakeParser::new(),
            }),
        }
    }

    /// 注册结果回调，应在 start 之前调用
    ///
    /// 回调在发现状态的锁内执行，回调中不能调用 `state()`，否则死锁。
    /// 调用 `stop()` 是安全的。
    pub fn add_callback<F>(&self, callback: F)
    where
        F: Fn(&str, &str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared.sink.add(callback);
    }

    pub fn start(&self, label: &str) -> Result<usize> {
        self.start_multi([label])
    }

    /// 在多个接口上开始捕获，返回成功启动的接口数
    ///
    /// 单个接口解析失败只记录日志。
    pub fn start_multi<I, L>(&self, labels: I) -> Result<usize>
    where
        I: IntoIterator<Item = L>,
        L: AsRef<str>,
    {
        // 回调内(已持有 discovery 锁)调用时在这里返回
        if self.shared.running.load(Ordering::SeqCst) {
            return Err(SnifferError::AlreadyRunning);
        }

        // 按锁顺序先取 discovery 再取 sessions，运行标志在 sessions 锁内切换，
        // 与退出线程的 release 串行
        let mut state = self.shared.discovery.lock();
        let mut sessions = self.shared.sessions.lock();
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(SnifferError::AlreadyRunning);
        }
        state.reset();
        drop(state);

        self.shared.metrics.reset();
        sessions.clear();
        if self.shared.sink.is_empty() {
            warn!("No result callbacks registered");
        }

        let mut started = 0;
        for label in labels {
            let label = label.as_ref();
            let interface = match self.source.resolve(label) {
                Ok(interface) => interface,
                Err(e) => {
                    error!("Cannot capture on {}: {}", label, e);
                    continue;
                }
            };
            if sessions.contains_key(&interface) {
                warn!("Capture already active on {}", interface);
                continue;
            }

            let running = Arc::new(AtomicBool::new(true));
            let spawned = thread::Builder::new()
                .name(format!("capture-{}", interface))
                .spawn({
                    let source = Arc::clone(&self.source);
                    let shared = Arc::clone(&self.shared);
                    let running = Arc::clone(&running);
                    let interface = interface.clone();
                    move || run_worker(source.as_ref(), &shared, &interface, &running)
                });

            match spawned {
                Ok(handle) => {
                    sessions.insert(interface.clone(), Session { running, handle });
                    info!("Started packet capture on {}", interface);
                    started += 1;
                }
                Err(e) => error!("Failed to spawn capture thread for {}: {}", interface, e),
            }
        }

        if started == 0 {
            self.shared.running.store(false, Ordering::SeqCst);
        }
        Ok(started)
    }

    /// 停止所有接口
    ///
    /// 并行等待线程退出，最多 `join_timeout`；调用方自身的线程不等待。
    /// 无论线程是否按时退出，记录都会被清空。
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);

        let sessions: Vec<(String, Session)> = {
            let mut sessions = self.shared.sessions.lock();
            for session in sessions.values() {
                session.running.store(false, Ordering::SeqCst);
            }
            sessions.drain().collect()
        };

        let current = thread::current().id();
        let deadline = Instant::now() + self.config.join_timeout;
        for (interface, session) in sessions {
            if session.handle.thread().id() == current {
                continue;
            }
            while !session.handle.is_finished() && Instant::now() < deadline {
                thread::sleep(JOIN_POLL_INTERVAL);
            }
            if session.handle.is_finished() {
                if session.handle.join().is_err() {
                    error!("Capture thread on {} panicked", interface);
                }
            } else {
                warn!(
                    "Capture thread on {} did not exit within {:?}",
                    interface, self.config.join_timeout
                );
            }
        }

        let metrics = self.shared.metrics.snapshot();
        info!(
            "Stopped packet capture on all interfaces ({} frames, {} payload segments)",
            metrics.frames_seen, metrics.payload_segments
        );
    }

    /// 检测接口上能否抓到数据，结果通过回调异步返回
    pub fn test<F>(&self, labels: Vec<String>, callback: F) -> Result<JoinHandle<()>>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let source = Arc::clone(&self.source);
        let timeout = self.config.probe_timeout;
        let handle = thread::Builder::new()
            .name("capture-probe".to_string())
            .spawn(move || callback(probe(source.as_ref(), &labels, timeout)))?;
        Ok(handle)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// 运行标志仍为 true 的接口
    pub fn active_interfaces(&self) -> Vec<String> {
        let mut active: Vec<String> = self
            .shared
            .sessions
            .lock()
            .iter()
            .filter(|(_, s)| s.running.load(Ordering::SeqCst))
            .map(|(name, _)| name.clone())
            .collect();
        active.sort();
        active
    }

    #[cfg(test)]
    fn session_count(&self) -> usize {
        self.shared.sessions.lock().len()
    }

    pub fn state(&self) -> DiscoveryState {
        self.shared.discovery.lock().clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }
}

fn run_worker<S: CaptureSource + ?Sized>(
    source: &S,
    shared: &Shared,
    interface: &str,
    running: &Arc<AtomicBool>,
) {
    let _guard = RunningGuard { shared, running };
    let should_stop =
        || !running.load(Ordering::SeqCst) || !shared.running.load(Ordering::SeqCst);

    let mut on_frame = |frame: Frame<'_>| {
        if should_stop() {
            return;
        }
        shared.metrics.record_frame();
        if let Some(segment) = Segment::from_frame(frame) {
            shared.process_segment(&segment);
        }
    };

    match source.sniff(interface, &mut on_frame, &should_stop, None) {
        Ok(frames) => info!("Capture on {} finished after {} frames", interface, frames),
        Err(e) => error!("Capture error on {}: {}", interface, e),
    }
}

fn probe<S: CaptureSource + ?Sized>(source: &S, labels: &[String], timeout: Duration) -> bool {
    for label in labels {
        let interface = match source.resolve(label) {
            Ok(interface) => interface,
            Err(e) => {
                warn!("Skipping probe on {}: {}", label, e);
                continue;
            }
        };

        let seen = std::cell::Cell::new(0u64);
        let result = source.sniff_any(
            &interface,
            &mut |_| seen.set(seen.get() + 1),
            &|| seen.get() > 0,
            Some(timeout),
        );
        match result {
            Ok(_) if seen.get() > 0 => {
                info!("Traffic observed on {}", interface);
                return true;
            }
            Ok(_) => info!("No traffic on {} within {:?}", interface, timeout),
            Err(e) => error!("Probe capture on {} failed: {}", interface, e),
        }
    }
    false
}
