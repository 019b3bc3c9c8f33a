//! 日志模式抓取推流
//!
//! 抓包不可用时，轮询直播伴侣日志目录，读取最新日志全文并解析开播记录。

use log::{debug, error, info};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use crate::discovery::{DiscoveryState, ResultSink};
use crate::platform::default_log_dir;
use crate::protocol::common::decode_lossy;
use crate::protocol::LogRecordParser;

const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// 日志模式配置
#[derive(Debug, Clone)]
pub struct LogWatchConfig {
    pub dir: PathBuf,
    /// 文件名需包含的片段
    pub file_marker: String,
    /// 只看最近修改过的文件
    pub recency: Duration,
    pub poll_interval: Duration,
    /// 开播记录的时效窗口(秒)
    pub freshness_secs: i64,
}

impl Default for LogWatchConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            file_marker: "client".to_string(),
            recency: Duration::from_secs(180),
            poll_interval: Duration::from_secs(2),
            freshness_secs: 30,
        }
    }
}

/// 选出最近修改的日志文件
///
/// 候选文件: 普通文件、文件名包含 `marker`、修改时间距 `now` 不超过 `recency`。
pub fn latest_log_file(
    dir: &Path,
    marker: &str,
    recency: Duration,
    now: SystemTime,
) -> std::io::Result<Option<PathBuf>> {
    let mut newest: Option<(SystemTime, PathBuf)> = None;

    // 单个条目出错(例如轮转时被删除)只跳过该条目
    for entry in fs::read_dir(dir)?.flatten() {
        if !entry.file_name().to_string_lossy().contains(marker) {
            continue;
        }
        let path = entry.path();
        let modified = match fs::metadata(&path) {
            Ok(metadata) if metadata.is_file() => match metadata.modified() {
                Ok(modified) => modified,
                Err(e) => {
                    debug!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            },
            Ok(_) => continue,
            Err(e) => {
                debug!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };
        // 修改时间在未来时按 0 秒处理
        let age = now.duration_since(modified).unwrap_or_default();
        if age > recency {
            continue;
        }
        if newest.as_ref().map_or(true, |(best, _)| modified > *best) {
            newest = Some((modified, path));
        }
    }

    Ok(newest.map(|(_, path)| path))
}

struct Shared {
    running: AtomicBool,
    discovery: Mutex<DiscoveryState>,
    sink: ResultSink,
    parser: LogRecordParser,
}

impl Shared {
    /// 解析一次日志内容，凑齐后触发回调并停止
    fn absorb(&self, content: &str) {
        let mut state = self.discovery.lock();

        if let Some(record) = self.parser.parse(content) {
            debug!("Accepted startStream record at {}", record.timestamp);
            if state.update_server(record.url) {
                info!("Found stream server: {}", state.server().unwrap_or_default());
            }
            if state.update_key(record.key) {
                info!("Found stream key: {}", state.key().unwrap_or_default());
            }
        }

        let completed = state.take_completion();
        // 回调可能读取 state()，分发前释放锁
        drop(state);

        if let Some(credentials) = completed {
            self.running.store(false, Ordering::SeqCst);
            self.sink.dispatch(&credentials);
        }
    }
}

/// 日志模式抓取器
pub struct LogWatcher {
    config: LogWatchConfig,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LogWatcher {
    pub fn new(config: LogWatchConfig) -> Self {
        let parser = LogRecordParser::new().with_freshness(config.freshness_secs);
        Self {
            config,
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                discovery: Mutex::new(DiscoveryState::new()),
                sink: ResultSink::new(),
                parser,
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn add_callback<F>(&self, callback: F)
    where
        F: Fn(&str, &str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared.sink.add(callback);
    }

    /// 启动轮询线程
    ///
    /// 已在运行或日志目录不存在时返回 false。
    pub fn start(&self) -> bool {
        let mut worker = self.worker.lock();
        if self.shared.running.load(Ordering::SeqCst) {
            info!("Log capture is already running");
            return false;
        }
        if !self.config.dir.is_dir() {
            error!(
                "Log directory {} does not exist, is the broadcasting app installed?",
                self.config.dir.display()
            );
            return false;
        }

        // 上一轮自然结束的线程
        if let Some(previous) = worker.take() {
            let _ = previous.join();
        }

        self.shared.discovery.lock().reset();
        self.shared.running.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();
        match thread::Builder::new()
            .name("log-capture".to_string())
            .spawn(move || poll_logs(&shared, &config))
        {
            Ok(handle) => {
                *worker = Some(handle);
                info!("Started log capture in {}", self.config.dir.display());
                true
            }
            Err(e) => {
                error!("Failed to spawn log capture thread: {}", e);
                self.shared.running.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    /// 停止并等待轮询线程退出
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.lock().take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                error!("Log capture thread panicked");
            }
        }
        info!("Stopped log capture");
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> DiscoveryState {
        self.shared.discovery.lock().clone()
    }
}

fn poll_logs(shared: &Shared, config: &LogWatchConfig) {
    while shared.running.load(Ordering::SeqCst) {
        poll_once(shared, config);
        sleep_while_running(&shared.running, config.poll_interval);
    }
    debug!("Log capture loop exited");
}

fn poll_once(shared: &Shared, config: &LogWatchConfig) {
    let path = match latest_log_file(
        &config.dir,
        &config.file_marker,
        config.recency,
        SystemTime::now(),
    ) {
        Ok(Some(path)) => path,
        Ok(None) => return,
        Err(e) => {
            info!("Failed to scan log directory: {}", e);
            return;
        }
    };

    let content = match fs::read(&path) {
        Ok(bytes) => decode_lossy(&bytes),
        Err(e) => {
            info!("Failed to read {}: {}", path.display(), e);
            return;
        }
    };

    info!("Waiting for a live session to start, reading {}", path.display());
    shared.absorb(&content);
}

fn sleep_while_running(running: &AtomicBool, total: Duration) {
    let mut remaining = total;
    while !remaining.is_zero() && running.load(Ordering::SeqCst) {
        let step = remaining.min(SLEEP_SLICE);
        thread::sleep(step);
        remaining -= step;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::common::unix_now;
    use std::fs::File;
    use std::sync::mpsc;
    use std::time::Instant;
    use tempfile::TempDir;

    fn record(url: &str, key: &str, timestamp: i64) -> String {
        format!(
            "[info] [startStream]success {{\"url\":\"{}\",\"key\":\"{}\",\"timestamp\":\"{}\"}}\n",
            url, key, timestamp
        )
    }

    fn set_mtime(path: &Path, time: SystemTime) {
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    fn watcher(dir: &Path) -> LogWatcher {
        LogWatcher::new(LogWatchConfig {
            dir: dir.to_path_buf(),
            poll_interval: Duration::from_millis(50),
            ..LogWatchConfig::default()
        })
    }

    fn collect_results(watcher: &LogWatcher) -> mpsc::Receiver<(String, String)> {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        watcher.add_callback(move |server, key| {
            tx.lock().send((server.to_string(), key.to_string()))?;
            Ok(())
        });
        rx
    }

    #[test]
    fn test_latest_log_file_picks_newest() {
        let dir = TempDir::new().unwrap();
        let now = SystemTime::now();
        let older = dir.path().join("client_1.log");
        let newer = dir.path().join("client_2.log");
        let other = dir.path().join("render.log");
        fs::write(&older, "a").unwrap();
        fs::write(&newer, "b").unwrap();
        fs::write(&other, "c").unwrap();
        set_mtime(&older, now - Duration::from_secs(60));
        set_mtime(&newer, now - Duration::from_secs(10));
        set_mtime(&other, now);

        let found = latest_log_file(dir.path(), "client", Duration::from_secs(180), now).unwrap();
        assert_eq!(found, Some(newer));
    }

    #[test]
    fn test_latest_log_file_ignores_old_files() {
        let dir = TempDir::new().unwrap();
        let now = SystemTime::now();
        let stale = dir.path().join("client_old.log");
        fs::write(&stale, "a").unwrap();
        set_mtime(&stale, now - Duration::from_secs(181));

        let found = latest_log_file(dir.path(), "client", Duration::from_secs(180), now).unwrap();
        assert_eq!(found, None);
    }

    #[test]
    fn test_latest_log_file_skips_directories() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("client_dir")).unwrap();
        let found = latest_log_file(
            dir.path(),
            "client",
            Duration::from_secs(180),
            SystemTime::now(),
        )
        .unwrap();
        assert_eq!(found, None);
    }

    #[test]
    fn test_start_fails_without_directory() {
        let dir = TempDir::new().unwrap();
        let watcher = watcher(&dir.path().join("missing"));
        assert!(!watcher.start());
        assert!(!watcher.is_running());
    }

    #[test]
    fn test_start_refused_while_running() {
        let dir = TempDir::new().unwrap();
        let watcher = watcher(dir.path());
        assert!(watcher.start());
        assert!(!watcher.start());
        watcher.stop();
        assert!(!watcher.is_running());
    }

    #[test]
    fn test_fresh_record_fires_callback() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("client_main.log"),
            record("rtmp://push.example.com/live", "stream-9?sign=x", unix_now() - 5),
        )
        .unwrap();

        let watcher = watcher(dir.path());
        let rx = collect_results(&watcher);
        assert!(watcher.start());

        let (server, key) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(server, "rtmp://push.example.com/live");
        assert_eq!(key, "stream-9?sign=x");
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert!(!watcher.is_running());
        watcher.stop();
    }

    #[test]
    fn test_stale_record_ignored() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("client_main.log"),
            record("rtmp://push.example.com/live", "stream-9?sign=x", unix_now() - 120),
        )
        .unwrap();

        let watcher = watcher(dir.path());
        let rx = collect_results(&watcher);
        assert!(watcher.start());

        assert!(rx.recv_timeout(Duration::from_millis(400)).is_err());
        assert!(watcher.is_running());
        watcher.stop();
        assert!(watcher.state().server().is_none());
    }

    #[test]
    fn test_record_appended_later_is_picked_up() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("client_main.log");
        fs::write(&path, "[info] app started\n").unwrap();

        let watcher = watcher(dir.path());
        let rx = collect_results(&watcher);
        assert!(watcher.start());
        thread::sleep(Duration::from_millis(120));

        let mut content = fs::read_to_string(&path).unwrap();
        content.push_str(&record("rtmp://h/app", "stream-1?a=b", unix_now()));
        fs::write(&path, content).unwrap();

        let (server, key) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(server, "rtmp://h/app");
        assert_eq!(key, "stream-1?a=b");
        watcher.stop();
    }

    #[test]
    fn test_absorb_replaces_changed_values() {
        let dir = TempDir::new().unwrap();
        let watcher = watcher(dir.path());
        let now = unix_now();

        // 只看解析与更新，不启动线程
        watcher.shared.discovery.lock().reset();
        watcher.shared.running.store(true, Ordering::SeqCst);
        watcher.shared.discovery.lock().update_server("rtmp://old/app".to_string());
        watcher.shared.absorb(&record("rtmp://new/app", "stream-2?a=b", now));

        let state = watcher.state();
        assert_eq!(state.server(), Some("rtmp://new/app"));
        assert_eq!(state.key(), Some("stream-2?a=b"));
        assert!(state.is_completed());
        assert!(!watcher.is_running());
    }

    #[cfg(unix)]
    #[test]
    fn test_latest_log_file_skips_broken_entries() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("client_good.log");
        fs::write(&good, "a").unwrap();
        std::os::unix::fs::symlink(
            dir.path().join("rotated_away.log"),
            dir.path().join("client_broken.log"),
        )
        .unwrap();

        let found = latest_log_file(
            dir.path(),
            "client",
            Duration::from_secs(180),
            SystemTime::now(),
        )
        .unwrap();
        assert_eq!(found, Some(good));
    }

    #[test]
    fn test_callback_can_read_state() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("client_main.log"),
            record("rtmp://h/app", "stream-3?a=b", unix_now()),
        )
        .unwrap();

        let watcher = Arc::new(watcher(dir.path()));
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let weak = Arc::downgrade(&watcher);
        watcher.add_callback(move |_, _| {
            let watcher = weak
                .upgrade()
                .ok_or_else(|| anyhow::anyhow!("watcher dropped"))?;
            let state = watcher.state();
            tx.lock().send(state.key().map(str::to_string))?;
            Ok(())
        });
        assert!(watcher.start());

        let key = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(key.as_deref(), Some("stream-3?a=b"));
        watcher.stop();
    }

    #[test]
    fn test_stop_joins_worker() {
        let dir = TempDir::new().unwrap();
        let watcher = LogWatcher::new(LogWatchConfig {
            dir: dir.path().to_path_buf(),
            poll_interval: Duration::from_secs(2),
            ..LogWatchConfig::default()
        });
        assert!(watcher.start());

        let started = Instant::now();
        watcher.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(watcher.worker.lock().is_none());
    }
}
