mod capture;
mod cli;
mod discovery;
mod error;
mod logwatch;
mod monitor;
mod obs;
mod platform;
mod protocol;

use clap::Parser;
use cli::{Args, Command, Config};
use capture::{CaptureSupervisor, InterfaceManager, PcapSource};
use discovery::{Credentials, DiscoveryState};
use error::{Result, SnifferError};
use log::{info, warn};
use logwatch::LogWatcher;
use obs::ObsServiceWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// 检查工作线程是否仍在运行的间隔
const LIVENESS_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let args = Args::parse();

    // 加载配置
    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    // 初始化日志，RUST_LOG 可覆盖，例如 RUST_LOG=packet=off
    let level = args.log_level.as_deref().unwrap_or(&config.log_level);
    env_logger::Builder::new()
        .filter_level(level.parse().unwrap_or(log::LevelFilter::Info))
        .parse_default_env()
        .init();

    match args.command {
        Command::Interfaces => list_interfaces(),
        Command::Sniff { interface, all } => sniff(&config, interface, all, args.json).await,
        Command::Probe { interface } => probe(&config, interface).await,
        Command::WatchLog { dir } => watch_log(&config, dir, args.json).await,
    }
}

fn list_interfaces() -> Result<()> {
    let listing = InterfaceManager::load()?;
    for label in &listing.interfaces {
        let marker = if listing.default.as_ref() == Some(label) { "*" } else { " " };
        println!("{} {}", marker, label);
    }
    info!(
        "{} interfaces, {} connected",
        listing.interfaces.len(),
        listing.active_count
    );
    Ok(())
}

/// 命令行优先，其次配置文件，最后使用默认接口
fn select_interfaces(config: &Config, requested: Vec<String>, all: bool) -> Result<Vec<String>> {
    if !requested.is_empty() {
        return Ok(requested);
    }
    if !all && !config.capture.interfaces.is_empty() {
        return Ok(config.capture.interfaces.clone());
    }

    let listing = InterfaceManager::load()?;
    let selected: Vec<String> = if all {
        listing.interfaces
    } else {
        listing.default.into_iter().collect()
    };
    if selected.is_empty() {
        return Err(SnifferError::Interface(
            "no interface selected, pass --interface or --all".to_string(),
        ));
    }
    Ok(selected)
}

/// 结果通过通道转回异步侧
fn channel_callback(
    tx: mpsc::UnboundedSender<Credentials>,
) -> impl Fn(&str, &str) -> anyhow::Result<()> + Send + Sync + 'static {
    move |server, key| {
        tx.send(Credentials {
            server: server.to_string(),
            key: key.to_string(),
        })
        .map_err(|_| anyhow::anyhow!("result receiver dropped"))
    }
}

fn obs_callback(path: &Path) -> impl Fn(&str, &str) -> anyhow::Result<()> + Send + Sync + 'static {
    let writer = ObsServiceWriter::new(path);
    info!("Results will be synced to {}", writer.path().display());
    writer.into_callback()
}

async fn sniff(config: &Config, requested: Vec<String>, all: bool, json: bool) -> Result<()> {
    let labels = select_interfaces(config, requested, all)?;

    let supervisor = Arc::new(CaptureSupervisor::new(
        PcapSource::new(config.capture.packet_filter()),
        config.capture.capture_config(),
    ));

    let (tx, mut rx) = mpsc::unbounded_channel();
    supervisor.add_callback(channel_callback(tx));
    if let Some(path) = &config.obs_service_path {
        supervisor.add_callback(obs_callback(path));
    }

    let started = match labels.as_slice() {
        [single] => supervisor.start(single)?,
        many => supervisor.start_multi(many)?,
    };
    if started == 0 {
        return Err(SnifferError::Interface(
            "none of the selected interfaces could be opened".to_string(),
        ));
    }
    info!(
        "Waiting for stream handshake on {} interface(s): {}",
        started,
        supervisor.active_interfaces().join(", ")
    );

    let outcome = {
        let supervisor = Arc::clone(&supervisor);
        wait_for_result(&mut rx, move || supervisor.is_running()).await
    };

    let state = supervisor.state();
    let stopper = Arc::clone(&supervisor);
    tokio::task::spawn_blocking(move || stopper.stop()).await?;

    let metrics = supervisor.metrics();
    info!(
        "Capture summary: {} frames, {} payload segments, {} bytes, {} callback failures",
        metrics.frames_seen, metrics.payload_segments, metrics.payload_bytes, metrics.callback_failures
    );

    report(outcome, &state, json)
}

async fn probe(config: &Config, requested: Vec<String>) -> Result<()> {
    let labels = select_interfaces(config, requested, false)?;
    let supervisor = CaptureSupervisor::new(
        PcapSource::new(config.capture.packet_filter()),
        config.capture.capture_config(),
    );

    let (tx, rx) = oneshot::channel();
    supervisor.test(labels, move |seen| {
        let _ = tx.send(seen);
    })?;

    let seen = rx.await.unwrap_or(false);
    if seen {
        println!("Traffic captured, interface is usable");
    } else {
        println!("No traffic captured within {}s", config.capture.probe_timeout_secs);
    }
    Ok(())
}

async fn watch_log(config: &Config, dir: Option<PathBuf>, json: bool) -> Result<()> {
    let mut watch_config = config.log_watch.watch_config();
    if let Some(dir) = dir {
        watch_config.dir = dir;
    }
    let log_dir = watch_config.dir.clone();

    let watcher = Arc::new(LogWatcher::new(watch_config));
    let (tx, mut rx) = mpsc::unbounded_channel();
    watcher.add_callback(channel_callback(tx));
    if let Some(path) = &config.obs_service_path {
        watcher.add_callback(obs_callback(path));
    }

    if !watcher.start() {
        return Err(SnifferError::LogDirMissing(log_dir));
    }
    info!("Watching {} for stream records", log_dir.display());

    let outcome = {
        let watcher = Arc::clone(&watcher);
        wait_for_result(&mut rx, move || watcher.is_running()).await
    };

    let state = watcher.state();
    let stopper = Arc::clone(&watcher);
    tokio::task::spawn_blocking(move || stopper.stop()).await?;

    report(outcome, &state, json)
}

/// 等待结果、Ctrl-C 或所有工作线程退出
async fn wait_for_result<F>(
    rx: &mut mpsc::UnboundedReceiver<Credentials>,
    is_alive: F,
) -> Option<Credentials>
where
    F: Fn() -> bool,
{
    let mut ticker = tokio::time::interval(LIVENESS_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            credentials = rx.recv() => return credentials,
            _ = &mut ctrl_c => {
                info!("Interrupted, stopping");
                return None;
            }
            _ = ticker.tick() => {
                if !is_alive() {
                    // 标志清除与结果分发之间有先后，留一个间隔接收
                    return tokio::time::timeout(LIVENESS_INTERVAL, rx.recv())
                        .await
                        .ok()
                        .flatten();
                }
            }
        }
    }
}

fn report(outcome: Option<Credentials>, state: &DiscoveryState, json: bool) -> Result<()> {
    let elapsed = state
        .started_at()
        .and_then(|t| t.elapsed().ok())
        .unwrap_or_default();

    let Some(credentials) = outcome else {
        warn!(
            "Finished after {:.1}s without credentials (server: {}, key: {}, completed: {})",
            elapsed.as_secs_f64(),
            if state.server().is_some() { "found" } else { "missing" },
            if state.key().is_some() { "found" } else { "missing" },
            state.is_completed(),
        );
        return Ok(());
    };
    info!("Captured {} after {:.1}s", credentials, elapsed.as_secs_f64());

    if json {
        println!("{}", serde_json::to_string_pretty(&credentials)?);
    } else {
        println!("server: {}", credentials.server);
        println!("key:    {}", credentials.key);
    }
    Ok(())
}
