use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::capture::{CaptureConfig, PacketFilter};
use crate::error::{Result, SnifferError};
use crate::logwatch::LogWatchConfig;
use crate::platform::default_log_dir;

#[derive(Parser, Debug)]
#[command(author, version, about = "Capture live-stream server address and stream key")]
pub struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 日志级别
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// 以 JSON 输出结果
    #[arg(long)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// 列出可用网络接口
    Interfaces,
    /// 抓包模式获取推流地址和推流码
    Sniff {
        /// 接口名或显示名，可重复
        #[arg(short, long)]
        interface: Vec<String>,
        /// 监听全部接口
        #[arg(long)]
        all: bool,
    },
    /// 检测接口能否抓到数据
    Probe {
        #[arg(short, long)]
        interface: Vec<String>,
    },
    /// 日志模式获取推流地址和推流码
    WatchLog {
        /// 日志目录
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub capture: CaptureSettings,
    pub log_watch: LogWatchSettings,
    /// 捕获成功后写入的 OBS service.json
    pub obs_service_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            capture: CaptureSettings::default(),
            log_watch: LogWatchSettings::default(),
            obs_service_path: None,
        }
    }
}

// 默认日志级别
fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// 从 YAML 文件加载配置
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.capture.read_timeout_ms <= 0 {
            return Err(SnifferError::Config(
                "capture.read_timeout_ms must be positive".to_string(),
            ));
        }
        if self.log_watch.poll_interval_secs == 0 {
            return Err(SnifferError::Config(
                "log_watch.poll_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CaptureSettings {
    pub interfaces: Vec<String>,
    pub bpf_filter: String,
    pub promiscuous: bool,
    pub read_timeout_ms: i32,
    pub join_timeout_ms: u64,
    pub probe_timeout_secs: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        let filter = PacketFilter::default();
        let config = CaptureConfig::default();
        Self {
            interfaces: Vec::new(),
            bpf_filter: filter.bpf_filter,
            promiscuous: filter.promiscuous,
            read_timeout_ms: filter.timeout_ms,
            join_timeout_ms: config.join_timeout.as_millis() as u64,
            probe_timeout_secs: config.probe_timeout.as_secs(),
        }
    }
}

impl CaptureSettings {
    pub fn packet_filter(&self) -> PacketFilter {
        PacketFilter {
            bpf_filter: self.bpf_filter.clone(),
            promiscuous: self.promiscuous,
            timeout_ms: self.read_timeout_ms,
            ..PacketFilter::default()
        }
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            join_timeout: Duration::from_millis(self.join_timeout_ms),
            probe_timeout: Duration::from_secs(self.probe_timeout_secs),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LogWatchSettings {
    pub dir: Option<PathBuf>,
    pub file_marker: String,
    pub recency_secs: u64,
    pub poll_interval_secs: u64,
    pub freshness_secs: i64,
}

impl Default for LogWatchSettings {
    fn default() -> Self {
        Self {
            dir: None,
            file_marker: "client".to_string(),
            recency_secs: 180,
            poll_interval_secs: 2,
            freshness_secs: 30,
        }
    }
}

impl LogWatchSettings {
    pub fn watch_config(&self) -> LogWatchConfig {
        LogWatchConfig {
            dir: self.dir.clone().unwrap_or_else(default_log_dir),
            file_marker: self.file_marker.clone(),
            recency: Duration::from_secs(self.recency_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            freshness_secs: self.freshness_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.capture.bpf_filter, "tcp");
        assert_eq!(config.capture.join_timeout_ms, 200);
        assert_eq!(config.capture.probe_timeout_secs, 5);
        assert_eq!(config.log_watch.recency_secs, 180);
        assert_eq!(config.log_watch.freshness_secs, 30);
        assert!(config.obs_service_path.is_none());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sniffer.yaml");
        fs::write(
            &path,
            "log_level: debug\ncapture:\n  interfaces: [eth0, wlan0]\nlog_watch:\n  dir: /tmp/logs\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.capture.interfaces, vec!["eth0", "wlan0"]);
        assert_eq!(config.capture.read_timeout_ms, 500);

        let watch = config.log_watch.watch_config();
        assert_eq!(watch.dir, PathBuf::from("/tmp/logs"));
        assert_eq!(watch.file_marker, "client");
        assert_eq!(watch.poll_interval, Duration::from_secs(2));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sniffer.yaml");
        fs::write(&path, "log_watch:\n  poll_interval_secs: 0\n").unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(SnifferError::Config(_))
        ));
    }

    #[test]
    fn test_malformed_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sniffer.yaml");
        fs::write(&path, "capture: [not, a, map]\n").unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(SnifferError::Config(_))
        ));
    }

    #[test]
    fn test_capture_settings_conversion() {
        let settings = CaptureSettings {
            join_timeout_ms: 350,
            probe_timeout_secs: 2,
            ..CaptureSettings::default()
        };
        let config = settings.capture_config();
        assert_eq!(config.join_timeout, Duration::from_millis(350));
        assert_eq!(config.probe_timeout, Duration::from_secs(2));
        assert_eq!(settings.packet_filter().snapshot_length, 65535);
    }

    #[test]
    fn test_args_parse_sniff() {
        let args = Args::parse_from([
            "streamkey-sniffer",
            "--json",
            "sniff",
            "-i",
            "eth0",
            "-i",
            "wlan0 [connected] - Wi-Fi",
        ]);
        assert!(args.json);
        match args.command {
            Command::Sniff { interface, all } => {
                assert_eq!(interface, vec!["eth0", "wlan0 [connected] - Wi-Fi"]);
                assert!(!all);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
