//! 直播伴侣日志解析
//!
//! 日志中开播成功的记录形如:
//! `[startStream]success {"url":"rtmp://...","key":"stream-...","timestamp":"1700000000"}`

use log::debug;
use regex::Regex;
use std::sync::LazyLock;

use super::common::{normalize_log_text, unix_now};

/// 默认时效窗口(秒)
pub const DEFAULT_FRESHNESS_SECS: i64 = 30;

static START_STREAM_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[startStream\]success.*?\n").expect("valid record regex"));
static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""url":"([^"]+)""#).expect("valid url regex"));
static KEY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""key":"([^"]+)""#).expect("valid key regex"));
static TIMESTAMP_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""timestamp":"([^"]+)""#).expect("valid timestamp regex"));

/// 一条开播记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartStreamRecord {
    pub url: String,
    pub key: String,
    pub timestamp: i64,
}

/// 握手解析器(日志模式)
#[derive(Debug, Clone)]
pub struct LogRecordParser {
    freshness_secs: i64,
}

impl LogRecordParser {
    pub fn new() -> Self {
        Self {
            freshness_secs: DEFAULT_FRESHNESS_SECS,
        }
    }

    pub fn with_freshness(mut self, secs: i64) -> Self {
        self.freshness_secs = secs;
        self
    }

    /// 以当前时间解析日志全文
    pub fn parse(&self, content: &str) -> Option<StartStreamRecord> {
        self.parse_at(content, unix_now())
    }

    /// 解析日志全文中最后一条开播成功记录
    ///
    /// 时间戳早于 `now` 超过时效窗口的记录视为上一次直播的残留，返回 `None`。
    pub fn parse_at(&self, content: &str, now: i64) -> Option<StartStreamRecord> {
        let last = START_STREAM_PATTERN.find_iter(content).last()?;
        let fragment = normalize_log_text(last.as_str());

        let url = capture_field(&URL_PATTERN, &fragment)?;
        let key = capture_field(&KEY_PATTERN, &fragment)?;
        let raw_timestamp = capture_field(&TIMESTAMP_PATTERN, &fragment)?;

        let timestamp = match raw_timestamp.trim().parse::<i64>() {
            Ok(ts) => ts,
            Err(e) => {
                debug!("Invalid startStream timestamp {:?}: {}", raw_timestamp, e);
                return None;
            }
        };

        if now - timestamp > self.freshness_secs {
            debug!("Skipping stale startStream record ({}s old)", now - timestamp);
            return None;
        }

        Some(StartStreamRecord { url, key, timestamp })
    }
}

impl Default for LogRecordParser {
    fn default() -> Self {
        Self::new()
    }
}

fn capture_field(pattern: &Regex, text: &str) -> Option<String> {
    pattern
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
