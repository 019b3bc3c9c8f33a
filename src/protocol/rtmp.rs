//! RTMP 握手载荷解析
//!
//! 从 TCP 载荷文本中提取推流服务器地址(`connect` 命令)和推流码(`FCPublish` 命令)。

use regex::Regex;
use std::sync::LazyLock;

/// connect 命令标记
pub const CONNECT_MARKER: &str = "connect";
/// FCPublish 命令标记
pub const PUBLISH_MARKER: &str = "FCPublish";
/// AMF 分块头残留在推流码末尾的字节
const FRAMING_TRAILER: char = 'C';

static SERVER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(rtmp://[a-zA-Z0-9\-\.]+/[^/]+)").expect("valid server regex"));

static KEY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(stream-\d+\?[a-zA-Z0-9_]+=[a-zA-Z0-9\-]+(?:&[a-zA-Z0-9_]+=[a-zA-Z0-9\-]+)*)")
        .expect("valid key regex")
});

/// 握手解析器(抓包模式)
#[derive(Debug, Default, Clone, Copy)]
pub struct RtmpHandshakeParser;

impl RtmpHandshakeParser {
    pub fn new() -> Self {
        Self
    }

    /// 提取推流服务器地址
    ///
    /// 仅当载荷包含 `connect` 标记时匹配，取第一个结果并截断 NUL 填充。
    pub fn extract_server(&self, payload: &str) -> Option<String> {
        if !payload.contains(CONNECT_MARKER) {
            return None;
        }
        let found = SERVER_PATTERN.captures(payload)?.get(1)?.as_str();
        let server = found.split('\0').next().unwrap_or(found);
        Some(server.to_string())
    }

    /// 提取推流码
    ///
    /// 仅当载荷包含 `FCPublish` 标记时匹配，末尾的分块残留字节会被去掉。
    pub fn extract_key(&self, payload: &str) -> Option<String> {
        if !payload.contains(PUBLISH_MARKER) {
            return None;
        }
        let found = KEY_PATTERN.captures(payload)?.get(1)?.as_str();
        let key = found.strip_suffix(FRAMING_TRAILER).unwrap_or(found);
        Some(key.to_string())
    }
}
