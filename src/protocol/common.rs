use std::time::{SystemTime, UNIX_EPOCH};

/// 将字节解码为文本，丢弃无法解码的字节序列
pub fn decode_lossy(data: &[u8]) -> String {
    let mut text = String::with_capacity(data.len());
    for chunk in data.utf8_chunks() {
        text.push_str(chunk.valid());
    }
    text
}

/// 规范化日志片段: 去掉换行，合并空白，去掉反斜杠与控制字符
pub fn normalize_log_text(input: &str) -> String {
    let joined = input.replace('\n', "");
    let collapsed = joined.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .chars()
        .filter(|c| !matches!(c, '\\' | '\t' | '\r' | '\u{8}' | '\u{c}'))
        .collect()
}

/// 当前 Unix 时间戳(秒)
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
