//! 平台相关路径

use std::path::PathBuf;

/// 直播伴侣的日志目录名
const WEBCAST_APP_DIR: &str = "webcast_mate";

/// 默认日志目录
///
/// Windows 下为 `%APPDATA%\webcast_mate\logs`，其他平台为对应的数据目录。
pub fn default_log_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("AppData").join("Roaming")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(WEBCAST_APP_DIR)
        .join("logs")
}
