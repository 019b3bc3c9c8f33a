use serde::Serialize;
use std::fmt;
use std::time::SystemTime;

/// 发现的推流凭据
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Credentials {
    pub server: String,
    pub key: String,
}

impl fmt::Display for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "server={} key={}", self.server, self.key)
    }
}

/// 单次发现周期的共享状态
///
/// 抓包模式下 `server`/`key` 只写一次；日志模式下值变化时覆盖。
/// `completed` 保证回调在一个周期内只触发一次。
#[derive(Debug, Clone, Default)]
pub struct DiscoveryState {
    server: Option<String>,
    key: Option<String>,
    completed: bool,
    started_at: Option<SystemTime>,
}

impl DiscoveryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 开始新的发现周期
    pub fn reset(&mut self) {
        *self = Self {
            started_at: Some(SystemTime::now()),
            ..Self::default()
        };
    }

    pub fn server(&self) -> Option<&str> {
        self.server.as_deref()
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn started_at(&self) -> Option<SystemTime> {
        self.started_at
    }

    pub fn needs_server(&self) -> bool {
        self.server.is_none()
    }

    pub fn needs_key(&self) -> bool {
        self.key.is_none()
    }

    /// 只写一次: 已有值时忽略
    pub fn fill_server(&mut self, server: String) -> bool {
        fill_once(&mut self.server, server)
    }

    pub fn fill_key(&mut self, key: String) -> bool {
        fill_once(&mut self.key, key)
    }

    /// 值不同时覆盖
    pub fn update_server(&mut self, server: String) -> bool {
        replace_if_changed(&mut self.server, server)
    }

    pub fn update_key(&mut self, key: String) -> bool {
        replace_if_changed(&mut self.key, key)
    }

    /// 两个字段齐全且本周期尚未完成时，标记完成并返回凭据
    pub fn take_completion(&mut self) -> Option<Credentials> {
        if self.completed {
            return None;
        }
        let server = self.server.as_ref().filter(|s| !s.is_empty())?;
        let key = self.key.as_ref().filter(|k| !k.is_empty())?;
        let credentials = Credentials {
            server: server.clone(),
            key: key.clone(),
        };
        self.completed = true;
        Some(credentials)
    }
}

fn fill_once(slot: &mut Option<String>, value: String) -> bool {
    if slot.is_some() || value.is_empty() {
        return false;
    }
    *slot = Some(value);
    true
}

fn replace_if_changed(slot: &mut Option<String>, value: String) -> bool {
    if slot.as_deref() == Some(value.as_str()) {
        return false;
    }
    *slot = Some(value);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_is_write_once() {
        let mut state = DiscoveryState::new();
        assert!(state.fill_server("rtmp://a/app".to_string()));
        assert!(!state.fill_server("rtmp://b/app".to_string()));
        assert_eq!(state.server(), Some("rtmp://a/app"));
    }

    #[test]
    fn test_fill_ignores_empty() {
        let mut state = DiscoveryState::new();
        assert!(!state.fill_key(String::new()));
        assert!(state.needs_key());
    }

    #[test]
    fn test_update_replaces_changed_value() {
        let mut state = DiscoveryState::new();
        assert!(state.update_key("stream-1?a=b".to_string()));
        assert!(!state.update_key("stream-1?a=b".to_string()));
        assert!(state.update_key("stream-2?a=c".to_string()));
        assert_eq!(state.key(), Some("stream-2?a=c"));
    }

    #[test]
    fn test_completion_fires_once() {
        let mut state = DiscoveryState::new();
        state.fill_server("rtmp://a/app".to_string());
        assert!(state.take_completion().is_none());

        state.fill_key("stream-1?a=b".to_string());
        let creds = state.take_completion().unwrap();
        assert_eq!(creds.server, "rtmp://a/app");
        assert_eq!(creds.key, "stream-1?a=b");
        assert!(state.is_completed());
        assert!(state.take_completion().is_none());
    }

    #[test]
    fn test_reset_clears_cycle() {
        let mut state = DiscoveryState::new();
        state.fill_server("rtmp://a/app".to_string());
        state.fill_key("stream-1?a=b".to_string());
        state.take_completion();

        state.reset();
        assert!(state.needs_server());
        assert!(state.needs_key());
        assert!(!state.is_completed());
        assert!(state.started_at().is_some());
    }

    #[test]
    fn test_credentials_display() {
        let creds = Credentials {
            server: "rtmp://a/app".to_string(),
            key: "stream-1?a=b".to_string(),
        };
        assert_eq!(creds.to_string(), "server=rtmp://a/app key=stream-1?a=b");
    }
}
