use log::{error, info};
use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::state::Credentials;

/// 结果回调: 参数为 `(server, key)`
pub type ResultCallback = Arc<dyn Fn(&str, &str) -> anyhow::Result<()> + Send + Sync>;

/// 一次分发的结果
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// 结果回调集合
///
/// 只追加不删除。单个回调返回错误或 panic 只记录日志，不影响其余回调。
#[derive(Default)]
pub struct ResultSink {
    callbacks: RwLock<Vec<ResultCallback>>,
}

impl ResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F>(&self, callback: F)
    where
        F: Fn(&str, &str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.callbacks.write().push(Arc::new(callback));
    }

    pub fn len(&self) -> usize {
        self.callbacks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dispatch(&self, credentials: &Credentials) -> DispatchReport {
        // 克隆快照，回调内部注册新回调也不会死锁
        let callbacks: Vec<ResultCallback> = self.callbacks.read().clone();
        let mut report = DispatchReport::default();

        for (index, callback) in callbacks.iter().enumerate() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                callback(&credentials.server, &credentials.key)
            }));
            match outcome {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    error!("Result callback #{} failed: {:#}", index, e);
                    report.failed += 1;
                }
                Err(_) => {
                    error!("Result callback #{} panicked", index);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Delivered credentials to {}/{} callbacks",
            report.delivered,
            callbacks.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn credentials() -> Credentials {
        Credentials {
            server: "rtmp://host/app".to_string(),
            key: "stream-123?sign=AB&exp=99".to_string(),
        }
    }

    #[test]
    fn test_dispatch_to_all_callbacks() {
        let sink = ResultSink::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for _ in 0..3 {
            let seen = Arc::clone(&seen);
            sink.add(move |server, key| {
                seen.lock().push((server.to_string(), key.to_string()));
                Ok(())
            });
        }

        let report = sink.dispatch(&credentials());
        assert_eq!(report, DispatchReport { delivered: 3, failed: 0 });
        assert_eq!(seen.lock().len(), 3);
        assert_eq!(seen.lock()[0].0, "rtmp://host/app");
    }

    #[test]
    fn test_failing_callback_is_isolated() {
        let sink = ResultSink::new();
        let reached = Arc::new(Mutex::new(false));

        sink.add(|_, _| Err(anyhow::anyhow!("ui gone")));
        sink.add(|_, _| panic!("callback bug"));
        let flag = Arc::clone(&reached);
        sink.add(move |_, _| {
            *flag.lock() = true;
            Ok(())
        });

        let report = sink.dispatch(&credentials());
        assert_eq!(report, DispatchReport { delivered: 1, failed: 2 });
        assert!(*reached.lock());
    }

    #[test]
    fn test_empty_sink() {
        let sink = ResultSink::new();
        assert!(sink.is_empty());
        assert_eq!(sink.dispatch(&credentials()), DispatchReport::default());
    }
}
