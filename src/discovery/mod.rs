//! 发现状态与结果分发
//!
//! 两种获取策略共享的契约: 状态只在一个锁内读改写，完成后回调只触发一次。

pub mod sink;
pub mod state;

pub use sink::ResultSink;
pub use state::{Credentials, DiscoveryState};
