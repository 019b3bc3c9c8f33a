//! 握手解析模块
//!
//! 抓包模式与日志模式两种解析器，均产出 `(server, key)`。

pub mod common;
pub mod log_record;
pub mod rtmp;

pub use log_record::LogRecordParser;
pub use rtmp::RtmpHandshakeParser;
