use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tokio::task::JoinError;

#[derive(Error, Debug)]
pub enum SnifferError {
    #[error("Interface error: {0}")]
    Interface(String),

    #[error("Packet capture error: {0}")]
    Capture(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error {0}")]
    Io(io::ErrorKind),

    #[error("Log directory not found: {}", .0.display())]
    LogDirMissing(PathBuf),

    #[error("Capture already running")]
    AlreadyRunning,

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("JoinError: {0}")]
    JoinError(JoinError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<pcap::Error> for SnifferError {
    fn from(err: pcap::Error) -> Self {
        match err {
            pcap::Error::IoError(e) => Self::Io(e),
            pcap::Error::TimeoutExpired => Self::Timeout(0),
            _ => Self::Capture(err.to_string()),
        }
    }
}

impl From<io::Error> for SnifferError {
    fn from(err: io::Error) -> Self {
        SnifferError::Io(err.kind())
    }
}

impl From<JoinError> for SnifferError {
    fn from(err: JoinError) -> Self {
        SnifferError::JoinError(err)
    }
}

impl From<serde_yaml::Error> for SnifferError {
    fn from(err: serde_yaml::Error) -> Self {
        SnifferError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for SnifferError {
    fn from(err: serde_json::Error) -> Self {
        SnifferError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SnifferError>;
