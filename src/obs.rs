//! 同步推流配置到 OBS 的 `service.json`

use log::info;
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, SnifferError};

#[derive(Debug, Serialize)]
struct ServiceConfig<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    settings: ServiceSettings<'a>,
}

#[derive(Debug, Serialize)]
struct ServiceSettings<'a> {
    server: &'a str,
    key: &'a str,
    use_auth: bool,
    bwtest: bool,
}

/// 将发现的凭据写入 OBS 自定义推流服务配置
#[derive(Debug, Clone)]
pub struct ObsServiceWriter {
    path: PathBuf,
}

impl ObsServiceWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 覆盖已有的 `service.json`
    ///
    /// 文件不存在时说明路径不是 OBS 配置目录，不创建新文件。
    pub fn write(&self, server: &str, key: &str) -> Result<()> {
        if !self.path.is_file() {
            return Err(SnifferError::Config(format!(
                "OBS service file {} does not exist",
                self.path.display()
            )));
        }

        let config = ServiceConfig {
            kind: "rtmp_custom",
            settings: ServiceSettings {
                server,
                key,
                use_auth: false,
                bwtest: false,
            },
        };

        let mut buf = Vec::new();
        let mut serializer = Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
        config.serialize(&mut serializer)?;
        fs::write(&self.path, buf)?;

        info!("Synced stream settings to {}", self.path.display());
        Ok(())
    }

    /// 作为结果回调使用
    pub fn into_callback(self) -> impl Fn(&str, &str) -> anyhow::Result<()> + Send + Sync + 'static {
        move |server, key| self.write(server, key).map_err(anyhow::Error::from)
    }
}
