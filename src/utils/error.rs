use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// 部署错误类型
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("参数无效: {0}")]
    InvalidInput(String),

    #[error("未找到: {0}")]
    NotFound(String),

    #[error("IO 错误 ({}): {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON 解析错误: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML 解析错误: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("命令执行失败 `{command}`: {source}")]
    Command {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("命令超时 `{command}` ({timeout:?})")]
    Timeout { command: String, timeout: Duration },
}

impl DeployError {
    /// 为 IO 错误附加路径
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DeployError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = DeployError> = std::result::Result<T, E>;

/// 校验端口范围 (1-65535)
pub fn validate_port(port: u32, what: &str) -> Result<u16> {
    match u16::try_from(port) {
        Ok(p) if p != 0 => Ok(p),
        _ => Err(DeployError::InvalidInput(format!(
            "{} 端口超出范围 (1-65535): {}",
            what, port
        ))),
    }
}
