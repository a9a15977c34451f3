//! 工具自身的配置 (TOML)
//!
//! 所有字段都有默认值，配置文件不存在时使用默认配置。

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::endpoint::DEFAULT_LISTEN_PORT;
use crate::utils::{DeployError, Result, DEFAULT_PATH_LENGTH, MIN_PATH_LENGTH};

/// 容器部署时的 Xray 配置路径
const CONTAINER_XRAY_CONFIG: &str = "/etc/xray/config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub paths: PathSettings,
    pub defaults: DefaultSettings,
    pub commands: CommandSettings,
}

/// 配置文件位置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    pub xray_config: PathBuf,
    pub nginx_conf_dir: PathBuf,
    pub caddy_main: PathBuf,
    pub caddy_fragments_dir: PathBuf,
    /// 最近一次生成的端点
    pub state_file: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            xray_config: PathBuf::from("/usr/local/etc/xray/config.json"),
            nginx_conf_dir: PathBuf::from("/etc/nginx/conf.d"),
            caddy_main: PathBuf::from("/etc/caddy/Caddyfile"),
            caddy_fragments_dir: PathBuf::from("/etc/caddy/conf.d"),
            state_file: PathBuf::from("/var/lib/xhttp-deploy/session.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultSettings {
    pub listen_port: u16,
    pub path_length: usize,
}

impl Default for DefaultSettings {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_LISTEN_PORT,
            path_length: DEFAULT_PATH_LENGTH,
        }
    }
}

/// 外部命令 (nginx / systemctl)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSettings {
    pub timeout_secs: u64,
    /// 写入后是否测试并重载服务
    pub apply: bool,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            apply: false,
        }
    }
}

impl Settings {
    /// 加载配置文件并应用环境变量
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.defaults.path_length < MIN_PATH_LENGTH {
            return Err(DeployError::InvalidInput(format!(
                "defaults.path_length 不能小于 {}: {}",
                MIN_PATH_LENGTH, self.defaults.path_length
            )));
        }
        if self.defaults.listen_port == 0 {
            return Err(DeployError::InvalidInput(
                "defaults.listen_port 不能为 0".to_string(),
            ));
        }
        Ok(())
    }

    fn from_file(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => {
                let settings: Settings = toml::from_str(&content)?;
                info!("📄 已加载配置: {}", path.display());
                Ok(settings)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("配置文件不存在，使用默认配置: {}", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(DeployError::io(path, e)),
        }
    }

    /// 环境变量覆盖
    ///
    /// - `DEPLOYMENT_MODE=container`: Xray 配置改为 `/etc/xray/config.json`
    ///   (仅当路径仍是默认值时)
    /// - `XHTTP_DEPLOY_STATE`: 会话状态文件
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if lookup("DEPLOYMENT_MODE").as_deref() == Some("container")
            && self.paths.xray_config == PathSettings::default().xray_config
        {
            self.paths.xray_config = PathBuf::from(CONTAINER_XRAY_CONFIG);
        }
        if let Some(state) = lookup("XHTTP_DEPLOY_STATE").filter(|s| !s.is_empty()) {
            self.paths.state_file = PathBuf::from(state);
        }
    }
}
