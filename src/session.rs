//! 会话状态: 最近一次生成的端点
//!
//! 由调用方显式持有和传递，CLI 在两次调用之间把它保存为 JSON。

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::endpoint::ProxyEndpointConfig;
use crate::subscription::Subscription;
use crate::utils::{DeployError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    current: Option<ProxyEndpointConfig>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录新端点，返回被替换的旧端点 (后写者生效)
    pub fn record(&mut self, endpoint: ProxyEndpointConfig) -> Option<ProxyEndpointConfig> {
        self.current.replace(endpoint)
    }

    pub fn current(&self) -> Option<&ProxyEndpointConfig> {
        self.current.as_ref()
    }

    pub fn require(&self) -> Result<&ProxyEndpointConfig> {
        self.current.as_ref().ok_or_else(|| {
            DeployError::NotFound("没有生成配置，请先执行 generate 或 add-xray".to_string())
        })
    }

    pub fn clear(&mut self) -> Option<ProxyEndpointConfig> {
        self.current.take()
    }

    /// 当前端点的订阅，没有端点时为空
    pub fn subscription(&self) -> Subscription {
        self.current
            .as_ref()
            .map(Subscription::from_endpoint)
            .unwrap_or_else(|| Subscription::new(Vec::new()))
    }

    /// 从文件加载，文件不存在时返回空会话
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("会话文件不存在: {}", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(DeployError::io(path, e)),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| DeployError::io(parent, e))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).map_err(|e| DeployError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::EndpointOptions;

    #[test]
    fn test_record_replaces() {
        let mut session = Session::new();
        assert!(matches!(session.require(), Err(DeployError::NotFound(_))));
        assert!(session.subscription().is_empty());

        let first = EndpointOptions::new(["a.example.com"]).build().unwrap();
        let second = EndpointOptions::new(["b.example.com"]).build().unwrap();

        assert!(session.record(first.clone()).is_none());
        assert_eq!(session.record(second.clone()), Some(first));
        assert_eq!(session.require().unwrap(), &second);
        assert_eq!(session.subscription().nodes()[0].domain, "b.example.com");

        assert_eq!(session.clear(), Some(second));
        assert!(session.current().is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/session.json");

        assert_eq!(Session::load(&path).unwrap(), Session::default());

        let mut session = Session::new();
        session.record(
            EndpointOptions::new(["origin.example.com"])
                .cdn_host("cdn.example.com")
                .build()
                .unwrap(),
        );
        session.save(&path).unwrap();

        let loaded = Session::load(&path).unwrap();
        assert_eq!(loaded, session);
    }

    #[test]
    fn test_corrupt_state_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, r#"{"current": {"domains": []}}"#).unwrap();
        assert!(matches!(Session::load(&path), Err(DeployError::Json(_))));
    }
}
