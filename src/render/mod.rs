//! 反向代理配置渲染
//!
//! 纯字符串构建，不做 IO，也不校验端口范围 (由调用方负责)。

pub mod caddy;
pub mod nginx;

pub use caddy::{caddy_import_line, render_caddy_main, render_caddy_site};
pub use nginx::{
    render_nginx_main, render_nginx_service, render_nginx_site, render_nginx_static,
    ServiceExtras, StaticSite, WebService,
};

use serde::{Deserialize, Serialize};

/// 反代目标
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    #[default]
    Nginx,
    Caddy,
}

impl Target {
    /// 注册表管理的文件扩展名
    pub fn extension(&self) -> &'static str {
        match self {
            Target::Nginx => "conf",
            Target::Caddy => "caddy",
        }
    }
}

/// 证书/私钥路径
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsPaths {
    pub cert: String,
    pub key: String,
}

impl TlsPaths {
    /// Let's Encrypt 默认布局
    pub fn letsencrypt(domain: &str) -> Self {
        Self {
            cert: format!("/etc/letsencrypt/live/{}/fullchain.pem", domain),
            key: format!("/etc/letsencrypt/live/{}/privkey.pem", domain),
        }
    }

    /// 显式路径优先，缺省时按域名推导
    pub fn resolve(explicit: Option<&TlsPaths>, domain: &str) -> Self {
        explicit.cloned().unwrap_or_else(|| Self::letsencrypt(domain))
    }
}
