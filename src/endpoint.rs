//! VLESS+XHTTP 端点模型
//!
//! 架构: Client (443) --> 反代 TLS --> Xray (127.0.0.1:listen_port)

use serde::{Deserialize, Serialize};

use crate::config::{
    Client, Config, Inbound, InboundSettings, LogConfig, Network, Outbound, Protocol,
    StreamSettings, XhttpMode, XhttpSettings,
};
use crate::utils::{
    new_client_id, new_obfuscation_path, DeployError, Result, DEFAULT_PATH_LENGTH, MIN_PATH_LENGTH,
};

pub const DEFAULT_LISTEN_PORT: u16 = 10000;

/// 构建端点的参数，未指定的字段在 `build` 时生成
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointOptions {
    pub domains: Vec<String>,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdn_host: Option<String>,
}

fn default_listen_port() -> u16 {
    DEFAULT_LISTEN_PORT
}

impl EndpointOptions {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            domains: domains.into_iter().map(Into::into).collect(),
            listen_port: DEFAULT_LISTEN_PORT,
            path: None,
            client_id: None,
            cdn_host: None,
        }
    }

    pub fn listen_port(mut self, port: u16) -> Self {
        self.listen_port = port;
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    pub fn cdn_host(mut self, host: impl Into<String>) -> Self {
        self.cdn_host = Some(host.into());
        self
    }

    pub fn build(self) -> Result<ProxyEndpointConfig> {
        ProxyEndpointConfig::build(self)
    }
}

/// 一个代理端点: 一个 Xray 后端端口，服务一个或多个域名
///
/// 构建后不可修改；参数变化时重新构建。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "EndpointOptions", into = "EndpointOptions")]
pub struct ProxyEndpointConfig {
    client_id: String,
    listen_port: u16,
    path: String,
    domains: Vec<String>,
    cdn_host: Option<String>,
}

impl ProxyEndpointConfig {
    pub fn build(options: EndpointOptions) -> Result<Self> {
        Self::build_with_path_length(options, DEFAULT_PATH_LENGTH)
    }

    pub fn build_with_path_length(options: EndpointOptions, path_length: usize) -> Result<Self> {
        if options.domains.is_empty() {
            return Err(DeployError::InvalidInput("至少需要一个域名".to_string()));
        }

        let mut domains = Vec::with_capacity(options.domains.len());
        for domain in options.domains {
            let domain = domain.trim();
            if domain.is_empty() {
                return Err(DeployError::InvalidInput("域名不能为空".to_string()));
            }
            domains.push(domain.to_string());
        }

        if options.listen_port == 0 {
            return Err(DeployError::InvalidInput("监听端口不能为 0".to_string()));
        }

        if path_length < MIN_PATH_LENGTH {
            return Err(DeployError::InvalidInput(format!(
                "路径长度不能小于 {}: {}",
                MIN_PATH_LENGTH, path_length
            )));
        }

        let path = match non_empty(options.path) {
            Some(p) if p.starts_with('/') => p,
            Some(p) => format!("/{}", p),
            None => new_obfuscation_path(path_length),
        };
        // 只有 "/" 的路径会匹配所有请求，伪装页失效
        if path.trim_start_matches('/').is_empty() {
            return Err(DeployError::InvalidInput(format!(
                "XHTTP 路径不能为根路径: {:?}",
                path
            )));
        }

        let client_id = non_empty(options.client_id).unwrap_or_else(new_client_id);
        let cdn_host = non_empty(options.cdn_host);

        Ok(Self {
            client_id,
            listen_port: options.listen_port,
            path,
            domains,
            cdn_host,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    /// 第一个域名，用于文件命名
    pub fn primary_domain(&self) -> &str {
        &self.domains[0]
    }

    pub fn cdn_host(&self) -> Option<&str> {
        self.cdn_host.as_deref()
    }

    /// 生成 Xray 服务端配置
    pub fn to_xray_config(&self) -> Config {
        Config {
            log: LogConfig::default(),
            inbounds: vec![Inbound {
                listen: "127.0.0.1".to_string(),
                port: self.listen_port,
                protocol: Protocol::Vless,
                settings: InboundSettings {
                    clients: vec![Client {
                        id: self.client_id.clone(),
                        flow: String::new(),
                    }],
                    decryption: "none".to_string(),
                },
                stream_settings: StreamSettings {
                    network: Network::Xhttp,
                    security: None,
                    xhttp_settings: Some(XhttpSettings {
                        path: self.path.clone(),
                        mode: XhttpMode::Auto,
                    }),
                },
            }],
            outbounds: vec![Outbound::direct()],
        }
    }

    pub fn to_xray_json(&self) -> Result<String> {
        Ok(self.to_xray_config().to_json()?)
    }
}

impl TryFrom<EndpointOptions> for ProxyEndpointConfig {
    type Error = DeployError;

    fn try_from(options: EndpointOptions) -> Result<Self> {
        Self::build(options)
    }
}

impl From<ProxyEndpointConfig> for EndpointOptions {
    fn from(endpoint: ProxyEndpointConfig) -> Self {
        Self {
            domains: endpoint.domains,
            listen_port: endpoint.listen_port,
            path: Some(endpoint.path),
            client_id: Some(endpoint.client_id),
            cdn_host: endpoint.cdn_host,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
