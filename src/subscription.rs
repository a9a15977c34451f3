//! VLESS 订阅链接生成
//!
//! 配置了 CDN 时，连接地址为 CDN 域名，`sni` 为源站域名，
//! 保证 TLS 校验仍然针对源站证书。

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::Url;

use crate::config::Network;
use crate::endpoint::ProxyEndpointConfig;
use crate::utils::{DeployError, Result};

pub const DEFAULT_CLIENT_PORT: u16 = 443;

/// RFC 3986 非保留字符以外全部编码，空格为 `%20`
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// 订阅节点，由端点按域名派生，不持久化
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionNode {
    pub client_id: String,
    /// 源站域名
    pub domain: String,
    /// 客户端实际连接的地址 (CDN 或源站)
    pub address: String,
    pub port: u16,
    pub path: String,
    pub network: String,
    pub security: String,
    pub sni: Option<String>,
}

impl SubscriptionNode {
    pub fn new(
        client_id: &str,
        domain: &str,
        port: u16,
        path: &str,
        cdn_host: Option<&str>,
    ) -> Self {
        let (address, sni) = match cdn_host {
            Some(cdn) => (cdn.to_string(), Some(domain.to_string())),
            None => (domain.to_string(), None),
        };

        Self {
            client_id: client_id.to_string(),
            domain: domain.to_string(),
            address,
            port,
            path: path.to_string(),
            network: Network::Xhttp.to_string(),
            security: "tls".to_string(),
            sni,
        }
    }

    /// 节点显示名称
    pub fn name(&self) -> &str {
        &self.domain
    }

    /// `vless://uuid@host:port?params#name`
    pub fn to_uri(&self) -> String {
        let mut params = vec![
            format!("type={}", self.network),
            format!("security={}", self.security),
            format!("path={}", encode(&self.path)),
        ];
        if let Some(sni) = &self.sni {
            params.push(format!("sni={}", encode(sni)));
        }

        format!(
            "vless://{}@{}:{}?{}#{}",
            self.client_id,
            self.address,
            self.port,
            params.join("&"),
            encode(self.name())
        )
    }

    /// 解析 VLESS URI
    pub fn from_uri(raw: &str) -> Result<Self> {
        let invalid = |msg: &str| DeployError::InvalidInput(format!("{}: {}", msg, raw));

        let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
        if url.scheme() != "vless" {
            return Err(invalid("不是 vless 链接"));
        }
        let client_id = url.username().to_string();
        if client_id.is_empty() {
            return Err(invalid("缺少 uuid"));
        }
        let address = url.host_str().ok_or_else(|| invalid("缺少地址"))?.to_string();
        let port = url.port().ok_or_else(|| invalid("缺少端口"))?;

        let mut network = None;
        let mut security = None;
        let mut path = None;
        let mut sni = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "type" => network = Some(value.into_owned()),
                "security" => security = Some(value.into_owned()),
                "path" => path = Some(value.into_owned()),
                "sni" => sni = Some(value.into_owned()),
                _ => {}
            }
        }

        let domain = match (&sni, url.fragment()) {
            (Some(sni), _) => sni.clone(),
            (None, Some(fragment)) if !fragment.is_empty() => decode(fragment),
            _ => address.clone(),
        };

        Ok(Self {
            client_id,
            domain,
            address,
            port,
            path: path.unwrap_or_else(|| "/".to_string()),
            network: network.unwrap_or_else(|| Network::Tcp.to_string()),
            security: security.unwrap_or_else(|| "none".to_string()),
            sni,
        })
    }
}

fn encode(value: &str) -> String {
    utf8_percent_encode(value, URI_COMPONENT).to_string()
}

fn decode(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}

/// 为端点的每个域名生成一个节点，顺序与域名顺序一致
pub fn nodes_for(endpoint: &ProxyEndpointConfig, port: u16) -> Vec<SubscriptionNode> {
    endpoint
        .domains()
        .iter()
        .map(|domain| {
            SubscriptionNode::new(
                endpoint.client_id(),
                domain,
                port,
                endpoint.path(),
                endpoint.cdn_host(),
            )
        })
        .collect()
}

/// 纯文本订阅，一行一个 URI
pub fn render_plain(nodes: &[SubscriptionNode]) -> String {
    nodes
        .iter()
        .map(SubscriptionNode::to_uri)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Base64 订阅 (标准字母表，带填充)
pub fn render_base64(nodes: &[SubscriptionNode]) -> String {
    general_purpose::STANDARD.encode(render_plain(nodes))
}

/// 解码 Base64 订阅为 URI 列表
pub fn decode_base64(content: &str) -> Result<Vec<String>> {
    let bytes = general_purpose::STANDARD
        .decode(content.trim())
        .map_err(|e| DeployError::InvalidInput(format!("订阅不是有效的 Base64: {}", e)))?;
    let text = String::from_utf8(bytes)
        .map_err(|e| DeployError::InvalidInput(format!("订阅不是有效的 UTF-8: {}", e)))?;
    Ok(text.split('\n').map(str::to_string).collect())
}

/// 订阅输出格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Base64,
    Plain,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Base64 => write!(f, "base64"),
            Format::Plain => write!(f, "plain"),
        }
    }
}

impl FromStr for Format {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "base64" => Ok(Format::Base64),
            "plain" => Ok(Format::Plain),
            other => Err(DeployError::InvalidInput(format!(
                "未知的订阅格式: {}",
                other
            ))),
        }
    }
}

/// 节点摘要
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSummary {
    pub name: String,
    pub domain: String,
    pub address: String,
    pub port: u16,
    pub uri: String,
}

/// 一组节点及其输出
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    nodes: Vec<SubscriptionNode>,
}

impl Subscription {
    pub fn new(nodes: Vec<SubscriptionNode>) -> Self {
        Self { nodes }
    }

    pub fn from_endpoint(endpoint: &ProxyEndpointConfig) -> Self {
        Self::new(nodes_for(endpoint, DEFAULT_CLIENT_PORT))
    }

    /// 只保留指定源站域名的节点
    pub fn only_domain(self, domain: &str) -> Self {
        Self {
            nodes: self.nodes.into_iter().filter(|n| n.domain == domain).collect(),
        }
    }

    pub fn nodes(&self) -> &[SubscriptionNode] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn render(&self, format: Format) -> String {
        match format {
            Format::Plain => render_plain(&self.nodes),
            Format::Base64 => render_base64(&self.nodes),
        }
    }

    pub fn summaries(&self) -> Vec<NodeSummary> {
        self.nodes
            .iter()
            .map(|node| NodeSummary {
                name: node.name().to_string(),
                domain: node.domain.clone(),
                address: node.address.clone(),
                port: node.port,
                uri: node.to_uri(),
            })
            .collect()
    }
}
