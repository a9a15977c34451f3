use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

mod validator;
pub use validator::Validator;

/// Xray 服务端配置 (config.json)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,
    pub inbounds: Vec<Inbound>,
    pub outbounds: Vec<Outbound>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_loglevel")]
    pub loglevel: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            loglevel: default_loglevel(),
        }
    }
}

fn default_loglevel() -> String {
    "warning".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inbound {
    pub listen: String,
    pub port: u16,
    pub protocol: Protocol,
    pub settings: InboundSettings,
    #[serde(rename = "streamSettings")]
    pub stream_settings: StreamSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Vless,
    Vmess,
    Trojan,
    Shadowsocks,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundSettings {
    pub clients: Vec<Client>,
    #[serde(default = "default_decryption")]
    pub decryption: String,
}

fn default_decryption() -> String {
    "none".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: String, // UUID
    #[serde(default)]
    pub flow: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSettings {
    pub network: Network,
    /// TLS 由前置反代终结，后端不设置
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<Security>,
    #[serde(rename = "xhttpSettings", skip_serializing_if = "Option::is_none")]
    pub xhttp_settings: Option<XhttpSettings>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Tcp,
    Ws,
    Grpc,
    Xhttp,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::Ws => "ws",
            Network::Grpc => "grpc",
            Network::Xhttp => "xhttp",
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Security {
    None,
    Tls,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XhttpSettings {
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub mode: XhttpMode,
}

fn default_path() -> String {
    "/".to_string()
}

/// XHTTP 模式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum XhttpMode {
    /// 由客户端协商
    #[default]
    Auto,
    PacketUp,
    StreamUp,
    StreamOne,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outbound {
    pub protocol: String,
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<serde_json::Value>,
}

impl Outbound {
    /// 直连出站
    pub fn direct() -> Self {
        Self {
            protocol: "freedom".to_string(),
            tag: "direct".to_string(),
            settings: None,
        }
    }
}

impl Config {
    /// 从文件加载配置
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("读取 Xray 配置失败: {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)?;

        // 验证配置
        Validator::validate(&config)?;

        Ok(config)
    }

    /// 保存配置到文件
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("创建目录失败: {}", parent.display()))?;
        }
        fs::write(path, self.to_json()?)
            .with_context(|| format!("写入 Xray 配置失败: {}", path.display()))?;
        Ok(())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserialization() {
        let json = r#"
        {
            "log": { "loglevel": "warning" },
            "inbounds": [{
                "listen": "127.0.0.1",
                "port": 10000,
                "protocol": "vless",
                "settings": {
                    "clients": [{
                        "id": "b831381d-6324-4d53-ad4f-8cda48b30811",
                        "flow": ""
                    }],
                    "decryption": "none"
                },
                "streamSettings": {
                    "network": "xhttp",
                    "xhttpSettings": {
                        "path": "/a7kRmQ2xJ9vN4pL",
                        "mode": "auto"
                    }
                }
            }],
            "outbounds": [{
                "protocol": "freedom",
                "tag": "direct"
            }]
        }
        "#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.inbounds.len(), 1);
        assert_eq!(config.outbounds.len(), 1);
        let stream = &config.inbounds[0].stream_settings;
        assert_eq!(stream.network, Network::Xhttp);
        assert!(stream.security.is_none());
        assert_eq!(stream.xhttp_settings.as_ref().unwrap().mode, XhttpMode::Auto);
    }

    #[test]
    fn test_load_keeps_hand_added_inbounds() {
        // 服务器上手动追加的其他入站不应导致 status 校验失败
        let json = r#"
        {
            "inbounds": [
                {
                    "listen": "127.0.0.1",
                    "port": 10000,
                    "protocol": "vless",
                    "settings": { "clients": [{ "id": "b831381d-6324-4d53-ad4f-8cda48b30811" }] },
                    "streamSettings": { "network": "xhttp", "xhttpSettings": { "path": "/secret" } }
                },
                {
                    "listen": "0.0.0.0",
                    "port": 8443,
                    "protocol": "vmess",
                    "settings": { "clients": [{ "id": "9f1c2a47-3b5e-4d8a-8c61-2e7f0b9d4a13" }] },
                    "streamSettings": { "network": "ws", "security": "tls" }
                },
                {
                    "listen": "0.0.0.0",
                    "port": 9443,
                    "protocol": "trojan",
                    "settings": { "clients": [{ "id": "4e2d8b10-7c3a-4f59-9a06-d1b5e8c2f7a4" }] },
                    "streamSettings": { "network": "grpc", "security": "none" }
                }
            ],
            "outbounds": [{ "protocol": "freedom", "tag": "direct" }]
        }
        "#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, json).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.log.loglevel, "warning");
        assert_eq!(config.inbounds[1].protocol, Protocol::Vmess);
        assert_eq!(config.inbounds[1].stream_settings.network, Network::Ws);
        assert_eq!(config.inbounds[1].stream_settings.security, Some(Security::Tls));
        assert_eq!(config.inbounds[2].protocol, Protocol::Trojan);
        assert_eq!(config.inbounds[2].stream_settings.network, Network::Grpc);
        assert_eq!(config.inbounds[2].stream_settings.security, Some(Security::None));

        assert_eq!(
            serde_json::from_str::<Protocol>("\"shadowsocks\"").unwrap(),
            Protocol::Shadowsocks
        );

        // 原样写回
        config.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xray/config.json");

        let config = Config {
            log: LogConfig::default(),
            inbounds: vec![Inbound {
                listen: "127.0.0.1".to_string(),
                port: 10000,
                protocol: Protocol::Vless,
                settings: InboundSettings {
                    clients: vec![Client {
                        id: "b831381d-6324-4d53-ad4f-8cda48b30811".to_string(),
                        flow: String::new(),
                    }],
                    decryption: "none".to_string(),
                },
                stream_settings: StreamSettings {
                    network: Network::Xhttp,
                    security: None,
                    xhttp_settings: Some(XhttpSettings {
                        path: "/secret".to_string(),
                        mode: XhttpMode::Auto,
                    }),
                },
            }],
            outbounds: vec![Outbound::direct()],
        };

        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
