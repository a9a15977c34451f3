use anyhow::{anyhow, Result};
use uuid::Uuid;

use super::Config;

pub struct Validator;

impl Validator {
    /// 验证配置的有效性
    pub fn validate(config: &Config) -> Result<()> {
        // 验证入站配置
        if config.inbounds.is_empty() {
            return Err(anyhow!("至少需要一个入站配置"));
        }

        for (idx, inbound) in config.inbounds.iter().enumerate() {
            Self::validate_inbound(inbound, idx)?;
        }

        // 验证出站配置
        if config.outbounds.is_empty() {
            return Err(anyhow!("至少需要一个出站配置"));
        }

        Ok(())
    }

    fn validate_inbound(inbound: &super::Inbound, idx: usize) -> Result<()> {
        // 验证端口
        if inbound.port == 0 {
            return Err(anyhow!("入站 {} 的端口不能为 0", idx));
        }

        if inbound.settings.clients.is_empty() {
            return Err(anyhow!("入站 {} 至少需要一个客户端", idx));
        }

        // 验证客户端 UUID
        for (client_idx, client) in inbound.settings.clients.iter().enumerate() {
            if Uuid::parse_str(&client.id).is_err() {
                return Err(anyhow!(
                    "入站 {} 的客户端 {} UUID 格式无效: {}",
                    idx,
                    client_idx,
                    client.id
                ));
            }
        }

        // 验证 XHTTP 设置
        if let Some(xhttp) = &inbound.stream_settings.xhttp_settings {
            Self::validate_xhttp_settings(xhttp, idx)?;
        }

        Ok(())
    }

    fn validate_xhttp_settings(xhttp: &super::XhttpSettings, inbound_idx: usize) -> Result<()> {
        if !xhttp.path.starts_with('/') {
            return Err(anyhow!(
                "入站 {} 的 XHTTP path 必须以 / 开头: {:?}",
                inbound_idx,
                xhttp.path
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;

    fn sample(id: &str, path: &str) -> Config {
        Config {
            log: LogConfig::default(),
            inbounds: vec![Inbound {
                listen: "127.0.0.1".to_string(),
                port: 10000,
                protocol: Protocol::Vless,
                settings: InboundSettings {
                    clients: vec![Client {
                        id: id.to_string(),
                        flow: "".to_string(),
                    }],
                    decryption: "none".to_string(),
                },
                stream_settings: StreamSettings {
                    network: Network::Xhttp,
                    security: None,
                    xhttp_settings: Some(XhttpSettings {
                        path: path.to_string(),
                        mode: XhttpMode::Auto,
                    }),
                },
            }],
            outbounds: vec![Outbound::direct()],
        }
    }

    #[test]
    fn test_valid_config() {
        let config = sample("b831381d-6324-4d53-ad4f-8cda48b30811", "/xray");
        assert!(Validator::validate(&config).is_ok());
    }

    #[test]
    fn test_invalid_uuid() {
        let config = sample("invalid-uuid", "/xray");
        assert!(Validator::validate(&config).is_err());
    }

    #[test]
    fn test_path_without_slash() {
        let config = sample("b831381d-6324-4d53-ad4f-8cda48b30811", "xray");
        assert!(Validator::validate(&config).is_err());
    }

    #[test]
    fn test_missing_outbound() {
        let mut config = sample("b831381d-6324-4d53-ad4f-8cda48b30811", "/xray");
        config.outbounds.clear();
        assert!(Validator::validate(&config).is_err());
    }
}
