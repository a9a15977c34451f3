//! Caddy 配置生成
//!
//! 每个端点渲染为 `conf.d/*.caddy` 下的一个片段，主 Caddyfile 只负责
//! 关闭 admin 并 import 片段目录，增删服务时不需要改动主文件。

use std::fmt::Write as _;

use crate::endpoint::ProxyEndpointConfig;

/// 生成端点的 Caddy 片段，每个域名一个站点块
pub fn render_caddy_site(endpoint: &ProxyEndpointConfig) -> String {
    let mut blocks = Vec::with_capacity(endpoint.domains().len() + 1);

    if let Some(cdn) = endpoint.cdn_host() {
        blocks.push(format!("# CDN Host: {}\n", cdn));
    }

    for domain in endpoint.domains() {
        let mut block = String::new();
        let _ = write!(
            block,
            r#"{domain} {{
    # XHTTP 反代到 Xray
    @xhttp path {path}*
    reverse_proxy @xhttp 127.0.0.1:{port} {{
        flush_interval -1
        header_up X-Forwarded-For {{remote_host}}
    }}

    # 伪装响应
    respond "Welcome to {domain}" 200
}}
"#,
            domain = domain,
            path = endpoint.path(),
            port = endpoint.listen_port(),
        );
        blocks.push(block);
    }

    blocks.join("\n")
}

/// 主 Caddyfile
pub fn render_caddy_main(fragments_dir: &str) -> String {
    format!(
        r#"{{
    admin off
}}

{}
"#,
        caddy_import_line(fragments_dir)
    )
}

/// 导入片段目录的 import 指令
pub fn caddy_import_line(fragments_dir: &str) -> String {
    format!("import {}/*.caddy", fragments_dir.trim_end_matches('/'))
}
