//! Nginx 配置生成 - 一个服务一个配置文件
//!
//! 每个服务输出两个 server 块: 443 TLS 终结 + 80 跳转 HTTPS
//! (ACME 验证路径除外)。

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use super::TlsPaths;
use crate::endpoint::ProxyEndpointConfig;

const ACME_WEBROOT: &str = "/var/www/html";

/// 通用 Web 服务 (API、Web 应用、管理面板等)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebService {
    pub name: String,
    pub domain: String,
    pub backend_port: u16,
    #[serde(default = "default_location")]
    pub location_path: String,
    #[serde(default)]
    pub tls: Option<TlsPaths>,
    /// 原样拼接进 location 块的额外配置
    #[serde(default)]
    pub extra: String,
}

fn default_location() -> String {
    "/".to_string()
}

impl WebService {
    pub fn new(name: impl Into<String>, domain: impl Into<String>, backend_port: u16) -> Self {
        Self {
            name: name.into(),
            domain: domain.into(),
            backend_port,
            location_path: default_location(),
            tls: None,
            extra: String::new(),
        }
    }
}

/// 通用服务的可选特性，生成 location 内的额外配置片段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceExtras {
    pub websocket: bool,
    pub gzip: bool,
    pub max_body_size: Option<String>,
}

impl Default for ServiceExtras {
    fn default() -> Self {
        Self {
            websocket: false,
            gzip: true,
            max_body_size: Some("50M".to_string()),
        }
    }
}

impl ServiceExtras {
    pub fn to_fragment(&self) -> String {
        let mut parts = Vec::new();

        if self.websocket {
            parts.push(
                "# WebSocket 支持\n\
                 proxy_set_header Upgrade $http_upgrade;\n\
                 proxy_set_header Connection \"upgrade\";"
                    .to_string(),
            );
        }

        if self.gzip {
            parts.push(
                "# Gzip 压缩\n\
                 gzip on;\n\
                 gzip_types text/plain application/json application/javascript text/css;"
                    .to_string(),
            );
        }

        if let Some(size) = self.max_body_size.as_deref().filter(|s| !s.is_empty()) {
            parts.push(format!("# 最大请求体大小\nclient_max_body_size {};", size));
        }

        parts.join("\n\n")
    }
}

/// 静态站点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticSite {
    pub domain: String,
    pub root: String,
    #[serde(default = "default_index_files")]
    pub index_files: Vec<String>,
    #[serde(default)]
    pub autoindex: bool,
    #[serde(default)]
    pub tls: Option<TlsPaths>,
}

pub fn default_index_files() -> Vec<String> {
    vec!["index.html".to_string(), "index.htm".to_string()]
}

impl StaticSite {
    pub fn new(domain: impl Into<String>, root: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            root: root.into(),
            index_files: default_index_files(),
            autoindex: false,
            tls: None,
        }
    }
}

/// 生成 Xray XHTTP 服务在某个域名上的 Nginx 配置
pub fn render_nginx_site(
    endpoint: &ProxyEndpointConfig,
    domain: &str,
    tls: Option<&TlsPaths>,
) -> String {
    let tls = TlsPaths::resolve(tls, domain);
    let port = endpoint.listen_port();

    let mut out = format!("# Xray VLESS+XHTTP - {}\n# Backend: 127.0.0.1:{}\n", domain, port);
    if let Some(cdn) = endpoint.cdn_host() {
        let _ = writeln!(out, "# CDN: {} (SNI/Host: {})", cdn, domain);
    }
    out.push('\n');

    out.push_str(&tls_server_open(domain, &tls));
    let _ = write!(
        out,
        r#"    # Xray XHTTP 路径
    location ~ ^{path} {{
        proxy_pass http://127.0.0.1:{port};
        proxy_http_version 1.1;
        proxy_set_header Upgrade $http_upgrade;
        proxy_set_header Connection "upgrade";
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;

        # 禁用缓冲
        proxy_buffering off;
        proxy_request_buffering off;
        proxy_cache off;
    }}

    # 伪装页面
    location / {{
        add_header Content-Type text/plain;
        return 200 "Welcome";
    }}
}}
"#,
        path = endpoint.path(),
        port = port,
    );
    out.push('\n');
    out.push_str(&redirect_server(domain));
    out
}

/// 生成通用服务的 Nginx 配置
pub fn render_nginx_service(service: &WebService) -> String {
    let tls = TlsPaths::resolve(service.tls.as_ref(), &service.domain);

    let mut out = format!(
        "# {} - {}\n# Backend: 127.0.0.1:{}\n\n",
        service.name, service.domain, service.backend_port
    );
    out.push_str(&tls_server_open(&service.domain, &tls));
    let _ = write!(
        out,
        r#"    # 反向代理到后端服务
    location {location} {{
        proxy_pass http://127.0.0.1:{port};
        proxy_http_version 1.1;
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
"#,
        location = service.location_path,
        port = service.backend_port,
    );
    if !service.extra.trim().is_empty() {
        out.push('\n');
        out.push_str(&indent(&service.extra, 8));
    }
    out.push_str("    }\n}\n\n");
    out.push_str(&redirect_server(&service.domain));
    out
}

/// 生成静态站点的 Nginx 配置 (无后端)
pub fn render_nginx_static(site: &StaticSite) -> String {
    let tls = TlsPaths::resolve(site.tls.as_ref(), &site.domain);
    let index = if site.index_files.is_empty() {
        default_index_files().join(" ")
    } else {
        site.index_files.join(" ")
    };

    let mut out = format!("# Static Site - {}\n# Root: {}\n\n", site.domain, site.root);
    out.push_str(&tls_server_open(&site.domain, &tls));
    let _ = write!(
        out,
        r#"    root {root};
    index {index};

    location / {{
        try_files $uri $uri/ =404;
"#,
        root = site.root,
        index = index,
    );
    if site.autoindex {
        out.push_str("        autoindex on;\n");
    }
    out.push_str(
        r#"    }

    # 静态文件缓存
    location ~* \.(jpg|jpeg|png|gif|ico|css|js|svg|woff|woff2|ttf|eot)$ {
        expires 30d;
        add_header Cache-Control "public, immutable";
    }
}

"#,
    );
    out.push_str(&redirect_server(&site.domain));
    out
}

/// 生成主 nginx.conf，包含配置目录下所有服务文件
pub fn render_nginx_main(conf_dir: &str) -> String {
    format!(
        r#"user www-data;
worker_processes auto;
pid /run/nginx.pid;
error_log /var/log/nginx/error.log warn;

events {{
    worker_connections 2048;
    use epoll;
}}

http {{
    include /etc/nginx/mime.types;
    default_type application/octet-stream;

    log_format main '$remote_addr - $remote_user [$time_local] "$request" '
                    '$status $body_bytes_sent "$http_referer" '
                    '"$http_user_agent"';

    access_log /var/log/nginx/access.log main;

    sendfile on;
    tcp_nopush on;
    tcp_nodelay on;
    keepalive_timeout 65;
    client_max_body_size 50M;

    gzip on;
    gzip_vary on;
    gzip_comp_level 6;
    gzip_types text/plain text/css application/json application/javascript text/xml application/xml;

    # 每个服务一个文件
    include {dir}/*.conf;
}}
"#,
        dir = conf_dir.trim_end_matches('/'),
    )
}

fn tls_server_open(domain: &str, tls: &TlsPaths) -> String {
    format!(
        r#"server {{
    listen 443 ssl http2;
    listen [::]:443 ssl http2;
    server_name {domain};

    ssl_certificate {cert};
    ssl_certificate_key {key};

    ssl_protocols TLSv1.2 TLSv1.3;
    ssl_ciphers ECDHE-RSA-AES128-GCM-SHA256:HIGH:!aNULL:!MD5;
    ssl_prefer_server_ciphers on;

"#,
        domain = domain,
        cert = tls.cert,
        key = tls.key,
    )
}

fn redirect_server(domain: &str) -> String {
    format!(
        r#"# HTTP 重定向到 HTTPS
server {{
    listen 80;
    listen [::]:80;
    server_name {domain};

    location /.well-known/acme-challenge/ {{
        root {webroot};
    }}

    location / {{
        return 301 https://$host$request_uri;
    }}
}}
"#,
        domain = domain,
        webroot = ACME_WEBROOT,
    )
}

fn indent(text: &str, width: usize) -> String {
    let pad = " ".repeat(width);
    let mut out = String::new();
    for line in text.trim_matches('\n').lines() {
        let line = line.trim();
        if line.is_empty() {
            out.push('\n');
        } else {
            let _ = writeln!(out, "{}{}", pad, line);
        }
    }
    out
}
