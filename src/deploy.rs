//! 部署: 把渲染结果写入磁盘，可选地测试并重载服务
//!
//! 每个文件单独写入、单独汇报，某个文件失败不影响其他文件。

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::Validator;
use crate::endpoint::ProxyEndpointConfig;
use crate::registry::{ServiceKind, ServiceRegistry};
use crate::render::{
    caddy_import_line, render_caddy_main, render_caddy_site, render_nginx_service,
    render_nginx_site, render_nginx_static, StaticSite, Target, TlsPaths, WebService,
};
use crate::settings::PathSettings;
use crate::system::{CommandOutcome, CommandRunner};
use crate::utils::{DeployError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ArtifactStatus {
    Written,
    Unchanged,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactReport {
    pub artifact: String,
    pub path: PathBuf,
    #[serde(flatten)]
    pub status: ArtifactStatus,
}

impl ArtifactReport {
    fn new<E: std::fmt::Display>(
        artifact: impl Into<String>,
        path: PathBuf,
        result: std::result::Result<ArtifactStatus, E>,
    ) -> Self {
        let artifact = artifact.into();
        let status = match result {
            Ok(status) => {
                info!("✅ {} -> {}", artifact, path.display());
                status
            }
            Err(e) => {
                error!("❌ {} ({}): {}", artifact, path.display(), e);
                ArtifactStatus::Failed {
                    error: e.to_string(),
                }
            }
        };
        Self {
            artifact,
            path,
            status,
        }
    }

    pub fn is_ok(&self) -> bool {
        !matches!(self.status, ArtifactStatus::Failed { .. })
    }
}

/// 命令执行汇报
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CommandReport {
    Ran(CommandOutcome),
    Skipped { command: String, reason: String },
    Error { command: String, error: String },
}

impl CommandReport {
    fn from_result(command: &str, result: Result<CommandOutcome>) -> Self {
        match result {
            Ok(outcome) => CommandReport::Ran(outcome),
            Err(e) => CommandReport::Error {
                command: command.to_string(),
                error: e.to_string(),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        match self {
            CommandReport::Ran(outcome) => outcome.success,
            CommandReport::Skipped { .. } => true,
            CommandReport::Error { .. } => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeployReport {
    pub artifacts: Vec<ArtifactReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<CommandReport>,
}

impl DeployReport {
    pub fn is_success(&self) -> bool {
        self.artifacts.iter().all(ArtifactReport::is_ok)
            && self.commands.iter().all(CommandReport::is_ok)
    }

    fn xray_written(&self) -> bool {
        self.artifacts
            .iter()
            .any(|a| a.artifact == XRAY_ARTIFACT && a.status == ArtifactStatus::Written)
    }
}

const XRAY_ARTIFACT: &str = "xray";

pub struct Deployer {
    paths: PathSettings,
}

impl Deployer {
    pub fn new(paths: PathSettings) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &PathSettings {
        &self.paths
    }

    pub fn nginx_registry(&self) -> Result<ServiceRegistry> {
        ServiceRegistry::open(&self.paths.nginx_conf_dir)
    }

    pub fn caddy_registry(&self) -> Result<ServiceRegistry> {
        ServiceRegistry::with_extension(&self.paths.caddy_fragments_dir, Target::Caddy.extension())
    }

    pub fn registry(&self, target: Target) -> Result<ServiceRegistry> {
        match target {
            Target::Nginx => self.nginx_registry(),
            Target::Caddy => self.caddy_registry(),
        }
    }

    /// 写入 Xray config.json
    pub fn write_xray(&self, endpoint: &ProxyEndpointConfig) -> ArtifactReport {
        let path = self.paths.xray_config.clone();
        let config = endpoint.to_xray_config();
        let result = Validator::validate(&config)
            .and_then(|_| config.save(&path))
            .map(|_| ArtifactStatus::Written)
            .map_err(|e| format!("{:#}", e));
        ArtifactReport::new(XRAY_ARTIFACT, path, result)
    }

    /// Xray + 每个域名一个 Nginx 配置文件
    pub fn deploy_nginx(
        &self,
        endpoint: &ProxyEndpointConfig,
        tls: Option<&TlsPaths>,
    ) -> DeployReport {
        let mut report = DeployReport::default();
        report.artifacts.push(self.write_xray(endpoint));

        match self.nginx_registry() {
            Ok(registry) => {
                // 规范化后同名的域名只写第一个，其余报告失败
                let mut owners: HashMap<String, &str> = HashMap::new();
                for domain in endpoint.domains() {
                    let filename = registry.filename(&ServiceKind::Xray, domain);
                    let path = registry.dir().join(&filename);
                    if let Some(owner) = owners.get(&filename) {
                        report.artifacts.push(ArtifactReport::new(
                            format!("nginx:{}", domain),
                            path,
                            Err(format!("配置文件名与域名 {} 冲突: {}", owner, filename)),
                        ));
                        continue;
                    }
                    owners.insert(filename, domain);

                    let content = render_nginx_site(endpoint, domain, tls);
                    let result = registry
                        .add(&ServiceKind::Xray, domain, &content)
                        .map(|_| ArtifactStatus::Written);
                    report
                        .artifacts
                        .push(ArtifactReport::new(format!("nginx:{}", domain), path, result));
                }
            }
            Err(e) => {
                let error = e.to_string();
                for domain in endpoint.domains() {
                    report.artifacts.push(ArtifactReport::new(
                        format!("nginx:{}", domain),
                        self.paths.nginx_conf_dir.clone(),
                        Err(error.clone()),
                    ));
                }
            }
        }
        report
    }

    /// Xray + 一个 Caddy 片段 + 主 Caddyfile 的 import
    pub fn deploy_caddy(&self, endpoint: &ProxyEndpointConfig) -> DeployReport {
        let mut report = DeployReport::default();
        report.artifacts.push(self.write_xray(endpoint));

        let domain = endpoint.primary_domain();
        let fragment = match self.caddy_registry() {
            Ok(registry) => {
                let path = registry.dir().join(registry.filename(&ServiceKind::Xray, domain));
                let result = registry
                    .add(&ServiceKind::Xray, domain, &render_caddy_site(endpoint))
                    .map(|_| ArtifactStatus::Written);
                ArtifactReport::new("caddy:fragment", path, result)
            }
            Err(e) => ArtifactReport::new(
                "caddy:fragment",
                self.paths.caddy_fragments_dir.clone(),
                Err(e),
            ),
        };
        report.artifacts.push(fragment);

        let main = self.paths.caddy_main.clone();
        let status = ensure_caddy_import(&main, &self.paths.caddy_fragments_dir);
        report
            .artifacts
            .push(ArtifactReport::new("caddy:main", main, status));
        report
    }

    /// 添加通用服务，返回配置文件名
    pub fn add_web_service(&self, service: &WebService) -> Result<String> {
        if service.backend_port == 0 {
            return Err(DeployError::InvalidInput(
                "后端端口超出范围 (1-65535): 0".to_string(),
            ));
        }
        let kind = ServiceKind::Named(service.name.clone());
        kind.check()?;
        let content = render_nginx_service(service);
        self.nginx_registry()?.add(&kind, &service.domain, &content)
    }

    /// 添加静态站点，返回配置文件名
    pub fn add_static_site(&self, site: &StaticSite) -> Result<String> {
        if site.root.trim().is_empty() {
            return Err(DeployError::InvalidInput("站点根目录不能为空".to_string()));
        }
        let content = render_nginx_static(site);
        self.nginx_registry()?
            .add(&ServiceKind::Static, &site.domain, &content)
    }

    /// 测试并重载服务，结果追加到汇报中
    pub async fn apply(&self, target: Target, runner: &CommandRunner, report: &mut DeployReport) {
        match target {
            Target::Nginx => {
                let test = CommandReport::from_result("nginx -t", runner.nginx_test().await);
                let test_ok = test.is_ok();
                report.commands.push(test);
                if test_ok {
                    report.commands.push(CommandReport::from_result(
                        "systemctl reload nginx",
                        runner.nginx_reload().await,
                    ));
                } else {
                    warn!("Nginx 配置测试失败，跳过重载");
                    report.commands.push(CommandReport::Skipped {
                        command: "systemctl reload nginx".to_string(),
                        reason: "nginx -t failed".to_string(),
                    });
                }
            }
            Target::Caddy => {
                report.commands.push(CommandReport::from_result(
                    "systemctl reload caddy",
                    runner.caddy_reload().await,
                ));
            }
        }

        if report.xray_written() {
            report.commands.push(CommandReport::from_result(
                "systemctl restart xray",
                runner.xray_restart().await,
            ));
        }
    }
}

/// 确保主 Caddyfile 导入片段目录
///
/// 文件不存在时写入完整的主配置；已存在但缺少 import 时追加到末尾，
/// 全局选项块必须位于文件开头，因此不能插到前面。
pub fn ensure_caddy_import(main: &Path, fragments_dir: &Path) -> Result<ArtifactStatus> {
    let dir = fragments_dir.to_string_lossy();
    let import = caddy_import_line(&dir);

    match fs::read_to_string(main) {
        Ok(existing) => {
            if existing.lines().any(|line| line.trim() == import) {
                return Ok(ArtifactStatus::Unchanged);
            }
            let mut content = existing;
            if !content.is_empty() && !content.ends_with('\n') {
                content.push('\n');
            }
            content.push_str(&format!("\n{}\n", import));
            fs::write(main, content).map_err(|e| DeployError::io(main, e))?;
            Ok(ArtifactStatus::Written)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            if let Some(parent) = main.parent() {
                fs::create_dir_all(parent).map_err(|e| DeployError::io(parent, e))?;
            }
            fs::write(main, render_caddy_main(&dir)).map_err(|e| DeployError::io(main, e))?;
            Ok(ArtifactStatus::Written)
        }
        Err(e) => Err(DeployError::io(main, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::EndpointOptions;

    fn paths(root: &Path) -> PathSettings {
        PathSettings {
            xray_config: root.join("xray/config.json"),
            nginx_conf_dir: root.join("nginx/conf.d"),
            caddy_main: root.join("caddy/Caddyfile"),
            caddy_fragments_dir: root.join("caddy/conf.d"),
            state_file: root.join("state/session.json"),
        }
    }

    #[test]
    fn test_deploy_nginx_writes_all() {
        let dir = tempfile::tempdir().unwrap();
        let deployer = Deployer::new(paths(dir.path()));
        let endpoint = EndpointOptions::new(["a.example.com", "b.example.com"])
            .path("/secret")
            .build()
            .unwrap();

        let report = deployer.deploy_nginx(&endpoint, None);
        assert!(report.is_success());
        assert_eq!(report.artifacts.len(), 3);

        let xray = crate::config::Config::load(dir.path().join("xray/config.json")).unwrap();
        assert_eq!(xray, endpoint.to_xray_config());

        let mut names = deployer.nginx_registry().unwrap().list().unwrap();
        names.sort();
        assert_eq!(names, vec!["xray-a-example-com.conf", "xray-b-example-com.conf"]);
    }

    #[test]
    fn test_colliding_domains_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let deployer = Deployer::new(paths(dir.path()));
        let endpoint = EndpointOptions::new(["a.b.example.com", "a-b.example.com"])
            .path("/secret")
            .build()
            .unwrap();

        let report = deployer.deploy_nginx(&endpoint, None);
        assert!(!report.is_success());
        assert_eq!(report.artifacts.len(), 3);
        assert!(report.artifacts[1].is_ok());
        assert!(matches!(
            &report.artifacts[2].status,
            ArtifactStatus::Failed { error } if error.contains("a.b.example.com")
        ));

        let registry = deployer.nginx_registry().unwrap();
        assert_eq!(registry.list().unwrap(), vec!["xray-a-b-example-com.conf"]);
        let content = registry.read("xray-a-b-example-com.conf").unwrap().unwrap();
        assert!(content.contains("server_name a.b.example.com;"));
    }

    #[test]
    fn test_partial_failure_is_reported_per_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = paths(dir.path());
        // 父路径是普通文件，xray 写入必然失败
        fs::write(dir.path().join("blocker"), "x").unwrap();
        paths.xray_config = dir.path().join("blocker/config.json");
        let deployer = Deployer::new(paths);

        let endpoint = EndpointOptions::new(["a.example.com"]).build().unwrap();
        let report = deployer.deploy_nginx(&endpoint, None);

        assert!(!report.is_success());
        assert!(!report.artifacts[0].is_ok());
        assert!(report.artifacts[1].is_ok());
        assert!(dir.path().join("nginx/conf.d/xray-a-example-com.conf").exists());
    }

    #[test]
    fn test_deploy_caddy_creates_main() {
        let dir = tempfile::tempdir().unwrap();
        let deployer = Deployer::new(paths(dir.path()));
        let endpoint = EndpointOptions::new(["a.example.com"]).build().unwrap();

        let report = deployer.deploy_caddy(&endpoint);
        assert!(report.is_success());

        let fragment = dir.path().join("caddy/conf.d/xray-a-example-com.caddy");
        assert!(fs::read_to_string(fragment).unwrap().contains("a.example.com {"));

        let main = fs::read_to_string(dir.path().join("caddy/Caddyfile")).unwrap();
        assert!(main.contains("admin off"));
        assert!(main.contains("/caddy/conf.d/*.caddy"));

        let again = deployer.deploy_caddy(&endpoint);
        assert_eq!(again.artifacts[2].status, ArtifactStatus::Unchanged);
    }

    #[test]
    fn test_caddy_import_preserves_user_config() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("Caddyfile");
        let fragments = dir.path().join("conf.d");
        fs::write(&main, "{\n    email ops@example.org\n}\n\nexample.org {\n    respond \"hi\"\n}").unwrap();

        assert_eq!(
            ensure_caddy_import(&main, &fragments).unwrap(),
            ArtifactStatus::Written
        );
        let content = fs::read_to_string(&main).unwrap();
        assert!(content.starts_with("{\n    email ops@example.org"));
        assert!(content.contains("example.org {"));
        assert!(content.trim_end().ends_with("/conf.d/*.caddy"));

        assert_eq!(
            ensure_caddy_import(&main, &fragments).unwrap(),
            ArtifactStatus::Unchanged
        );
    }

    #[test]
    fn test_add_services() {
        let dir = tempfile::tempdir().unwrap();
        let deployer = Deployer::new(paths(dir.path()));

        let name = deployer
            .add_web_service(&WebService::new("API Service", "api.example.com", 3000))
            .unwrap();
        assert_eq!(name, "api-service-api-example-com.conf");

        let name = deployer
            .add_static_site(&StaticSite::new("blog.example.com", "/var/www/blog"))
            .unwrap();
        assert_eq!(name, "static-blog-example-com.conf");

        assert!(matches!(
            deployer.add_web_service(&WebService::new("x", "x.example.com", 0)),
            Err(DeployError::InvalidInput(_))
        ));
        assert_eq!(deployer.nginx_registry().unwrap().list().unwrap().len(), 2);
    }

    #[test]
    fn test_web_service_cannot_replace_proxy_site() {
        let dir = tempfile::tempdir().unwrap();
        let deployer = Deployer::new(paths(dir.path()));
        let endpoint = EndpointOptions::new(["a.example.com"])
            .path("/secret")
            .build()
            .unwrap();
        assert!(deployer.deploy_nginx(&endpoint, None).is_success());

        for name in ["Xray", "static", " "] {
            assert!(matches!(
                deployer.add_web_service(&WebService::new(name, "a.example.com", 3000)),
                Err(DeployError::InvalidInput(_))
            ));
        }

        let registry = deployer.nginx_registry().unwrap();
        assert_eq!(registry.list().unwrap(), vec!["xray-a-example-com.conf"]);
        let site = registry.read("xray-a-example-com.conf").unwrap().unwrap();
        assert!(site.contains("/secret"));
    }

    #[test]
    fn test_report_serialization() {
        let report = DeployReport {
            artifacts: vec![ArtifactReport {
                artifact: "xray".to_string(),
                path: PathBuf::from("/x.json"),
                status: ArtifactStatus::Failed {
                    error: "denied".to_string(),
                },
            }],
            commands: Vec::new(),
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["artifacts"][0]["status"], "failed");
        assert_eq!(value["artifacts"][0]["error"], "denied");
        assert!(value.get("commands").is_none());
    }
}
