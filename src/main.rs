use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use xhttp_deploy::deploy::DeployReport;
use xhttp_deploy::render::{
    render_caddy_main, render_caddy_site, render_nginx_main, render_nginx_site, ServiceExtras,
    StaticSite, Target, TlsPaths, WebService,
};
use xhttp_deploy::subscription::Format;
use xhttp_deploy::system::CommandRunner;
use xhttp_deploy::utils::validate_port;
use xhttp_deploy::{
    Config, Deployer, EndpointOptions, ProxyEndpointConfig, Session, Settings, Subscription,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 工具配置文件 (TOML)
    #[arg(short, long, global = true)]
    settings: Option<PathBuf>,

    /// 日志级别
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct EndpointArgs {
    /// 域名，可重复指定
    #[arg(short, long = "domain", required = true)]
    domains: Vec<String>,

    /// Xray 本地监听端口
    #[arg(short, long)]
    port: Option<u32>,

    /// XHTTP 路径，不指定则随机生成
    #[arg(long)]
    path: Option<String>,

    /// 客户端 UUID，不指定则随机生成
    #[arg(long)]
    uuid: Option<String>,

    /// CDN 域名
    #[arg(long)]
    cdn: Option<String>,
}

#[derive(clap::Args, Debug)]
struct TlsArgs {
    /// 证书路径 (默认 Let's Encrypt)
    #[arg(long, requires = "key")]
    cert: Option<String>,

    /// 私钥路径
    #[arg(long, requires = "cert")]
    key: Option<String>,
}

impl TlsArgs {
    fn paths(&self) -> Option<TlsPaths> {
        match (&self.cert, &self.key) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: cert.clone(),
                key: key.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 生成配置并记录到会话，只输出不部署
    Generate {
        #[command(flatten)]
        endpoint: EndpointArgs,
        #[arg(short, long, value_enum, default_value_t = Target::Nginx)]
        target: Target,
    },
    /// 部署会话中最近生成的配置
    Deploy {
        #[arg(short, long, value_enum, default_value_t = Target::Nginx)]
        target: Target,
        #[command(flatten)]
        tls: TlsArgs,
        /// 写入后测试并重载服务
        #[arg(long)]
        apply: bool,
    },
    /// 生成并部署 Xray 服务
    AddXray {
        #[command(flatten)]
        endpoint: EndpointArgs,
        #[arg(short, long, value_enum, default_value_t = Target::Nginx)]
        target: Target,
        #[command(flatten)]
        tls: TlsArgs,
        #[arg(long)]
        apply: bool,
    },
    /// 添加通用 Web 服务 (Nginx)
    AddWeb {
        #[arg(short, long)]
        domain: String,
        /// 后端端口
        #[arg(short, long)]
        port: u32,
        /// 服务名称
        #[arg(short, long)]
        name: String,
        #[arg(long)]
        websocket: bool,
        #[arg(long)]
        no_gzip: bool,
        #[arg(long, default_value = "50M")]
        max_body_size: String,
        #[command(flatten)]
        tls: TlsArgs,
        #[arg(long)]
        apply: bool,
    },
    /// 添加静态站点 (Nginx)
    AddStatic {
        #[arg(short, long)]
        domain: String,
        /// 网站根目录
        #[arg(short, long)]
        root: String,
        /// 索引文件，可重复指定
        #[arg(long = "index")]
        index_files: Vec<String>,
        #[arg(long)]
        autoindex: bool,
        #[command(flatten)]
        tls: TlsArgs,
        #[arg(long)]
        apply: bool,
    },
    /// 列出所有服务配置
    List {
        #[arg(short, long, value_enum, default_value_t = Target::Nginx)]
        target: Target,
    },
    /// 删除服务配置
    Remove {
        /// 配置文件名，如 xray-proxy-example-com.conf
        filename: String,
        #[arg(short, long, value_enum, default_value_t = Target::Nginx)]
        target: Target,
    },
    /// 输出订阅
    Subscription {
        #[arg(short, long, value_enum, default_value_t = Format::Base64)]
        format: Format,
        /// 只输出指定域名的节点
        #[arg(short, long)]
        domain: Option<String>,
    },
    /// 输出主配置文件 (nginx.conf / Caddyfile)
    RenderMain {
        #[arg(short, long, value_enum, default_value_t = Target::Nginx)]
        target: Target,
    },
    /// 检查 Xray 配置和服务状态
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 优先使用环境变量 RUST_LOG，否则使用命令行参数
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::load(args.settings.as_deref())?;
    let runner = CommandRunner::new(Duration::from_secs(settings.commands.timeout_secs));
    let deployer = Deployer::new(settings.paths.clone());

    match args.command {
        Commands::Generate { endpoint, target } => {
            let endpoint = build_endpoint(endpoint, &settings)?;
            record(&settings, endpoint.clone())?;

            let proxy = match target {
                Target::Nginx => {
                    let sites: BTreeMap<&str, String> = endpoint
                        .domains()
                        .iter()
                        .map(|d| (d.as_str(), render_nginx_site(&endpoint, d, None)))
                        .collect();
                    serde_json::to_value(sites)?
                }
                Target::Caddy => json!(render_caddy_site(&endpoint)),
            };
            print_json(&json!({
                "uuid": endpoint.client_id(),
                "domains": endpoint.domains(),
                "xray_port": endpoint.listen_port(),
                "xray_path": endpoint.path(),
                "cdn_host": endpoint.cdn_host(),
                "xray_config": endpoint.to_xray_config(),
                "proxy_config": proxy,
            }))?;
        }
        Commands::Deploy { target, tls, apply } => {
            let session = Session::load(&settings.paths.state_file)?;
            let endpoint = session.require()?;
            let report = deploy_endpoint(
                &deployer,
                &runner,
                endpoint,
                target,
                tls.paths(),
                apply || settings.commands.apply,
            )
            .await;
            finish(&report)?;
        }
        Commands::AddXray {
            endpoint,
            target,
            tls,
            apply,
        } => {
            let endpoint = build_endpoint(endpoint, &settings)?;
            let report = deploy_endpoint(
                &deployer,
                &runner,
                &endpoint,
                target,
                tls.paths(),
                apply || settings.commands.apply,
            )
            .await;
            record(&settings, endpoint.clone())?;
            print_json(&json!({
                "uuid": endpoint.client_id(),
                "xray_path": endpoint.path(),
                "subscription": Subscription::from_endpoint(&endpoint).summaries(),
            }))?;
            finish(&report)?;
        }
        Commands::AddWeb {
            domain,
            port,
            name,
            websocket,
            no_gzip,
            max_body_size,
            tls,
            apply,
        } => {
            let port = validate_port(port, "后端")?;
            let mut service = WebService::new(name, domain, port);
            service.tls = tls.paths();
            service.extra = ServiceExtras {
                websocket,
                gzip: !no_gzip,
                max_body_size: Some(max_body_size),
            }
            .to_fragment();

            let filename = deployer.add_web_service(&service)?;
            print_json(&json!({ "domain": service.domain, "config_file": filename }))?;
            apply_nginx(&deployer, &runner, apply || settings.commands.apply).await?;
        }
        Commands::AddStatic {
            domain,
            root,
            index_files,
            autoindex,
            tls,
            apply,
        } => {
            let mut site = StaticSite::new(domain, root);
            if !index_files.is_empty() {
                site.index_files = index_files;
            }
            site.autoindex = autoindex;
            site.tls = tls.paths();

            let filename = deployer.add_static_site(&site)?;
            print_json(&json!({ "domain": site.domain, "config_file": filename }))?;
            apply_nginx(&deployer, &runner, apply || settings.commands.apply).await?;
        }
        Commands::List { target } => {
            let registry = deployer.registry(target)?;
            let mut services = registry.list()?;
            services.sort();
            print_json(&json!({
                "total": services.len(),
                "services": services,
                "config_directory": registry.dir(),
            }))?;
        }
        Commands::Remove { filename, target } => {
            let registry = deployer.registry(target)?;
            if registry.remove(&filename)? {
                println!("已删除: {}", filename);
            } else {
                warn!("配置文件不存在: {}", filename);
                println!("未找到: {}", filename);
            }
        }
        Commands::Subscription { format, domain } => {
            let session = Session::load(&settings.paths.state_file)?;
            session.require()?;
            let mut subscription = session.subscription();
            if let Some(domain) = domain {
                subscription = subscription.only_domain(&domain);
            }
            println!("{}", subscription.render(format));
        }
        Commands::RenderMain { target } => match target {
            Target::Nginx => {
                print!(
                    "{}",
                    render_nginx_main(&settings.paths.nginx_conf_dir.to_string_lossy())
                )
            }
            Target::Caddy => {
                print!(
                    "{}",
                    render_caddy_main(&settings.paths.caddy_fragments_dir.to_string_lossy())
                )
            }
        },
        Commands::Status => {
            let xray = match Config::load(&settings.paths.xray_config) {
                Ok(_) => json!({ "valid": true }),
                Err(e) => json!({ "valid": false, "error": format!("{:#}", e) }),
            };
            let mut services = serde_json::Map::new();
            for name in ["xray", "nginx", "caddy"] {
                let state = match runner.is_active(name).await {
                    Ok(outcome) => json!(outcome.stdout.trim()),
                    Err(e) => json!(e.to_string()),
                };
                services.insert(name.to_string(), state);
            }
            print_json(&json!({
                "xray_config": settings.paths.xray_config,
                "xray": xray,
                "services": services,
            }))?;
        }
    }

    Ok(())
}

fn build_endpoint(args: EndpointArgs, settings: &Settings) -> Result<ProxyEndpointConfig> {
    let port = match args.port {
        Some(port) => validate_port(port, "Xray")?,
        None => settings.defaults.listen_port,
    };
    let options = EndpointOptions {
        domains: args.domains,
        listen_port: port,
        path: args.path,
        client_id: args.uuid,
        cdn_host: args.cdn,
    };
    Ok(ProxyEndpointConfig::build_with_path_length(
        options,
        settings.defaults.path_length,
    )?)
}

fn record(settings: &Settings, endpoint: ProxyEndpointConfig) -> Result<()> {
    let mut session = Session::load(&settings.paths.state_file)?;
    if let Some(previous) = session.record(endpoint) {
        info!("替换会话中的端点: {}", previous.domains().join(", "));
    }
    session.save(&settings.paths.state_file)?;
    Ok(())
}

async fn deploy_endpoint(
    deployer: &Deployer,
    runner: &CommandRunner,
    endpoint: &ProxyEndpointConfig,
    target: Target,
    tls: Option<TlsPaths>,
    apply: bool,
) -> DeployReport {
    let mut report = match target {
        Target::Nginx => deployer.deploy_nginx(endpoint, tls.as_ref()),
        Target::Caddy => {
            if tls.is_some() {
                warn!("Caddy 自动管理证书，忽略 --cert/--key");
            }
            deployer.deploy_caddy(endpoint)
        }
    };
    if apply {
        deployer.apply(target, runner, &mut report).await;
    }
    report
}

async fn apply_nginx(deployer: &Deployer, runner: &CommandRunner, apply: bool) -> Result<()> {
    if !apply {
        return Ok(());
    }
    let mut report = DeployReport::default();
    deployer.apply(Target::Nginx, runner, &mut report).await;
    finish(&report)
}

fn finish(report: &DeployReport) -> Result<()> {
    print_json(report)?;
    if !report.is_success() {
        anyhow::bail!("部分步骤失败，详见上方报告");
    }
    info!("✅ 部署完成");
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
