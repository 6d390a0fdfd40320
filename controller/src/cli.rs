//! The four CLI subcommands (§6 "CLI"): `manager` runs the four
//! reconcilers plus the admin/metrics/admission HTTP server; `dhcp` and
//! `dns` load their respective config contracts and expose them over
//! liveness/readiness endpoints (query processing itself is delegated to
//! the embedded engines, §1 Non-goals — see SPEC_FULL §4.4/§4.5); `proxy`
//! runs the Dynamic Proxy Configurator's watch loop and ADS gRPC server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use actix_web::{get, middleware, post, web, App, HttpRequest, HttpResponse, HttpServer, Responder};
use clap::{Parser, Subcommand};
use prometheus::{Encoder, TextEncoder};
use tonic::transport::Server as GrpcServer;
use tracing::{error, info, warn};

use hcinfra_core::logging::{init_tracing, log_level_to_filter, LogFormat};
use hcinfra_k8s_index::{proxy_cache_pair, tenant_vm::TenantVmIndex};
use hcinfra_k8s_status::State;
use hcinfra_xds::AdsService;

use crate::admission;

/// Global CLI surface (§6): four subcommands sharing one `--config`
/// overlay and one `--log-level`/`--log-format` pair, per SPEC_FULL §1.1.
#[derive(Parser)]
#[command(name = "controller", author, version, about = "Hosted-cluster secondary-network infrastructure controller")]
pub struct Cli {
    /// Optional YAML config overlay applied before flag defaults (§6).
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[arg(long, global = true, default_value = "text")]
    pub log_format: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the Infra/DHCPServer/DNSServer/ProxyServer reconcilers.
    Manager {
        #[arg(long, default_value = "0.0.0.0:8080")]
        bind: SocketAddr,
    },
    /// Run the DHCP engine's config-driven plugin chain.
    Dhcp {
        #[arg(long = "config-file")]
        config_file: String,
    },
    /// Run the embedded resolver's config contract boundary.
    Dns {
        #[arg(long)]
        corefile: String,
    },
    /// Run the Dynamic Proxy Configurator sidecar.
    Proxy {
        #[arg(long = "xds-port", default_value_t = 18000)]
        xds_port: u16,
        #[arg(long)]
        namespace: String,
        #[arg(long = "proxy-name")]
        proxy_name: Option<String>,
        #[arg(long = "proxy-log-level", default_value = "info")]
        proxy_log_level: String,
        #[arg(long = "metrics-port", default_value_t = 9902)]
        metrics_port: u16,
    },
}

/// Exit codes (§6): 0 on graceful shutdown, non-zero on startup failure.
pub async fn run(cli: Cli) -> i32 {
    if let Some(path) = &cli.config {
        if let Err(e) = apply_config_overlay(path) {
            error!("failed to apply --config overlay {path}: {e}");
            return 1;
        }
    }

    let format: LogFormat = cli.log_format.parse().unwrap_or_default();
    init_tracing(Some(log_level_to_filter(&cli.log_level)), format);

    let result = match cli.command {
        Command::Manager { bind } => run_manager(bind).await,
        Command::Dhcp { config_file } => run_dhcp(&config_file).await,
        Command::Dns { corefile } => run_dns(&corefile).await,
        Command::Proxy {
            xds_port,
            namespace,
            proxy_name,
            proxy_log_level,
            metrics_port,
        } => run_proxy(xds_port, &namespace, proxy_name.as_deref(), &proxy_log_level, metrics_port).await,
    };

    match result {
        Ok(()) => 0,
        Err(e) => {
            error!("startup failed: {e:#}");
            1
        }
    }
}

/// A `--config` overlay only sets process-wide defaults that are cheaper
/// to express as environment variables than to thread through every
/// subcommand's clap struct (§6 "Global flag `--config` selects an
/// optional YAML config").
fn apply_config_overlay(path: &str) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(path)?;
    let value: serde_yaml::Value = serde_yaml::from_str(&text)?;
    if let serde_yaml::Value::Mapping(map) = value {
        for (k, v) in map {
            if let (serde_yaml::Value::String(k), serde_yaml::Value::String(v)) = (k, v) {
                std::env::set_var(k.to_uppercase(), v);
            }
        }
    }
    Ok(())
}

struct AppState {
    state: State,
}

#[get("/")]
async fn index(data: web::Data<AppState>, _req: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json(data.state.diagnostics().await)
}

#[get("/healthz")]
async fn healthz(_req: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/readyz")]
async fn readyz(_req: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("ready")
}

#[get("/metrics")]
async fn metrics(data: web::Data<AppState>, _req: HttpRequest) -> impl Responder {
    let families = data.state.metrics();
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    encoder.encode(&families, &mut buffer).unwrap_or_default();
    HttpResponse::Ok().body(buffer)
}

#[post("/validate")]
async fn validate(body: web::Bytes) -> impl Responder {
    admission::review(body).await
}

/// `manager`: the four `Controller`s plus the admin HTTP server, polled
/// together via one `tokio::select!` (§NEW "Reconciler runtime shape").
async fn run_manager(bind: SocketAddr) -> anyhow::Result<()> {
    let client = kube::Client::try_default().await?;

    let (infra_fut, infra_state) = hcinfra_k8s_status::infra::init(client.clone()).await;
    let (dhcp_fut, _dhcp_state) = hcinfra_k8s_status::dhcp::init(client.clone()).await;
    let (dns_fut, _dns_state) = hcinfra_k8s_status::dns::init(client.clone()).await;
    let (proxy_fut, _proxy_state) = hcinfra_k8s_status::proxy::init(client).await;

    let app_state = AppState { state: infra_state };

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(AppState {
                state: app_state.state.clone(),
            }))
            .wrap(middleware::Logger::default().exclude("/healthz").exclude("/readyz"))
            .service(index)
            .service(healthz)
            .service(readyz)
            .service(metrics)
            .service(validate)
    })
    .bind(bind)?
    .shutdown_timeout(5)
    .run();

    info!(%bind, "manager listening");
    tokio::select! {
        _ = infra_fut => warn!("infra controller exited"),
        _ = dhcp_fut => warn!("dhcp controller exited"),
        _ = dns_fut => warn!("dns controller exited"),
        _ = proxy_fut => warn!("proxy controller exited"),
        res = server => {
            if let Err(e) = res {
                warn!("admin server exited: {e}");
            }
        }
    }
    Ok(())
}

/// `dhcp --config-file <path>` (§NEW "DHCP engine process shape"): parse
/// the rendered config, build the plugin chain's state (lease store +
/// tenant-VM index against the live cluster), confirm it is sound, and
/// hold it ready until shutdown. Opening a UDP socket and driving DHCP's
/// wire protocol itself is out of scope (§1, Non-goals) — that is the
/// embedded engine's job; this subcommand owns exactly the plugin state
/// the engine would call into.
async fn run_dhcp(config_file: &str) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(config_file)?;
    let cfg = hcinfra_dhcp::config::parse(&text)?;

    let range = cfg
        .plugins
        .iter()
        .find_map(|p| match p {
            hcinfra_dhcp::config::Plugin::Range(r) => Some(r.clone()),
            _ => None,
        })
        .ok_or_else(|| anyhow::anyhow!("config has no 'range' plugin"))?;

    let lease_store = hcinfra_dhcp::lease::LeaseStore::open(
        &range.lease_store_path,
        &range.range_start.to_string(),
        &range.range_end.to_string(),
        &range.lease_duration,
    )?;

    let client = kube::Client::try_default().await?;
    let inventory = Box::new(hcinfra_dhcp::tenant_vm::KubeVirtInventory::new(client));
    let _tenant_index = TenantVmIndex::new(inventory);

    info!(
        listen = ?cfg.listen,
        range_start = %range.range_start,
        range_end = %range.range_end,
        active_leases = lease_store.active_lease_count(SystemTime::now()),
        "dhcp engine ready (plugin chain initialized; wire-level serving delegated to the embedded engine)"
    );

    shutdown_signal().await;
    Ok(())
}

/// `dns --corefile <path>` (§NEW "DNS engine process shape"): parse and
/// validate the rendered zone, expose it over the liveness/readiness
/// endpoints, and log the resolved view shape. Query processing is the
/// embedded resolver's job (§1, Non-goals); this subcommand is the
/// contract boundary the real resolver binary would consume.
async fn run_dns(corefile: &str) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(corefile)?;
    let zone = hcinfra_dns::corefile::parse(&text)?;

    info!(
        multus_hosts = zone.multus_hosts.len(),
        default_hosts = zone.default_hosts.len(),
        "dns engine ready (zone parsed; query processing delegated to the embedded resolver)"
    );

    let server = HttpServer::new(|| {
        App::new()
            .route("/health", web::get().to(|| async { HttpResponse::Ok().body("OK") }))
            .route("/ready", web::get().to(|| async { HttpResponse::Ok().body("OK") }))
    })
    .bind(("0.0.0.0", 8080))?
    .bind(("0.0.0.0", 8181))?
    .run();

    tokio::select! {
        res = server => res.map_err(anyhow::Error::from),
        _ = shutdown_signal() => Ok(()),
    }
}

/// `proxy --xds-port ... --namespace ... --proxy-name ...` (§4.7): the
/// Dynamic Proxy Configurator's own process — a `ProxyServer` watch loop
/// feeding the snapshot cache, serving the ADS gRPC endpoint on loopback
/// only (§3 "Invariants": "the configurator's listen address is
/// loopback-only").
async fn run_proxy(
    xds_port: u16,
    namespace: &str,
    proxy_name: Option<&str>,
    proxy_log_level: &str,
    metrics_port: u16,
) -> anyhow::Result<()> {
    let _ = log_level_to_filter(proxy_log_level);
    let client = kube::Client::try_default().await?;
    let (writer, reader) = proxy_cache_pair();

    let registry = prometheus::Registry::new();
    let snap_version_gauge = prometheus::IntGaugeVec::new(
        prometheus::Opts::new("hcinfra_proxy_snap_version", "last published proxy snapshot version"),
        &["proxy"],
    )?;
    registry.register(Box::new(snap_version_gauge.clone())).ok();
    let snap_version_sink: Arc<dyn hcinfra_xds::watch::SnapVersionSink> =
        Arc::new(SnapVersionGauge(snap_version_gauge));

    let watch_client = client.clone();
    let watch_namespace = namespace.to_owned();
    let watch_proxy_name = proxy_name.map(str::to_owned);
    let watch_writer = writer.clone();
    tokio::spawn(async move {
        hcinfra_xds::watch::run(
            watch_client,
            &watch_namespace,
            watch_proxy_name.as_deref(),
            watch_writer,
            Some(snap_version_sink),
        )
        .await;
    });

    let ads = AdsService::new(reader).into_server();
    let grpc_addr: SocketAddr = format!("127.0.0.1:{xds_port}").parse()?;
    info!(%grpc_addr, namespace, ?proxy_name, "dynamic proxy configurator listening on loopback");

    let metrics_registry = registry.clone();
    let metrics_server = HttpServer::new(move || {
        let registry = metrics_registry.clone();
        App::new().route(
            "/metrics",
            web::get().to(move || {
                let registry = registry.clone();
                async move {
                    let encoder = TextEncoder::new();
                    let mut buffer = vec![];
                    encoder.encode(&registry.gather(), &mut buffer).unwrap_or_default();
                    HttpResponse::Ok().body(buffer)
                }
            }),
        )
    })
    .bind(("0.0.0.0", metrics_port))?
    .run();

    tokio::select! {
        res = GrpcServer::builder().add_service(ads).serve(grpc_addr) => {
            res.map_err(anyhow::Error::from)
        }
        res = metrics_server => res.map_err(anyhow::Error::from),
        _ = shutdown_signal() => Ok(()),
    }
}

/// Adapts a plain `IntGaugeVec` to the watch loop's [`SnapVersionSink`] seam
/// (§NEW "Metrics") so `hcinfra-xds` doesn't need a `prometheus` dependency
/// of its own just for this one gauge.
struct SnapVersionGauge(prometheus::IntGaugeVec);

impl hcinfra_xds::watch::SnapVersionSink for SnapVersionGauge {
    fn set_snap_version(&self, proxy: &str, version: u64) {
        self.0.with_label_values(&[proxy]).set(version as i64);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
