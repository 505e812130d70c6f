use anyhow::{Context, Result};
use gateway_core::{EndpointDirectory, ServiceRegistry};
use gateway_discovery::HttpDirectory;
use gateway_proxy::{
    Authenticator, CircuitBreakerConfig, Dispatcher, DispatcherConfig, InboundExchange,
    MetricsCollector, TrustedHeaderAuthenticator,
};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::tokio::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use tracing_subscriber::fmt::init as tracing_init;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_init();

    info!("Starting api-gateway...");

    let config = GatewayConfig::from_env();

    let directory: Arc<dyn EndpointDirectory> = match &config.discovery_url {
        Some(url) => {
            info!("Using discovery directory at {}", url);
            Arc::new(HttpDirectory::new(url.clone()))
        }
        None => {
            warn!("GATEWAY_DISCOVERY_URL not set - starting with an empty in-memory registry");
            Arc::new(ServiceRegistry::new())
        }
    };

    let metrics = MetricsCollector::new().context("failed to create metrics collector")?;
    info!("Metrics collector initialized");

    let dispatcher = Arc::new(Dispatcher::new(
        directory,
        DispatcherConfig {
            mount_prefix: config.mount_prefix.clone(),
            upstream_timeout: config.upstream_timeout,
            breaker: CircuitBreakerConfig {
                failure_threshold: config.failure_threshold,
                reset_timeout: config.reset_timeout,
            },
            strategy: Default::default(),
        },
        metrics.clone(),
    ));
    info!(
        "Dispatcher initialized (prefix: {}, failure threshold: {}, reset timeout: {:?})",
        config.mount_prefix, config.failure_threshold, config.reset_timeout
    );

    let authenticator: Arc<dyn Authenticator> = Arc::new(TrustedHeaderAuthenticator::new());

    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!("HTTP server listening on {}", config.listen_addr);

    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let io = TokioIo::new(stream);

        let dispatcher = dispatcher.clone();
        let authenticator = authenticator.clone();
        let metrics = metrics.clone();
        let mount_prefix = config.mount_prefix.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let dispatcher = dispatcher.clone();
                let authenticator = authenticator.clone();
                let metrics = metrics.clone();
                let mount_prefix = mount_prefix.clone();
                handle_request(req, dispatcher, authenticator, metrics, mount_prefix)
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Error serving connection from {}: {}", peer_addr, e);
            }
        });
    }
}

/// Gateway configuration read from the environment.
struct GatewayConfig {
    listen_addr: SocketAddr,
    mount_prefix: String,
    discovery_url: Option<String>,
    failure_threshold: u32,
    reset_timeout: Duration,
    upstream_timeout: Duration,
}

impl GatewayConfig {
    fn from_env() -> Self {
        let listen_addr = std::env::var("GATEWAY_HTTP_ADDR")
            .ok()
            .and_then(|addr| match addr.parse() {
                Ok(addr) => Some(addr),
                Err(_) => {
                    warn!("Invalid GATEWAY_HTTP_ADDR '{}', using default", addr);
                    None
                }
            })
            .unwrap_or_else(|| ([0, 0, 0, 0], 8787).into());

        let mount_prefix = normalize_prefix(
            std::env::var("GATEWAY_MOUNT_PREFIX").unwrap_or_else(|_| "/api/".to_string()),
        );

        Self {
            listen_addr,
            mount_prefix,
            discovery_url: std::env::var("GATEWAY_DISCOVERY_URL").ok(),
            failure_threshold: env_number("GATEWAY_FAILURE_THRESHOLD", 5),
            reset_timeout: Duration::from_secs(env_number("GATEWAY_RESET_TIMEOUT_SECS", 60)),
            upstream_timeout: Duration::from_secs(env_number("GATEWAY_UPSTREAM_TIMEOUT_SECS", 30)),
        }
    }
}

fn env_number<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// Mount prefixes always carry leading and trailing slashes.
fn normalize_prefix(prefix: String) -> String {
    let mut prefix = if prefix.starts_with('/') {
        prefix
    } else {
        format!("/{prefix}")
    };
    if !prefix.ends_with('/') {
        prefix.push('/');
    }
    prefix
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    dispatcher: Arc<Dispatcher>,
    authenticator: Arc<dyn Authenticator>,
    metrics: MetricsCollector,
    mount_prefix: String,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!("{} {}", method, path);

    if path == "/healthz" {
        return Ok(Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("OK\n")))
            .unwrap());
    }

    if path == "/metrics" && method == Method::GET {
        let metrics_text = metrics
            .gather()
            .unwrap_or_else(|_| "Failed to gather metrics\n".to_string());
        return Ok(Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "text/plain; version=0.0.4")
            .body(Full::new(Bytes::from(metrics_text)))
            .unwrap());
    }

    // Version endpoint lives directly under the mount prefix.
    if method == Method::GET && path == format!("{mount_prefix}v") {
        let body = serde_json::json!({ "version": "v1" });
        return Ok(Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "application/json")
            .body(Full::new(Bytes::from(body.to_string())))
            .unwrap());
    }

    let principal = authenticator.authenticate(req.headers()).await;
    let exchange = InboundExchange::from_request(req, principal).await?;
    Ok(dispatcher.dispatch(exchange).await)
}
