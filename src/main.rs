//! HarborCache Proxy
//!
//! Runs the response cache as a local forward proxy in front of one origin.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        harborcache                               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │    Proxy     │───▶│  CacheLayer  │───▶│    Origin    │       │
//! │  │  (listen)    │    │  (tiers)     │    │  (reqwest)   │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! │  health: /healthz /livez /readyz          metrics: /metrics      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use once_cell::sync::Lazy;
use prometheus::{IntGauge, IntGaugeVec};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use harborcache::adapters::{FsTierBackend, HttpFetcher, LoggingEventPublisher};
use harborcache::cache::{CacheLayer, LifecycleState};
use harborcache::domain::ports::{InterceptionLayer, TierBackend};
use harborcache::proxy::ProxyServer;
use harborcache::CacheConfig;

// =============================================================================
// CLI Arguments
// =============================================================================

/// HarborCache - offline-capable HTTP response cache
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "HARBORCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Origin URL (overrides the config file)
    #[arg(long, env = "HARBORCACHE_ORIGIN")]
    origin: Option<String>,

    /// Persistent cache directory (overrides the config file)
    #[arg(long, env = "HARBORCACHE_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Activate immediately after install
    #[arg(long, env = "HARBORCACHE_SKIP_WAITING")]
    skip_waiting: bool,

    /// Proxy bind address
    #[arg(long, env = "LISTEN_ADDR", default_value = "127.0.0.1:8080")]
    listen_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "127.0.0.1:9090")]
    metrics_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "127.0.0.1:8081")]
    health_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let config = load_config(&args)?;

    info!("Starting HarborCache");
    info!("  Origin: {}", config.origin);
    info!("  Tiers: {:?}", config.tiers.names());
    info!("  Seeds: {:?}", config.seeds);
    info!("  Skip waiting: {}", config.skip_waiting);

    // Storage backend
    let mut builder = CacheLayer::builder(config.clone())
        .fetcher(Arc::new(HttpFetcher::with_timeout(config.fetch_timeout())?))
        .events(Arc::new(LoggingEventPublisher::info_level()));
    if let Some(dir) = &config.cache_dir {
        let backend = FsTierBackend::open_with_quota(dir, config.quota_bytes)
            .await
            .with_context(|| format!("failed to open cache directory {}", dir.display()))?;
        info!("  Cache directory: {}", dir.display());
        builder = builder.backend(Arc::new(backend) as Arc<dyn TierBackend>);
    }
    let layer = Arc::new(builder.build().context("invalid cache configuration")?);

    // Install is fatal on failure; activation follows unless skip-waiting already did it
    layer.install().await.context("install failed")?;
    layer.activate().await.context("activation failed")?;
    info!("Cache layer active");

    let shutdown = CancellationToken::new();

    // Start health server
    let health_addr = args.health_addr.clone();
    let health_layer = layer.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, health_layer).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    let metrics_layer = layer.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, metrics_layer).await {
            error!("Metrics server error: {}", e);
        }
    });

    // Stop on Ctrl-C
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal_token.cancel();
        }
    });

    // Run the proxy
    let listen_addr: SocketAddr = args
        .listen_addr
        .parse()
        .with_context(|| format!("invalid listen address {}", args.listen_addr))?;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind proxy on {}", listen_addr))?;

    Arc::new(ProxyServer::new(layer)).serve(listener, shutdown).await?;

    info!("HarborCache shutdown complete");
    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<CacheConfig> {
    let mut config = match &args.config {
        Some(path) => CacheConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => CacheConfig::default(),
    };

    if let Some(origin) = &args.origin {
        config.origin = origin
            .parse()
            .with_context(|| format!("invalid origin {}", origin))?;
    }
    if let Some(dir) = &args.cache_dir {
        config.cache_dir = Some(dir.clone());
    }
    if args.skip_waiting {
        config.skip_waiting = true;
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=info", "rustls=warn"] {
        if let Ok(directive) = directive.parse::<tracing_subscriber::filter::Directive>() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(addr: &str, layer: Arc<CacheLayer>) -> anyhow::Result<()> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;

    fn health_response(
        req: &Request<hyper::body::Incoming>,
        layer: &CacheLayer,
    ) -> Response<Full<Bytes>> {
        let (status, body) = match req.uri().path() {
            "/healthz" | "/livez" => (StatusCode::OK, "ok".to_string()),
            "/readyz" => match layer.state() {
                LifecycleState::Active => (StatusCode::OK, "ok".to_string()),
                state => (StatusCode::SERVICE_UNAVAILABLE, state.to_string()),
            },
            _ => (StatusCode::NOT_FOUND, "not found".to_string()),
        };
        let mut response = Response::new(Full::new(Bytes::from(body)));
        *response.status_mut() = status;
        response
    }

    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("Invalid health server address: {}", addr))?;

    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind health server")?;

    info!("Health server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .context("Health server accept error")?;

        let io = TokioIo::new(stream);
        let layer = layer.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let response = health_response(&req, &layer);
                async move { Ok::<_, std::convert::Infallible>(response) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::error!("Health server connection error: {}", e);
            }
        });
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

/// Cumulative counts mirrored from the layer's own counters at scrape time.
///
/// A gauge set to the absolute value, so concurrent scrapes cannot double count.
static REQUESTS: Lazy<Option<IntGaugeVec>> = Lazy::new(|| {
    prometheus::register_int_gauge_vec!(
        "harborcache_requests",
        "Requests by how they were served, since start",
        &["outcome"]
    )
    .ok()
});

static STORE_ENTRIES: Lazy<Option<IntGauge>> = Lazy::new(|| {
    prometheus::register_int_gauge!("harborcache_store_entries", "Entries held by the store").ok()
});

static STORE_BYTES: Lazy<Option<IntGauge>> = Lazy::new(|| {
    prometheus::register_int_gauge!("harborcache_store_bytes", "Body bytes held by the store").ok()
});

static LIFECYCLE: Lazy<Option<IntGaugeVec>> = Lazy::new(|| {
    prometheus::register_int_gauge_vec!(
        "harborcache_lifecycle_state",
        "1 for the current lifecycle state",
        &["state"]
    )
    .ok()
});

/// Bring the registered collectors in line with the layer's counters
fn sync_metrics(layer: &CacheLayer) {
    let snapshot = layer.metrics().snapshot();
    if let Some(requests) = REQUESTS.as_ref() {
        for (outcome, value) in [
            ("hit", snapshot.hits),
            ("miss", snapshot.misses),
            ("network_fetch", snapshot.network_fetches),
            ("network_failure", snapshot.network_failures),
            ("background_refresh", snapshot.background_refreshes),
            ("background_failure", snapshot.background_failures),
            ("offline", snapshot.offline_responses),
            ("fallback", snapshot.fallback_responses),
            ("write_rejected", snapshot.write_rejections),
            ("bypassed", snapshot.bypassed),
        ] {
            requests
                .with_label_values(&[outcome])
                .set(i64::try_from(value).unwrap_or(i64::MAX));
        }
    }

    let stats = layer.store().backend().stats();
    if let Some(gauge) = STORE_ENTRIES.as_ref() {
        gauge.set(stats.entry_count as i64);
    }
    if let Some(gauge) = STORE_BYTES.as_ref() {
        gauge.set(stats.total_bytes as i64);
    }
    if let Some(lifecycle) = LIFECYCLE.as_ref() {
        let current = layer.state();
        for state in [
            LifecycleState::Installing,
            LifecycleState::Waiting,
            LifecycleState::Active,
        ] {
            lifecycle
                .with_label_values(&[state.to_string().as_str()])
                .set(i64::from(state == current));
        }
    }
}

async fn run_metrics_server(addr: &str, layer: Arc<CacheLayer>) -> anyhow::Result<()> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use prometheus::{Encoder, TextEncoder};

    fn metrics_response(
        req: &Request<hyper::body::Incoming>,
        layer: &CacheLayer,
    ) -> Response<Full<Bytes>> {
        match req.uri().path() {
            "/metrics" => {
                sync_metrics(layer);
                let encoder = TextEncoder::new();
                let metric_families = prometheus::gather();
                let mut buffer = Vec::new();
                let status = match encoder.encode(&metric_families, &mut buffer) {
                    Ok(()) => StatusCode::OK,
                    Err(e) => {
                        error!("Failed to encode metrics: {}", e);
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };

                let mut response = Response::new(Full::new(Bytes::from(buffer)));
                *response.status_mut() = status;
                if let Ok(content_type) = hyper::header::HeaderValue::from_str(encoder.format_type()) {
                    response
                        .headers_mut()
                        .insert(hyper::header::CONTENT_TYPE, content_type);
                }
                response
            }
            _ => {
                let mut response = Response::new(Full::new(Bytes::from("not found")));
                *response.status_mut() = StatusCode::NOT_FOUND;
                response
            }
        }
    }

    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("Invalid metrics server address: {}", addr))?;

    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind metrics server")?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .context("Metrics server accept error")?;

        let io = TokioIo::new(stream);
        let layer = layer.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let response = metrics_response(&req, &layer);
                async move { Ok::<_, std::convert::Infallible>(response) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::error!("Metrics server connection error: {}", e);
            }
        });
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_metrics_mirrors_snapshot_under_concurrent_scrapes() {
        let layer = Arc::new(CacheLayer::builder(CacheConfig::default()).build().unwrap());
        for _ in 0..7 {
            layer.metrics().record_hit();
        }
        layer.metrics().record_miss();

        let scrapes: Vec<_> = (0..8)
            .map(|_| {
                let layer = layer.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        sync_metrics(&layer);
                    }
                })
            })
            .collect();
        for scrape in scrapes {
            scrape.join().unwrap();
        }

        let requests = REQUESTS.as_ref().unwrap();
        assert_eq!(requests.with_label_values(&["hit"]).get(), 7);
        assert_eq!(requests.with_label_values(&["miss"]).get(), 1);

        layer.metrics().record_hit();
        sync_metrics(&layer);
        assert_eq!(requests.with_label_values(&["hit"]).get(), 8);
    }
}
