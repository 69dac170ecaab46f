use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhub_core::config::Config;
use anyhub_core::hub::HubRegistry;
use anyhub_hooks::HookRegistry;
use anyhub_observability::metrics::MetricsCollector;
use anyhub_proxy::{ProxyRequest, ServerContext};
use anyhub_store::FileStore;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use clap::Parser;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "anyhub", version, about = "any-hub — multi-tenant caching reverse proxy for package registries")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "/etc/anyhub/anyhub.toml")]
    config: PathBuf,

    /// Log level, used unless `RUST_LOG` is set.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "any-hub starting");

    let config_path = if cli.config.exists() { cli.config.to_str() } else { None };
    let config = Config::load(config_path)?;

    let hook_registry = Arc::new(HookRegistry::new());
    anyhub_modules::register_all(&hook_registry)?;
    info!(modules = hook_registry.len(), "modules registered");

    let hub_registry = Arc::new(HubRegistry::build(&config, anyhub_modules::metadata_for)?);
    info!(hubs = hub_registry.len(), "hubs configured");

    let store = Arc::new(FileStore::new(config.global.storage_path.clone()));
    let metrics = Arc::new(MetricsCollector::new()?);
    let upstream_timeout = Duration::from_secs(config.global.upstream_timeout_secs);

    let ctx = Arc::new(ServerContext::new(
        hub_registry.clone(),
        hook_registry.clone(),
        store,
        upstream_timeout,
        Some(metrics.clone()),
    )?);

    let admin_state = anyhub_admin::AppState {
        hub_registry: hub_registry.clone(),
        hook_registry: hook_registry.clone(),
        metrics: Some(metrics.clone()),
    };
    let admin_router = anyhub_admin::build_router(admin_state);

    let fallback_ctx = ctx.clone();
    let app = Router::new()
        .merge(admin_router)
        .fallback(move |connect_info: ConnectInfo<SocketAddr>, req: Request| {
            let ctx = fallback_ctx.clone();
            async move { proxy_fallback(ctx, connect_info, req).await }
        })
        .layer(middleware::from_fn(request_id_middleware))
        .layer(CatchPanicLayer::custom(handle_panic));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.global.listen_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "any-hub listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("any-hub stopped");
    Ok(())
}

/// Attached to the request by [`request_id_middleware`], read back out by
/// [`proxy_fallback`] so `ProxyRequest::request_id` and the echoed
/// `X-Request-ID` header always agree.
#[derive(Clone)]
struct RequestId(String);

/// Middleware step 2 of §4.H: assign a request ID, echo it on every
/// response regardless of how the request was ultimately handled.
async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let id = uuid::Uuid::new_v4().to_string();
    req.extensions_mut().insert(RequestId(id.clone()));
    let mut response = next.run(req).await;
    if let Ok(hv) = HeaderValue::from_str(&id) {
        response.headers_mut().insert("x-request-id", hv);
    }
    response
}

/// Middleware step 3 of §4.H, folded into the proxy fallback rather than a
/// separate tower layer: diagnostics under `/-/` are matched as explicit
/// routes above and never reach here, so every request that does is a
/// tenant request needing a host lookup.
async fn proxy_fallback(
    ctx: Arc<ServerContext>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
) -> Response {
    let (parts, body) = req.into_parts();
    let request_id = parts
        .extensions
        .get::<RequestId>()
        .map(|r| r.0.clone())
        .unwrap_or_default();

    let host_header = parts
        .headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let Some(route) = ctx.hub_registry.lookup(&host_header) else {
        let body = serde_json::json!({"error": "host_unmapped"}).to_string();
        let mut response = Response::builder()
            .status(StatusCode::NOT_FOUND)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap_or_else(|_| Response::new(Body::empty()));
        if let Ok(hv) = HeaderValue::from_str(&host_header) {
            response.headers_mut().insert("x-any-hub-host", hv);
        }
        return response;
    };

    let body_bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(b) => b.to_vec(),
        Err(_) => return (StatusCode::BAD_REQUEST, "invalid request body").into_response(),
    };

    let proxy_req = ProxyRequest {
        method: parts.method.clone(),
        raw_path: parts.uri.path().to_string(),
        raw_query: parts.uri.query().map(str::to_string),
        headers: parts.headers.clone(),
        client_ip: addr.ip().to_string(),
        body: body_bytes,
        request_id,
    };

    anyhub_proxy::handle(&ctx, route, proxy_req).await
}

/// Middleware step 1 of §4.H: recover panics inside handlers as a shaped
/// JSON error rather than tearing down the connection.
fn handle_panic(_err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let body = serde_json::json!({"error": "module_handler_panic"}).to_string();
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
