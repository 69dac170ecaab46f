use std::sync::Arc;

use anyhub_core::hub::HubRegistry;
use anyhub_hooks::HookRegistry;
use anyhub_observability::metrics::MetricsCollector;
use axum::{routing::get, Router as AxumRouter};
use tracing::info;

use crate::handlers;

/// Shared state for the diagnostics API (§4.H). Read-only: every handler
/// here only ever reads from registries built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub hub_registry: Arc<HubRegistry>,
    pub hook_registry: Arc<HookRegistry>,
    pub metrics: Option<Arc<MetricsCollector>>,
}

/// Builds the `/-/...` diagnostics router. Mounted by `anyhub-server`
/// alongside the proxy router under a single listener (spec §4.H).
pub fn build_router(state: AppState) -> AxumRouter {
    let mut router = AxumRouter::new()
        .route("/-/modules", get(handlers::modules::list_modules))
        .route("/-/modules/{key}", get(handlers::modules::get_module));

    if state.metrics.is_some() {
        router = router.route("/-/metrics", get(metrics_handler));
    }

    info!("diagnostics router built");
    router.with_state(state)
}

async fn metrics_handler(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> String {
    match &state.metrics {
        Some(metrics) => metrics.gather_text(),
        None => String::new(),
    }
}
