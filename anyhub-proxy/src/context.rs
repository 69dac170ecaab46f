//! Shared, dependency-injected server context (§9: "global state is passed
//! as a context object, not reached for via a process-wide singleton").

use std::sync::Arc;
use std::time::Duration;

use anyhub_core::{HubRegistry, HubRoute};
use anyhub_hooks::HookRegistry;
use anyhub_observability::metrics::MetricsCollector;
use anyhub_store::FileStore;
use dashmap::DashMap;
use http::Uri;

/// Everything a request handler needs, built once at startup and shared
/// across every worker task. Hub/hook registries are immutable after
/// construction; the store and ETag map are internally synchronized.
pub struct ServerContext {
    pub hub_registry: Arc<HubRegistry>,
    pub hook_registry: Arc<HookRegistry>,
    pub store: Arc<FileStore>,
    pub http_client: reqwest::Client,
    /// `"tenant::locator_path" → ETag`, advisory-only (spec §5): a stale
    /// entry just costs one extra revalidation round trip, never a
    /// correctness violation.
    pub etag_map: DashMap<String, String>,
    pub upstream_timeout: Duration,
    pub metrics: Option<Arc<MetricsCollector>>,
}

impl ServerContext {
    pub fn new(
        hub_registry: Arc<HubRegistry>,
        hook_registry: Arc<HookRegistry>,
        store: Arc<FileStore>,
        upstream_timeout: Duration,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(upstream_timeout)
            .build()?;

        Ok(Self {
            hub_registry,
            hook_registry,
            store,
            http_client,
            etag_map: DashMap::new(),
            upstream_timeout,
            metrics,
        })
    }

    /// A client bound to a hub's configured outbound proxy, or the shared
    /// pooled client when the hub has none. Per-hub proxy clients are built
    /// on demand rather than cached (spec §5) — outbound-proxied hubs are
    /// the exception, not the common path.
    pub fn client_for(&self, route: &HubRoute) -> anyhow::Result<reqwest::Client> {
        match &route.proxy_url {
            None => Ok(self.http_client.clone()),
            Some(proxy_url) => {
                let proxy = reqwest::Proxy::all(uri_to_string(proxy_url))?;
                let client = reqwest::Client::builder()
                    .proxy(proxy)
                    .timeout(self.upstream_timeout)
                    .build()?;
                Ok(client)
            }
        }
    }
}

fn uri_to_string(uri: &Uri) -> String {
    uri.to_string()
}
