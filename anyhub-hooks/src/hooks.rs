use anyhub_core::policy::CachePolicy;

use crate::context::RequestContext;

/// Five optional per-module callbacks, represented as a trait with
/// default no-op implementations (spec §9: "a trait/interface with
/// default no-op methods" rather than a bag of `Option<fn>`).
///
/// Several module hook files in the source this was distilled from
/// exposed two incompatible signatures for the same callback (a bare
/// two-argument form and a richer `RequestContext` + raw-query-bytes +
/// `Result`-returning form). This trait standardizes on the richer form
/// per spec §9's explicit direction; there is only ever one signature to
/// implement.
pub trait ModuleHooks: Send + Sync {
    /// Rewrite request path before locator/upstream resolution. Default:
    /// pass through unchanged.
    fn normalize_path(
        &self,
        _ctx: &RequestContext,
        clean_path: &str,
        raw_query: Option<&[u8]>,
    ) -> (String, Option<Vec<u8>>) {
        (clean_path.to_string(), raw_query.map(|q| q.to_vec()))
    }

    /// Override the upstream URL. `None` means "use default base + path".
    fn resolve_upstream(
        &self,
        _ctx: &RequestContext,
        _upstream_base_url: &str,
        _clean_path: &str,
        _raw_query: Option<&[u8]>,
    ) -> Option<String> {
        None
    }

    /// Refine the policy computed by the engine.
    fn cache_policy(
        &self,
        _ctx: &RequestContext,
        _locator_path: &str,
        current: CachePolicy,
    ) -> CachePolicy {
        current
    }

    /// Content-Type for cache hits when the stored body carries none.
    /// `None` means "omit the header".
    fn content_type(&self, _ctx: &RequestContext, _locator_path: &str) -> Option<String> {
        None
    }

    /// Transform the upstream response body before it is cached/served.
    /// Default: pass through unchanged.
    fn rewrite_response(
        &self,
        _ctx: &RequestContext,
        status: u16,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
        _locator_path: &str,
    ) -> Result<(u16, Vec<(String, String)>, Vec<u8>), String> {
        Ok((status, headers, body))
    }
}

/// Which of the five callbacks a registered module actually overrides —
/// surfaced on the `/-/modules` diagnostic endpoint. Declared explicitly
/// at registration time rather than inferred reflectively from the trait
/// object, since Rust has no cheap "is this the default impl" check.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct HookStatus {
    pub normalize_path: bool,
    pub resolve_upstream: bool,
    pub cache_policy: bool,
    pub content_type: bool,
    pub rewrite_response: bool,
}
