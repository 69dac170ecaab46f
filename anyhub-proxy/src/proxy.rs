//! Proxy Engine (§4.F) — the full per-request orchestration: cache lookup,
//! conditional revalidation, upstream fetch with one auth retry, response
//! rewriting, and tee-to-store.

use std::io::Cursor;
use std::time::{Duration, SystemTime};

use anyhow::Context as _;
use anyhub_core::error::AnyHubError;
use anyhub_core::hub::HubRoute;
use anyhub_core::locator::{clean_path, fold_query, Locator};
use anyhub_core::policy::{BearerChallenge, CachePolicy};
use anyhub_hooks::{ModuleHooks, RequestContext};
use anyhub_observability::access_log::AccessLogEntry;
use anyhub_store::{PutOptions, ReadResult, StoreError};
use axum::body::Body;
use axum::response::Response;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use crate::auth::{self, Credentials};
use crate::context::ServerContext;
use crate::engine;
use crate::headers::{sniff_docker_media_type, strip_hop_by_hop, strip_hop_by_hop_pairs};

/// Per-request outcome, stashed in the response's extensions by whichever
/// leaf function produces the response and read back out in [`handle`] to
/// build the access log entry and record metrics — avoids threading five
/// extra return values through every intermediate function.
#[derive(Clone, Default)]
struct Outcome {
    cache_hit: bool,
    upstream: String,
    upstream_status: Option<u16>,
    error: Option<String>,
}

pub struct ProxyRequest {
    pub method: Method,
    pub raw_path: String,
    pub raw_query: Option<String>,
    pub headers: HeaderMap,
    pub client_ip: String,
    pub body: Vec<u8>,
    pub request_id: String,
}

/// Entry point: resolve the request against a hub route and produce the
/// response to send back to the client. Never returns `Err` — every failure
/// mode is surfaced as a shaped HTTP response (spec §7).
pub async fn handle(ctx: &ServerContext, route: &HubRoute, req: ProxyRequest) -> Response {
    let req_ctx = RequestContext {
        tenant_name: route.name.clone(),
        tenant_domain: route.domain.clone(),
        tenant_type: route.module_key.to_string(),
        module_key: route.module_key.to_string(),
        upstream_host: authority_of(&route.upstream_url),
        request_method: req.method.to_string(),
    };

    let Some(hooks) = ctx.hook_registry.fetch(route.module_key) else {
        return error_response(
            AnyHubError::ModuleNotFound(route.module_key.to_string()),
            &req.request_id,
        );
    };

    let cleaned = clean_path(&req.raw_path);
    let raw_query_bytes = req.raw_query.as_deref().map(str::as_bytes);
    let (normalized_path, normalized_query) =
        hooks.normalize_path(&req_ctx, &cleaned, raw_query_bytes);
    let normalized_query_str =
        normalized_query.as_deref().map(|q| String::from_utf8_lossy(q).into_owned());

    let locator_path = fold_query(&normalized_path, normalized_query_str.as_deref());
    let locator = Locator::new(route.name.clone(), locator_path.clone());

    let baseline = engine::compute_baseline(req.method.as_str(), &route.cache_strategy);
    let policy = hooks.cache_policy(&req_ctx, &locator_path, baseline);

    let started = SystemTime::now();
    let response = if policy.allow_cache {
        match ctx.store.get(&locator).await {
            Ok(read_result) => {
                serve_from_hit(
                    ctx,
                    route,
                    hooks.as_ref(),
                    &req_ctx,
                    &locator,
                    &locator_path,
                    &normalized_path,
                    normalized_query_str.as_deref(),
                    read_result,
                    policy,
                    &req,
                )
                .await
            }
            Err(StoreError::NotFound) => {
                fetch_and_respond(
                    ctx,
                    route,
                    hooks.as_ref(),
                    &req_ctx,
                    &locator,
                    &locator_path,
                    &normalized_path,
                    normalized_query_str.as_deref(),
                    policy,
                    &req,
                )
                .await
            }
            Err(e) => {
                warn!(hub = %route.name, error = %e, "cache read failed, falling back to upstream");
                fetch_and_respond(
                    ctx,
                    route,
                    hooks.as_ref(),
                    &req_ctx,
                    &locator,
                    &locator_path,
                    &normalized_path,
                    normalized_query_str.as_deref(),
                    policy,
                    &req,
                )
                .await
            }
        }
    } else {
        fetch_and_respond(
            ctx,
            route,
            hooks.as_ref(),
            &req_ctx,
            &locator,
            &locator_path,
            &normalized_path,
            normalized_query_str.as_deref(),
            policy,
            &req,
        )
        .await
    };

    let elapsed_ms = started.elapsed().unwrap_or_default().as_millis() as f64;
    let outcome = response.extensions().get::<Outcome>().cloned().unwrap_or_default();

    if let Some(metrics) = &ctx.metrics {
        metrics.record_request(&route.name, outcome.cache_hit, elapsed_ms / 1000.0);
        if !outcome.upstream.is_empty() {
            metrics.record_upstream_request(&route.name, req.method.as_str());
        }
    }

    let entry = AccessLogEntry {
        hub: route.name.clone(),
        domain: route.domain.clone(),
        hub_type: route.module_key.to_string(),
        auth_mode: if route.has_credentials() { "basic" } else { "none" }.to_string(),
        module_key: route.module_key.to_string(),
        cache_hit: outcome.cache_hit,
        upstream: outcome.upstream,
        upstream_status: outcome.upstream_status,
        elapsed_ms,
        request_id: req.request_id.clone(),
        error: outcome.error,
    };
    info!(entry = %serde_json::to_string(&entry).unwrap_or_default(), "request handled");
    response
}

#[allow(clippy::too_many_arguments)]
async fn serve_from_hit(
    ctx: &ServerContext,
    route: &HubRoute,
    hooks: &dyn ModuleHooks,
    req_ctx: &RequestContext,
    locator: &Locator,
    locator_path: &str,
    normalized_path: &str,
    normalized_query: Option<&str>,
    read_result: ReadResult,
    policy: CachePolicy,
    req: &ProxyRequest,
) -> Response {
    if !policy.require_revalidate {
        return serve_cached(hooks, req_ctx, locator_path, read_result, &req.request_id, &req.method)
            .await;
    }

    let now = SystemTime::now();
    if engine::is_fresh(read_result.entry.modification_time, route.cache_strategy.ttl_hint, now) {
        return serve_cached(hooks, req_ctx, locator_path, read_result, &req.request_id, &req.method)
            .await;
    }

    match route.cache_strategy.validation_mode {
        anyhub_core::module::ValidationMode::Never => {
            serve_cached(hooks, req_ctx, locator_path, read_result, &req.request_id, &req.method).await
        }
        _ => {
            revalidate_then_serve(
                ctx,
                route,
                hooks,
                req_ctx,
                locator,
                locator_path,
                normalized_path,
                normalized_query,
                read_result,
                policy,
                req,
            )
            .await
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn revalidate_then_serve(
    ctx: &ServerContext,
    route: &HubRoute,
    hooks: &dyn ModuleHooks,
    req_ctx: &RequestContext,
    locator: &Locator,
    locator_path: &str,
    normalized_path: &str,
    normalized_query: Option<&str>,
    read_result: ReadResult,
    policy: CachePolicy,
    req: &ProxyRequest,
) -> Response {
    let upstream_url = resolve_upstream_url(
        hooks,
        req_ctx,
        route,
        normalized_path,
        normalized_query.map(str::as_bytes),
    );

    let client = match ctx.client_for(route) {
        Ok(c) => c,
        Err(e) => {
            warn!(hub = %route.name, error = %e, "failed to build upstream client, falling back to fetch");
            return fetch_and_respond(
                ctx, route, hooks, req_ctx, locator, locator_path, normalized_path,
                normalized_query, policy, req,
            )
            .await;
        }
    };

    let mut builder = client.head(upstream_url.as_str()).timeout(ctx.upstream_timeout);
    if let Some(etag) = ctx.etag_map.get(&locator.key()) {
        builder = builder.header("If-None-Match", etag.value().clone());
    }
    if route.has_credentials() {
        builder = builder.header("Authorization", basic_header(route));
    }

    match builder.send().await {
        Ok(resp) if resp.status() == StatusCode::NOT_MODIFIED => {
            if let Some(etag) = resp.headers().get("etag").and_then(|v| v.to_str().ok()) {
                ctx.etag_map.insert(locator.key(), etag.to_string());
            }
            serve_cached(hooks, req_ctx, locator_path, read_result, &req.request_id, &req.method).await
        }
        Ok(resp) if resp.status() == StatusCode::OK => {
            let upstream_last_modified = resp
                .headers()
                .get("last-modified")
                .and_then(|v| v.to_str().ok())
                .and_then(parse_http_date);
            let still_fresh = upstream_last_modified
                .map(|lm| engine::upstream_not_newer(read_result.entry.modification_time, lm))
                .unwrap_or(false);
            if still_fresh {
                if let Some(etag) = resp.headers().get("etag").and_then(|v| v.to_str().ok()) {
                    ctx.etag_map.insert(locator.key(), etag.to_string());
                }
                serve_cached(hooks, req_ctx, locator_path, read_result, &req.request_id, &req.method)
                    .await
            } else {
                fetch_and_respond(
                    ctx, route, hooks, req_ctx, locator, locator_path, normalized_path,
                    normalized_query, policy, req,
                )
                .await
            }
        }
        Ok(resp) if resp.status() == StatusCode::NOT_FOUND => {
            let _ = ctx.store.remove(locator).await;
            fetch_and_respond(
                ctx, route, hooks, req_ctx, locator, locator_path, normalized_path,
                normalized_query, policy, req,
            )
            .await
        }
        // Any other status, or a transport error, falls through to a full
        // fetch rather than risking staleness or surfacing a validation
        // hiccup as a hard failure.
        _ => {
            fetch_and_respond(
                ctx, route, hooks, req_ctx, locator, locator_path, normalized_path,
                normalized_query, policy, req,
            )
            .await
        }
    }
}

async fn serve_cached(
    hooks: &dyn ModuleHooks,
    req_ctx: &RequestContext,
    locator_path: &str,
    mut read_result: ReadResult,
    request_id: &str,
    method: &Method,
) -> Response {
    let mut body = Vec::with_capacity(read_result.entry.size_bytes as usize);
    if let Err(e) = read_result.reader.read_to_end(&mut body).await {
        return error_response(AnyHubError::Io(e), request_id);
    }

    let content_type = hooks
        .content_type(req_ctx, locator_path)
        .or_else(|| crate::headers::infer_content_type_by_suffix(locator_path).map(str::to_string))
        .or_else(|| sniff_docker_media_type(&body));

    let mut builder = Response::builder().status(StatusCode::OK);
    if let Some(ct) = content_type {
        builder = builder.header("content-type", ct);
    }
    builder = builder
        .header("content-length", body.len().to_string())
        .header("x-any-hub-cache-hit", "true")
        .header("x-request-id", request_id);

    let body_for_response = if method == Method::HEAD { Vec::new() } else { body };
    let mut response = builder.body(Body::from(body_for_response)).unwrap_or_else(|_| {
        error_response(AnyHubError::UpstreamFailed("malformed response".into()), request_id)
    });
    response.extensions_mut().insert(Outcome {
        cache_hit: true,
        ..Default::default()
    });
    response
}

#[allow(clippy::too_many_arguments)]
async fn fetch_and_respond(
    ctx: &ServerContext,
    route: &HubRoute,
    hooks: &dyn ModuleHooks,
    req_ctx: &RequestContext,
    locator: &Locator,
    locator_path: &str,
    normalized_path: &str,
    normalized_query: Option<&str>,
    policy: CachePolicy,
    req: &ProxyRequest,
) -> Response {
    let upstream_url = resolve_upstream_url(
        hooks,
        req_ctx,
        route,
        normalized_path,
        normalized_query.map(str::as_bytes),
    );

    let client = match ctx.client_for(route) {
        Ok(c) => c,
        Err(e) => return error_response(AnyHubError::UpstreamFailed(e.to_string()), &req.request_id),
    };

    let creds = if route.has_credentials() {
        Some(Credentials {
            username: route.username.clone().unwrap_or_default(),
            password: route.password.clone().unwrap_or_default(),
        })
    } else {
        None
    };

    let outbound_headers = build_upstream_headers(&req.headers, route, &req.client_ip);

    let send_once = |auth_header: Option<String>| {
        let mut rb = client
            .request(req.method.clone(), upstream_url.as_str())
            .timeout(ctx.upstream_timeout)
            .headers(outbound_headers.clone());
        if !req.body.is_empty() {
            rb = rb.body(req.body.clone());
        }
        if let Some(auth) = &auth_header {
            rb = rb.header("authorization", auth.clone());
        }
        rb.send()
    };

    let preemptive_auth = creds.as_ref().map(basic_header_for);
    let first = send_once(preemptive_auth.clone()).await;

    let first = match first {
        Ok(resp) => resp,
        Err(e) => return error_response(AnyHubError::UpstreamFailed(e.to_string()), &req.request_id),
    };

    let final_resp = if matches!(first.status().as_u16(), 401 | 429) {
        let www_authenticate = first
            .headers()
            .get("www-authenticate")
            .and_then(|v| v.to_str().ok())
            .and_then(BearerChallenge::parse);

        if let Some(challenge) = www_authenticate {
            match auth::exchange_bearer_token(&client, &challenge, creds.as_ref(), ctx.upstream_timeout).await {
                Ok(token) => match send_once(Some(format!("Bearer {token}"))).await {
                    Ok(resp) => resp,
                    Err(e) => {
                        return error_response(AnyHubError::UpstreamFailed(e.to_string()), &req.request_id)
                    }
                },
                Err(e) => {
                    warn!(hub = %route.name, error = %e, "bearer token exchange failed");
                    first
                }
            }
        } else if preemptive_auth.is_some() {
            match send_once(preemptive_auth).await {
                Ok(resp) => resp,
                Err(e) => {
                    return error_response(AnyHubError::UpstreamFailed(e.to_string()), &req.request_id)
                }
            }
        } else {
            first
        }
    } else {
        first
    };

    let status = final_resp.status();
    let upstream_headers = final_resp.headers().clone();
    let body = match final_resp.bytes().await {
        Ok(b) => b.to_vec(),
        Err(e) => return error_response(AnyHubError::UpstreamFailed(e.to_string()), &req.request_id),
    };

    let header_pairs: Vec<(String, String)> = upstream_headers
        .iter()
        .filter_map(|(n, v)| v.to_str().ok().map(|v| (n.as_str().to_string(), v.to_string())))
        .collect();

    let (status, header_pairs, body) = match hooks.rewrite_response(
        req_ctx,
        status.as_u16(),
        header_pairs.clone(),
        body.clone(),
        locator_path,
    ) {
        Ok(rewritten) => rewritten,
        Err(e) => {
            warn!(hub = %route.name, error = %e, "rewrite_response hook failed, passing through unmodified");
            (status.as_u16(), header_pairs, body)
        }
    };

    if status == 200 && policy.allow_store && req.method == Method::GET {
        let modification_time = header_pairs
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case("last-modified"))
            .and_then(|(_, v)| parse_http_date(v));
        match ctx
            .store
            .put(locator, Cursor::new(body.clone()), PutOptions { modification_time })
            .await
        {
            Ok(_) => {
                if let Some((_, etag)) = header_pairs.iter().find(|(n, _)| n.eq_ignore_ascii_case("etag")) {
                    ctx.etag_map.insert(locator.key(), etag.clone());
                } else if let Some((_, digest)) = header_pairs
                    .iter()
                    .find(|(n, _)| n.eq_ignore_ascii_case("docker-content-digest"))
                {
                    ctx.etag_map.insert(locator.key(), digest.clone());
                }
            }
            Err(e) => {
                warn!(hub = %route.name, locator = %locator_path, error = %e, "cache_write_failed");
            }
        }
    }

    build_passthrough_response(status, header_pairs, body, &req.request_id, &upstream_url, &req.method)
}

fn build_passthrough_response(
    status: u16,
    header_pairs: Vec<(String, String)>,
    body: Vec<u8>,
    request_id: &str,
    upstream_url: &str,
    method: &Method,
) -> Response {
    let filtered = strip_hop_by_hop_pairs(header_pairs);
    let mut builder = Response::builder().status(
        StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
    );
    for (name, value) in &filtered {
        if let Ok(hv) = HeaderValue::from_str(value) {
            builder = builder.header(name, hv);
        }
    }
    builder = builder
        .header("x-any-hub-cache-hit", "false")
        .header("x-any-hub-upstream", upstream_url)
        .header("x-request-id", request_id);

    let out_body = if method == Method::HEAD { Vec::new() } else { body };
    let mut response = builder
        .body(Body::from(out_body))
        .unwrap_or_else(|_| error_response(AnyHubError::UpstreamFailed("malformed response".into()), request_id));
    response.extensions_mut().insert(Outcome {
        cache_hit: false,
        upstream: upstream_url.to_string(),
        upstream_status: Some(status),
        ..Default::default()
    });
    response
}

fn resolve_upstream_url(
    hooks: &dyn ModuleHooks,
    req_ctx: &RequestContext,
    route: &HubRoute,
    normalized_path: &str,
    normalized_query: Option<&[u8]>,
) -> String {
    let base = route.upstream_url.to_string();
    hooks
        .resolve_upstream(req_ctx, &base, normalized_path, normalized_query)
        .unwrap_or_else(|| {
            let query = normalized_query.map(|q| String::from_utf8_lossy(q).into_owned());
            default_upstream_url(&base, normalized_path, query.as_deref())
        })
}

fn default_upstream_url(base: &str, path: &str, query: Option<&str>) -> String {
    let trimmed = base.trim_end_matches('/');
    let mut url = format!("{trimmed}{path}");
    if let Some(q) = query {
        if !q.is_empty() {
            url.push('?');
            url.push_str(q);
        }
    }
    url
}

fn build_upstream_headers(client_headers: &HeaderMap, route: &HubRoute, client_ip: &str) -> HeaderMap {
    let mut headers = strip_hop_by_hop(client_headers);
    headers.remove("accept-encoding");
    headers.remove("host");
    if let Ok(hv) = HeaderValue::from_str(&authority_of(&route.upstream_url)) {
        headers.insert("host", hv);
    }

    let forwarded_for = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{existing}, {client_ip}"),
        None => client_ip.to_string(),
    };
    if let Ok(hv) = HeaderValue::from_str(&forwarded_for) {
        headers.insert("x-forwarded-for", hv);
    }

    if let Ok(hv) = HeaderValue::from_str(&route.domain) {
        headers.insert("x-forwarded-host", hv);
    }
    headers.insert("x-forwarded-proto", HeaderValue::from_static("http"));
    if let Ok(hv) = HeaderValue::from_str(&route.listen_port.to_string()) {
        headers.insert("x-forwarded-port", hv);
    }

    headers
}

/// Parse an RFC 7231 `Last-Modified`/`Date` value. HTTP-date's preferred
/// IMF-fixdate form is RFC 2822-compatible, which covers every upstream this
/// proxy talks to in practice.
fn parse_http_date(s: &str) -> Option<SystemTime> {
    let dt = chrono::DateTime::parse_from_rfc2822(s).ok()?;
    let secs = dt.timestamp();
    if secs < 0 {
        return Some(SystemTime::UNIX_EPOCH);
    }
    Some(SystemTime::UNIX_EPOCH + Duration::from_secs(secs as u64))
}

fn authority_of(uri: &http::Uri) -> String {
    uri.authority().map(|a| a.to_string()).unwrap_or_default()
}

fn basic_header(route: &HubRoute) -> String {
    auth::basic_auth_header(&Credentials {
        username: route.username.clone().unwrap_or_default(),
        password: route.password.clone().unwrap_or_default(),
    })
}

fn basic_header_for(creds: &Credentials) -> String {
    auth::basic_auth_header(creds)
}

fn error_response(err: AnyHubError, request_id: &str) -> Response {
    let code = err.code().to_string();
    let mut response = Response::builder()
        .status(StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR))
        .header("content-type", "application/json")
        .header("x-request-id", request_id)
        .body(Body::from(err.to_json_body()))
        .context("building error response")
        .unwrap_or_else(|_| Response::new(Body::empty()));
    response.extensions_mut().insert(Outcome {
        error: Some(code),
        ..Default::default()
    });
    response
}
