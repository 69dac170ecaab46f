use anyhub_core::module::{
    CacheStrategyProfile, MigrationState, ModuleMetadata, ValidationMode,
};
use anyhub_core::policy::CachePolicy;
use anyhub_hooks::{HookStatus, ModuleHooks, RequestContext};
use dashmap::DashMap;
use serde_json::Value;
use std::time::Duration;

/// `(tenant, package, reference, type) → original_dist_url`, populated by
/// `rewrite_response` while rewriting provider metadata and consulted by
/// `resolve_upstream` for `/dists/<package>/<reference>.<type>` mirror
/// requests (spec §4.C, §5, §9 — this mapping has no precedent in any
/// single upstream source file; the two forms of dist path, `/dist/` direct
/// and `/dists/` mirror-style, are kept as distinct mechanisms).
#[derive(Default)]
pub struct ComposerHooks {
    dist_registry: DashMap<String, String>,
}

impl ComposerHooks {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry_key(tenant: &str, package: &str, reference: &str, kind: &str) -> String {
        format!("{tenant}::{package}::{reference}::{kind}")
    }
}

impl ModuleHooks for ComposerHooks {
    /// Dist paths encode the upstream scheme/host/rest in the path itself
    /// (mirroring pypi's `/files/`), so the query string is dropped rather
    /// than folded into the cache key.
    fn normalize_path(
        &self,
        _ctx: &RequestContext,
        clean_path: &str,
        raw_query: Option<&[u8]>,
    ) -> (String, Option<Vec<u8>>) {
        if is_composer_dist_path(clean_path) {
            (clean_path.to_string(), None)
        } else {
            (clean_path.to_string(), raw_query.map(|q| q.to_vec()))
        }
    }

    fn resolve_upstream(
        &self,
        ctx: &RequestContext,
        _upstream_base_url: &str,
        clean_path: &str,
        raw_query: Option<&[u8]>,
    ) -> Option<String> {
        if let Some(url) = parse_composer_dist_url(clean_path, raw_query) {
            return Some(url);
        }
        let (package, reference, kind) = parse_mirror_dist_path(clean_path)?;
        let key = Self::registry_key(&ctx.tenant_name, &package, &reference, &kind);
        self.dist_registry.get(&key).map(|v| v.clone())
    }

    fn cache_policy(
        &self,
        _ctx: &RequestContext,
        locator_path: &str,
        _current: CachePolicy,
    ) -> CachePolicy {
        if is_composer_dist_path(locator_path) {
            CachePolicy {
                allow_cache: true,
                allow_store: true,
                require_revalidate: false,
            }
        } else if is_composer_metadata_path(locator_path) {
            CachePolicy {
                allow_cache: true,
                allow_store: true,
                require_revalidate: true,
            }
        } else {
            CachePolicy::DENY
        }
    }

    fn content_type(&self, _ctx: &RequestContext, locator_path: &str) -> Option<String> {
        if is_composer_metadata_path(locator_path) {
            Some("application/json".to_string())
        } else {
            None
        }
    }

    fn rewrite_response(
        &self,
        ctx: &RequestContext,
        status: u16,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
        path: &str,
    ) -> Result<(u16, Vec<(String, String)>, Vec<u8>), String> {
        if path == "/packages.json" {
            return match rewrite_composer_root_body(&body, &ctx.tenant_domain)? {
                Some(data) => Ok((status, ensure_json_headers(headers), data)),
                None => Ok((status, headers, body)),
            };
        }
        if is_composer_metadata_path(path) {
            return match rewrite_composer_metadata(
                &body,
                &ctx.tenant_name,
                &ctx.tenant_domain,
                &self.dist_registry,
            )? {
                Some(data) => Ok((status, ensure_json_headers(headers), data)),
                None => Ok((status, headers, body)),
            };
        }
        Ok((status, headers, body))
    }
}

fn ensure_json_headers(headers: Vec<(String, String)>) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = headers
        .into_iter()
        .filter(|(k, _)| !k.eq_ignore_ascii_case("content-encoding"))
        .filter(|(k, _)| !k.eq_ignore_ascii_case("etag"))
        .filter(|(k, _)| !k.eq_ignore_ascii_case("content-type"))
        .collect();
    out.push(("Content-Type".to_string(), "application/json".to_string()));
    out
}

fn is_composer_metadata_path(path: &str) -> bool {
    path == "/packages.json"
        || path.starts_with("/p2/")
        || path.starts_with("/p/")
        || path.starts_with("/provider-")
        || path.starts_with("/providers/")
}

fn is_composer_dist_path(path: &str) -> bool {
    path.starts_with("/dist/") || path.starts_with("/dists/")
}

/// Parses the mirror-style `/dists/<package>/<reference>.<type>` form, where
/// `<package>` may itself contain slashes (e.g. `vendor/name`).
fn parse_mirror_dist_path(path: &str) -> Option<(String, String, String)> {
    let trimmed = path.strip_prefix("/dists/")?;
    let (package, tail) = trimmed.rsplit_once('/')?;
    let (reference, kind) = tail.rsplit_once('.')?;
    if package.is_empty() || reference.is_empty() || kind.is_empty() {
        return None;
    }
    Some((package.to_string(), reference.to_string(), kind.to_string()))
}

fn parse_composer_dist_url(path: &str, raw_query: Option<&[u8]>) -> Option<String> {
    let trimmed = path.strip_prefix("/dist/")?;
    let mut parts = trimmed.splitn(3, '/');
    let scheme = parts.next()?;
    let host = parts.next()?;
    let rest = parts.next().unwrap_or("");
    if scheme.is_empty() || host.is_empty() {
        return None;
    }
    let mut url = format!("{scheme}://{host}/{}", rest.trim_start_matches('/'));
    if let Some(q) = raw_query {
        if !q.is_empty() {
            url.push('?');
            url.push_str(&String::from_utf8_lossy(q));
        }
    }
    Some(url)
}

/// Rewrites an absolute distribution URL to `/dist/<scheme>/<host>/<rest>`
/// on our own domain so it round-trips through `resolve_upstream`.
fn rewrite_composer_dist_url(domain: &str, original: &str) -> String {
    let Some((scheme, after_scheme)) = original.split_once("://") else {
        return original.to_string();
    };
    let (host, rest) = after_scheme.split_once('/').unwrap_or((after_scheme, ""));
    if scheme.is_empty() || host.is_empty() {
        return original.to_string();
    }
    format!("https://{domain}/dist/{scheme}/{host}/{rest}")
}

/// Rewrites any absolute or protocol-relative URL so it points back at our
/// own domain, preserving path-only references untouched apart from
/// ensuring a leading slash.
fn rewrite_composer_absolute(domain: &str, raw: &str) -> String {
    if raw.is_empty() {
        return raw.to_string();
    }
    if let Some(rest) = raw.strip_prefix("//") {
        return format!("https://{domain}/{rest}");
    }
    if raw.starts_with("http://") || raw.starts_with("https://") {
        if let Some((_, after_scheme)) = raw.split_once("://") {
            if let Some((_, rest)) = after_scheme.split_once('/') {
                return format!("https://{domain}/{rest}");
            }
            return format!("https://{domain}/");
        }
        return raw.to_string();
    }
    if raw.starts_with('/') {
        format!("https://{domain}{raw}")
    } else {
        format!("https://{domain}/{raw}")
    }
}

/// Rewrites `metadata-url`, `providers-api`, `providers-url`, `notify-batch`
/// and every `provider-includes` entry in `packages.json` to point back at
/// our own domain (grounded on the richer of the two upstream
/// implementations of this rewrite), and injects a preferred `mirrors`
/// entry templated on the `/dists/%package%/%reference%.%type%` form so
/// Composer itself can route dist fetches through us (spec §4.C/§8
/// scenario 6 — no upstream precedent for this entry, authored fresh).
fn rewrite_composer_root_body(body: &[u8], domain: &str) -> Result<Option<Vec<u8>>, String> {
    let mut root: Value = serde_json::from_slice(body).map_err(|e| e.to_string())?;
    let Some(map) = root.as_object_mut() else {
        return Ok(None);
    };
    let mut changed = false;

    for key in ["metadata-url", "providers-api", "providers-url", "notify-batch"] {
        if let Some(raw) = map.get(key).and_then(|v| v.as_str()).map(str::to_string) {
            if !raw.is_empty() {
                let rewritten = rewrite_composer_absolute(domain, &raw);
                if rewritten != raw {
                    map.insert(key.to_string(), Value::String(rewritten));
                    changed = true;
                }
            }
        }
    }

    if let Some(Value::Object(includes)) = map.get_mut("provider-includes") {
        let keys: Vec<String> = includes.keys().cloned().collect();
        for file in keys {
            let entry = includes.get(&file).cloned().unwrap_or(Value::Null);
            match entry {
                Value::Object(mut entry_map) => {
                    if let Some(url_value) = entry_map.get("url").and_then(|v| v.as_str()) {
                        let rewritten = rewrite_composer_absolute(domain, url_value);
                        if rewritten != url_value {
                            changed = true;
                        }
                        entry_map.insert("url".to_string(), Value::String(rewritten));
                    }
                    includes.insert(file, Value::Object(entry_map));
                }
                Value::String(path_value) => {
                    let rewritten = rewrite_composer_absolute(domain, &path_value);
                    if rewritten != path_value {
                        changed = true;
                    }
                    includes.insert(file, Value::String(rewritten));
                }
                other => {
                    includes.insert(file, other);
                }
            }
        }
    }

    let mirror_entry = serde_json::json!({
        "dist-url": format!("https://{domain}/dists/%package%/%reference%.%type%"),
        "preferred": true,
    });
    let already_present = map
        .get("mirrors")
        .and_then(|m| m.as_array())
        .map(|arr| arr.iter().any(|m| m.get("dist-url") == mirror_entry.get("dist-url")))
        .unwrap_or(false);
    if !already_present {
        match map.get_mut("mirrors") {
            Some(Value::Array(mirrors)) => mirrors.push(mirror_entry),
            _ => {
                map.insert("mirrors".to_string(), Value::Array(vec![mirror_entry]));
            }
        }
        changed = true;
    }

    if !changed {
        return Ok(None);
    }
    serde_json::to_vec(&root).map(Some).map_err(|e| e.to_string())
}

/// Rewrites `dist.url` in every version entry of every package in a p2/p/
/// provider metadata payload, filling in a missing `name` field from the
/// package key when present, and records each version's original dist URL
/// in `dist_registry` so the `/dists/<package>/<reference>.<type>` mirror
/// form can later resolve it.
fn rewrite_composer_metadata(
    body: &[u8],
    tenant_name: &str,
    domain: &str,
    dist_registry: &DashMap<String, String>,
) -> Result<Option<Vec<u8>>, String> {
    let mut root: Value = serde_json::from_slice(body).map_err(|e| e.to_string())?;
    let Some(packages) = root.get_mut("packages").and_then(|p| p.as_object_mut()) else {
        return Ok(None);
    };
    if packages.is_empty() {
        return Ok(None);
    }

    let mut changed = false;
    let names: Vec<String> = packages.keys().cloned().collect();
    for name in names {
        let entry = packages.get_mut(&name).expect("key from keys()");
        if rewrite_composer_versions(entry, tenant_name, domain, &name, dist_registry) {
            changed = true;
        }
    }

    if !changed {
        return Ok(None);
    }
    serde_json::to_vec(&root).map(Some).map_err(|e| e.to_string())
}

/// A package's versions may be encoded as either an array or an object
/// keyed by version string; both shapes appear across Composer providers.
fn rewrite_composer_versions(
    value: &mut Value,
    tenant_name: &str,
    domain: &str,
    package_name: &str,
    dist_registry: &DashMap<String, String>,
) -> bool {
    match value {
        Value::Array(items) => {
            let mut changed = false;
            for item in items {
                if rewrite_composer_version(item, tenant_name, domain, package_name, dist_registry) {
                    changed = true;
                }
            }
            changed
        }
        Value::Object(versions) => {
            let mut changed = false;
            for (_, item) in versions.iter_mut() {
                if rewrite_composer_version(item, tenant_name, domain, package_name, dist_registry) {
                    changed = true;
                }
            }
            changed
        }
        _ => false,
    }
}

fn rewrite_composer_version(
    entry: &mut Value,
    tenant_name: &str,
    domain: &str,
    package_name: &str,
    dist_registry: &DashMap<String, String>,
) -> bool {
    let Some(entry_map) = entry.as_object_mut() else {
        return false;
    };
    let mut changed = false;

    if !package_name.is_empty() {
        let has_name = entry_map
            .get("name")
            .and_then(|v| v.as_str())
            .map(|s| !s.trim().is_empty())
            .unwrap_or(false);
        if !has_name {
            entry_map.insert("name".to_string(), Value::String(package_name.to_string()));
            changed = true;
        }
    }

    let Some(Value::Object(dist)) = entry_map.get_mut("dist") else {
        return changed;
    };
    let Some(url_value) = dist.get("url").and_then(|v| v.as_str()).map(str::to_string) else {
        return changed;
    };
    if url_value.is_empty() {
        return changed;
    }

    if let (Some(reference), Some(kind)) = (
        dist.get("reference").and_then(|v| v.as_str()),
        dist.get("type").and_then(|v| v.as_str()),
    ) {
        if !reference.is_empty() && !kind.is_empty() {
            let key = ComposerHooks::registry_key(tenant_name, package_name, reference, kind);
            dist_registry.insert(key, url_value.clone());
        }
    }

    let rewritten = rewrite_composer_dist_url(domain, &url_value);
    if rewritten != url_value {
        dist.insert("url".to_string(), Value::String(rewritten));
        changed = true;
    }
    changed
}

pub fn metadata() -> ModuleMetadata {
    ModuleMetadata {
        key: "composer",
        description: "PHP Composer package repository",
        migration_state: MigrationState::Ga,
        supported_protocols: &["http", "https"],
        cache_strategy: CacheStrategyProfile {
            ttl_hint: Duration::from_secs(3600),
            validation_mode: ValidationMode::LastModified,
            disk_layout: "flat",
            requires_metadata_file: false,
            supports_streaming_write: true,
        },
    }
}

pub fn hook_status() -> HookStatus {
    HookStatus {
        normalize_path: true,
        resolve_upstream: true,
        cache_policy: true,
        content_type: true,
        rewrite_response: true,
    }
}
