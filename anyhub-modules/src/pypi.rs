use anyhub_core::module::{
    CacheStrategyProfile, MigrationState, ModuleMetadata, ValidationMode,
};
use anyhub_core::policy::CachePolicy;
use anyhub_hooks::{HookStatus, ModuleHooks, RequestContext};
use std::time::Duration;

pub struct PypiHooks;

const DISTRIBUTION_SUFFIXES: &[&str] = &[".whl", ".tar.gz", ".tar.bz2", ".tgz", ".zip", ".egg"];

impl ModuleHooks for PypiHooks {
    /// `/files/...` and `/simple/...` pass through (modulo a trailing slash
    /// on `/simple/<pkg>`); distribution assets pass through untouched;
    /// everything else is assumed to be a bare package name and is folded
    /// under `/simple/<pkg>/`.
    fn normalize_path(
        &self,
        _ctx: &RequestContext,
        clean_path: &str,
        raw_query: Option<&[u8]>,
    ) -> (String, Option<Vec<u8>>) {
        if clean_path.starts_with("/files/") || clean_path.starts_with("/simple/") {
            return (ensure_simple_trailing_slash(clean_path), raw_query.map(|q| q.to_vec()));
        }
        if is_distribution_asset(clean_path) {
            return (clean_path.to_string(), raw_query.map(|q| q.to_vec()));
        }
        let trimmed = clean_path.trim_matches('/');
        if trimmed.is_empty() || trimmed.starts_with('_') {
            return (clean_path.to_string(), raw_query.map(|q| q.to_vec()));
        }
        (format!("/simple/{trimmed}/"), raw_query.map(|q| q.to_vec()))
    }

    /// `/files/<scheme>/<host>/<rest>` reconstructs the original off-domain
    /// distribution URL that was rewritten under our own domain by
    /// `rewrite_response` (spec §4.C).
    fn resolve_upstream(
        &self,
        _ctx: &RequestContext,
        _upstream_base_url: &str,
        clean_path: &str,
        raw_query: Option<&[u8]>,
    ) -> Option<String> {
        let trimmed = clean_path.strip_prefix("/files/")?;
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

    fn cache_policy(
        &self,
        _ctx: &RequestContext,
        locator_path: &str,
        current: CachePolicy,
    ) -> CachePolicy {
        if is_distribution_asset(locator_path) {
            return CachePolicy {
                allow_cache: true,
                allow_store: true,
                require_revalidate: false,
            };
        }
        CachePolicy {
            require_revalidate: true,
            ..current
        }
    }

    fn content_type(&self, _ctx: &RequestContext, locator_path: &str) -> Option<String> {
        if locator_path.contains("/simple/") {
            Some("text/html".to_string())
        } else {
            None
        }
    }

    /// Rewrites every absolute distribution URL embedded in a simple-index
    /// page (JSON or HTML) so it is served back through `/files/<scheme>/
    /// <host>/<rest>` on our own domain, letting distribution assets be
    /// cached regardless of which upstream host actually hosts them.
    fn rewrite_response(
        &self,
        ctx: &RequestContext,
        status: u16,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
        path: &str,
    ) -> Result<(u16, Vec<(String, String)>, Vec<u8>), String> {
        if !path.starts_with("/simple") && path != "/" {
            return Ok((status, headers, body));
        }
        let content_type = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .map(|(_, v)| v.clone())
            .unwrap_or_default();

        let (rewritten, new_content_type) = rewrite_simple_index_body(&body, &content_type, &ctx.tenant_domain)?;

        let mut out_headers: Vec<(String, String)> = headers
            .into_iter()
            .filter(|(k, _)| !k.eq_ignore_ascii_case("content-encoding"))
            .filter(|(k, _)| !k.eq_ignore_ascii_case("content-type"))
            .collect();
        out_headers.push(("Content-Type".to_string(), new_content_type));
        Ok((status, out_headers, rewritten))
    }
}

fn ensure_simple_trailing_slash(path: &str) -> String {
    if !path.starts_with("/simple/") {
        return path.to_string();
    }
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

fn is_distribution_asset(path: &str) -> bool {
    DISTRIBUTION_SUFFIXES.iter().any(|s| path.ends_with(s))
}

fn rewrite_simple_index_body(
    body: &[u8],
    content_type: &str,
    domain: &str,
) -> Result<(Vec<u8>, String), String> {
    let lower_ct = content_type.to_ascii_lowercase();
    let looks_like_json = lower_ct.contains("application/vnd.pypi.simple.v1+json")
        || std::str::from_utf8(body)
            .map(|s| s.trim_start().starts_with('{'))
            .unwrap_or(false);

    if looks_like_json {
        let mut value: serde_json::Value =
            serde_json::from_slice(body).map_err(|e| e.to_string())?;
        if let Some(files) = value.get_mut("files").and_then(|f| f.as_array_mut()) {
            for file in files {
                if let Some(url) = file.get("url").and_then(|u| u.as_str()) {
                    let rewritten = rewrite_pypi_file_url(domain, url);
                    file["url"] = serde_json::Value::String(rewritten);
                }
            }
        }
        let bytes = serde_json::to_vec(&value).map_err(|e| e.to_string())?;
        return Ok((bytes, "application/vnd.pypi.simple.v1+json".to_string()));
    }

    let text = std::str::from_utf8(body).map_err(|e| e.to_string())?;
    let rewritten = rewrite_simple_html(text, domain)?;
    Ok((rewritten.into_bytes(), "text/html; charset=utf-8".to_string()))
}

/// Parses the page with `tl` to find every absolute `href` /
/// `data-dist-info-metadata` / `data-core-metadata` attribute value, then
/// splices the rewritten values into the original text. `tl`'s DOM borrows
/// from the source buffer, so we rewrite by locating the exact attribute
/// value substrings rather than re-serializing the parsed tree.
fn rewrite_simple_html(body: &str, domain: &str) -> Result<String, String> {
    let dom = tl::parse(body, tl::ParserOptions::default()).map_err(|e| e.to_string())?;

    let mut replacements: Vec<(String, String)> = Vec::new();
    for node in dom.nodes() {
        let Some(tag) = node.as_tag() else { continue };
        for key in ["href", "data-dist-info-metadata", "data-core-metadata"] {
            let Some(Some(raw_value)) = tag.attributes().get(key) else {
                continue;
            };
            let Ok(value) = std::str::from_utf8(raw_value.as_bytes()) else {
                continue;
            };
            if value.starts_with("http://") || value.starts_with("https://") {
                let rewritten = rewrite_pypi_file_url(domain, value);
                if rewritten != value {
                    replacements.push((value.to_string(), rewritten));
                }
            }
        }
    }

    let mut output = body.to_string();
    for (original, rewritten) in replacements {
        if let Some(pos) = output.find(&original) {
            output.replace_range(pos..pos + original.len(), &rewritten);
        }
    }
    Ok(output)
}

/// Rewrites an absolute distribution URL to `https://<domain>/files/<scheme>/
/// <host><path>` so it round-trips back through `resolve_upstream`.
fn rewrite_pypi_file_url(domain: &str, original: &str) -> String {
    let Some((scheme, after_scheme)) = original.split_once("://") else {
        return original.to_string();
    };
    let (host, rest) = after_scheme.split_once('/').unwrap_or((after_scheme, ""));
    if scheme.is_empty() || host.is_empty() {
        return original.to_string();
    }
    format!("https://{domain}/files/{scheme}/{host}/{rest}")
}

pub fn metadata() -> ModuleMetadata {
    ModuleMetadata {
        key: "pypi",
        description: "Python Package Index (PEP 503/691 simple API)",
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

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RequestContext {
        RequestContext {
            tenant_name: "t".into(),
            tenant_domain: "pypi.example.com".into(),
            tenant_type: "pypi".into(),
            module_key: "pypi".into(),
            upstream_host: "pypi.org".into(),
            request_method: "GET".into(),
        }
    }

    #[test]
    fn normalize_folds_bare_package_name_under_simple() {
        let hooks = PypiHooks;
        let (path, _) = hooks.normalize_path(&ctx(), "/requests", None);
        assert_eq!(path, "/simple/requests/");
    }

    #[test]
    fn normalize_adds_trailing_slash_to_simple_paths() {
        let hooks = PypiHooks;
        let (path, _) = hooks.normalize_path(&ctx(), "/simple/requests", None);
        assert_eq!(path, "/simple/requests/");
    }

    #[test]
    fn normalize_leaves_distribution_assets_alone() {
        let hooks = PypiHooks;
        let (path, _) = hooks.normalize_path(&ctx(), "/files/https/example.org/x.whl", None);
        assert_eq!(path, "/files/https/example.org/x.whl");
    }

    #[test]
    fn resolve_upstream_reconstructs_off_domain_url() {
        let hooks = PypiHooks;
        let url = hooks
            .resolve_upstream(
                &ctx(),
                "https://pypi.org",
                "/files/https/files.pythonhosted.org/packages/x.whl",
                None,
            )
            .unwrap();
        assert_eq!(url, "https://files.pythonhosted.org/packages/x.whl");
    }

    #[test]
    fn resolve_upstream_none_for_non_files_path() {
        let hooks = PypiHooks;
        assert!(hooks
            .resolve_upstream(&ctx(), "https://pypi.org", "/simple/requests/", None)
            .is_none());
    }

    #[test]
    fn cache_policy_immutable_for_distribution_assets() {
        let hooks = PypiHooks;
        let c = ctx();
        let policy = hooks.cache_policy(
            &c,
            "/files/https/files.pythonhosted.org/x.whl",
            CachePolicy::REVALIDATE,
        );
        assert!(!policy.require_revalidate);
        assert!(policy.allow_cache);
    }

    #[test]
    fn rewrite_response_rewrites_json_file_urls() {
        let hooks = PypiHooks;
        let body = br#"{"files":[{"url":"https://files.pythonhosted.org/packages/x.whl"}]}"#.to_vec();
        let headers = vec![(
            "Content-Type".to_string(),
            "application/vnd.pypi.simple.v1+json".to_string(),
        )];
        let (_, out_headers, out_body) = hooks
            .rewrite_response(&ctx(), 200, headers, body, "/simple/requests/")
            .unwrap();
        let text = String::from_utf8(out_body).unwrap();
        assert!(text.contains("/files/https/files.pythonhosted.org/packages/x.whl"));
        assert!(out_headers
            .iter()
            .any(|(k, v)| k == "Content-Type" && v.contains("pypi.simple.v1+json")));
    }

    #[test]
    fn rewrite_response_rewrites_html_anchor_hrefs() {
        let hooks = PypiHooks;
        let body = br#"<html><body><a href="https://files.pythonhosted.org/packages/x.whl#sha256=abc">x.whl</a></body></html>"#.to_vec();
        let headers = vec![("Content-Type".to_string(), "text/html".to_string())];
        let (_, _, out_body) = hooks
            .rewrite_response(&ctx(), 200, headers, body, "/simple/requests/")
            .unwrap();
        let text = String::from_utf8(out_body).unwrap();
        assert!(text.contains("/files/https/files.pythonhosted.org/packages/x.whl#sha256=abc"));
    }

    #[test]
    fn rewrite_response_passthrough_for_non_simple_paths() {
        let hooks = PypiHooks;
        let body = b"irrelevant".to_vec();
        let headers = vec![];
        let (_, _, out_body) = hooks
            .rewrite_response(&ctx(), 200, headers, body.clone(), "/files/https/x/y.whl")
            .unwrap();
        assert_eq!(out_body, body);
    }
}
