//! Hop-by-hop header filtering and Content-Type inference (§4.F).

use http::HeaderMap;

/// RFC 7230 §6.1 hop-by-hop headers — never forwarded across the proxy
/// boundary in either direction.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "proxy-connection",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Copy `src` into a fresh map, dropping hop-by-hop headers. Used both for
/// shaping the outbound upstream request and for shaping the client-facing
/// passthrough response.
pub fn strip_hop_by_hop(src: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(src.len());
    for (name, value) in src.iter() {
        if !is_hop_by_hop(name.as_str()) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

/// `(name, value)` pair form, used where the caller builds a response body
/// outside of an `http::HeaderMap` (e.g. module `rewrite_response` hooks).
pub fn strip_hop_by_hop_pairs(pairs: Vec<(String, String)>) -> Vec<(String, String)> {
    pairs
        .into_iter()
        .filter(|(name, _)| !is_hop_by_hop(name))
        .collect()
}

/// Suffix-based Content-Type inference for cache hits whose module hook
/// declined to supply one (spec §4.F response-shaping table).
pub fn infer_content_type_by_suffix(locator_path: &str) -> Option<&'static str> {
    let lower = locator_path.to_ascii_lowercase();
    if lower.ends_with(".json") {
        Some("application/json")
    } else if lower.ends_with(".zip") {
        Some("application/zip")
    } else if lower.ends_with(".whl") {
        Some("application/octet-stream")
    } else if lower.ends_with(".tgz") || lower.ends_with(".tar.gz") {
        Some("application/gzip")
    } else if lower.ends_with(".mod") {
        Some("text/plain")
    } else {
        None
    }
}

/// Sniff a Docker/OCI manifest's `mediaType` field straight out of the
/// cached JSON body. Spec §9 resolves the ambiguity over hardcoded-vs-sniffed
/// Docker content-type in favor of sniffing with fallback to empty; the
/// module hook signature only sees the locator path, so the body-aware half
/// of that decision lives here in the engine that actually holds the bytes.
pub fn sniff_docker_media_type(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value
        .get("mediaType")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}
