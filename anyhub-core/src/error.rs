use thiserror::Error;

/// Unified error type for any-hub's core and proxy layers.
///
/// Variants map 1:1 onto the error taxonomy codes returned to clients as
/// `{"error": "<code>"}`; see [`AnyHubError::code`].
#[derive(Error, Debug)]
pub enum AnyHubError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("upstream failed: {0}")]
    UpstreamFailed(String),

    #[error("cache write failed: {0}")]
    CacheWriteFailed(String),

    #[error("host unmapped: {0}")]
    HostUnmapped(String),

    #[error("module handler panic: {0}")]
    ModuleHandlerPanic(String),

    #[error("unsupported upstream: {0}")]
    UnsupportedUpstream(String),

    #[error("module not found: {0}")]
    ModuleNotFound(String),

    #[error("module key required")]
    ModuleKeyRequired,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl AnyHubError {
    /// The stable error code surfaced in the JSON error body.
    pub fn code(&self) -> &'static str {
        match self {
            AnyHubError::NotFound(_) => "not_found",
            AnyHubError::UpstreamFailed(_) => "upstream_failed",
            AnyHubError::CacheWriteFailed(_) => "cache_write_failed",
            AnyHubError::HostUnmapped(_) => "host_unmapped",
            AnyHubError::ModuleHandlerPanic(_) => "module_handler_panic",
            AnyHubError::UnsupportedUpstream(_) => "unsupported_upstream",
            AnyHubError::ModuleNotFound(_) => "module_not_found",
            AnyHubError::ModuleKeyRequired => "module_key_required",
            AnyHubError::Io(_) => "upstream_failed",
            AnyHubError::Config(_) => "unsupported_upstream",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            AnyHubError::NotFound(_) => 404,
            AnyHubError::UpstreamFailed(_) => 502,
            AnyHubError::CacheWriteFailed(_) => 502,
            AnyHubError::HostUnmapped(_) => 404,
            AnyHubError::ModuleHandlerPanic(_) => 500,
            AnyHubError::UnsupportedUpstream(_) => 500,
            AnyHubError::ModuleNotFound(_) => 404,
            AnyHubError::ModuleKeyRequired => 400,
            AnyHubError::Io(_) => 502,
            AnyHubError::Config(_) => 500,
        }
    }

    /// JSON error body: `{"error": "<code>"}`, nothing else — the wire
    /// contract in §6/§7 does not carry a status field.
    pub fn to_json_body(&self) -> Vec<u8> {
        format!(r#"{{"error":"{}"}}"#, self.code()).into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AnyHubError::NotFound("x".into()).status_code(), 404);
        assert_eq!(AnyHubError::UpstreamFailed("x".into()).status_code(), 502);
        assert_eq!(AnyHubError::HostUnmapped("x".into()).status_code(), 404);
        assert_eq!(AnyHubError::ModuleHandlerPanic("x".into()).status_code(), 500);
        assert_eq!(AnyHubError::ModuleKeyRequired.status_code(), 400);
    }

    #[test]
    fn test_json_body_shape_is_error_only() {
        let body = AnyHubError::HostUnmapped("registry.example".into()).to_json_body();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["error"], "host_unmapped");
        assert!(parsed.get("status").is_none());
        assert_eq!(parsed.as_object().unwrap().len(), 1);
    }

    #[test]
    fn test_codes_match_taxonomy() {
        assert_eq!(AnyHubError::NotFound("x".into()).code(), "not_found");
        assert_eq!(AnyHubError::UpstreamFailed("x".into()).code(), "upstream_failed");
        assert_eq!(AnyHubError::CacheWriteFailed("x".into()).code(), "cache_write_failed");
        assert_eq!(AnyHubError::ModuleNotFound("x".into()).code(), "module_not_found");
        assert_eq!(AnyHubError::ModuleKeyRequired.code(), "module_key_required");
    }
}
