use serde::{Deserialize, Serialize};

/// Per-request structured log fields (§7), emitted as one `tracing::info!`
/// event per completed request.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub hub: String,
    pub domain: String,
    pub hub_type: String,
    pub auth_mode: String,
    pub module_key: String,
    pub cache_hit: bool,
    pub upstream: String,
    pub upstream_status: Option<u16>,
    pub elapsed_ms: f64,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
