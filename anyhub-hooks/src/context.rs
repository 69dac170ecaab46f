/// Context exposed to every module hook callback (spec §4.B).
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub tenant_name: String,
    pub tenant_domain: String,
    pub tenant_type: String,
    pub module_key: String,
    pub upstream_host: String,
    pub request_method: String,
}
