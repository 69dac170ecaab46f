use std::collections::HashMap;
use std::time::Duration;

use http::Uri;

use crate::config::{Config, HubConfig};
use crate::module::{CacheStrategyProfile, ModuleMetadata, StrategyOverrides, ValidationMode};

/// Immutable per-tenant routing record, built once at startup from config.
/// Never mutated afterward — the sole authority for its tenant for the
/// lifetime of the process (spec §3 invariant).
#[derive(Debug, Clone)]
pub struct HubRoute {
    pub name: String,
    pub domain: String,
    pub listen_port: u16,
    pub effective_ttl: Duration,
    pub upstream_url: Uri,
    pub proxy_url: Option<Uri>,
    pub module_key: &'static str,
    pub module_metadata: ModuleMetadata,
    pub cache_strategy: CacheStrategyProfile,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl HubRoute {
    pub fn has_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }
}

/// `host → HubRoute` map built once at startup. Host normalization
/// lowercases, strips a trailing dot, and discards any port component,
/// matching `internal/server/hub_registry.go`'s `normalizeHost`.
pub struct HubRegistry {
    routes: HashMap<String, HubRoute>,
    ordered: Vec<String>,
}

impl HubRegistry {
    /// Build the registry from config and a module-lookup function. Returns
    /// an error (fatal at startup) on duplicate hosts, unresolvable module
    /// keys, or unparseable upstream/proxy URLs.
    pub fn build(
        config: &Config,
        resolve_module: impl Fn(&str) -> Option<ModuleMetadata>,
    ) -> anyhow::Result<HubRegistry> {
        let mut routes = HashMap::new();
        let mut ordered = Vec::new();

        for hub in &config.hubs {
            let route = build_hub_route(hub, &config.global, &resolve_module)?;
            let host = normalize_host(&hub.domain);
            if routes.contains_key(&host) {
                anyhow::bail!("duplicate hub host mapping: {host}");
            }
            ordered.push(hub.name.clone());
            routes.insert(host, route);
        }

        Ok(HubRegistry { routes, ordered })
    }

    /// Look up a route by the raw `Host` header value. Case-insensitive,
    /// port-stripping.
    pub fn lookup(&self, host_header: &str) -> Option<&HubRoute> {
        self.routes.get(&normalize_host(host_header))
    }

    pub fn iter(&self) -> impl Iterator<Item = &HubRoute> {
        self.ordered
            .iter()
            .filter_map(|name| self.routes.values().find(|r| &r.name == name))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn build_hub_route(
    hub: &HubConfig,
    global: &crate::config::GlobalConfig,
    resolve_module: &impl Fn(&str) -> Option<ModuleMetadata>,
) -> anyhow::Result<HubRoute> {
    let module_key = hub.hub_type.module_key();
    let module_metadata = resolve_module(module_key)
        .ok_or_else(|| anyhow::anyhow!("unregistered module key: {module_key}"))?;

    let upstream_url: Uri = hub
        .upstream
        .parse()
        .map_err(|e| anyhow::anyhow!("unsupported upstream url {:?}: {e}", hub.upstream))?;

    let proxy_url = hub
        .proxy
        .as_ref()
        .map(|p| {
            p.parse::<Uri>()
                .map_err(|e| anyhow::anyhow!("unsupported proxy url {p:?}: {e}"))
        })
        .transpose()?;

    let effective_ttl = Duration::from_secs(hub.cache_ttl_secs.unwrap_or(global.cache_ttl_secs));

    let cache_strategy = module_metadata.cache_strategy.resolve(StrategyOverrides {
        ttl: hub.cache_ttl_secs.map(Duration::from_secs),
        validation_mode: hub.validation_mode,
    });

    Ok(HubRoute {
        name: hub.name.clone(),
        domain: hub.domain.clone(),
        listen_port: global.listen_port,
        effective_ttl,
        upstream_url,
        proxy_url,
        module_key,
        module_metadata,
        cache_strategy,
        username: hub.username.clone(),
        password: hub.password.clone(),
    })
}

/// Lowercase, strip trailing dot, discard port.
pub fn normalize_host(raw: &str) -> String {
    let without_port = match raw.rsplit_once(':') {
        // Only treat as host:port if what follows ':' is all digits
        // (guards against bare IPv6 literals without brackets).
        Some((host, port)) if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => raw,
    };
    without_port
        .trim_end_matches('.')
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_host_lowercases_strips_dot_and_port() {
        assert_eq!(normalize_host("Example.COM:443"), "example.com");
        assert_eq!(normalize_host("example.com."), "example.com");
        assert_eq!(normalize_host("EXAMPLE.com"), "example.com");
    }

    #[test]
    fn normalize_host_without_port_is_unchanged() {
        assert_eq!(normalize_host("example.com"), "example.com");
    }

    #[test]
    fn build_rejects_duplicate_hosts() {
        let config = Config {
            global: Default::default(),
            hubs: vec![
                HubConfig {
                    name: "a".into(),
                    domain: "dup.example.com".into(),
                    upstream: "https://u1.example.com".into(),
                    proxy: None,
                    hub_type: crate::config::HubType::Npm,
                    username: None,
                    password: None,
                    cache_ttl_secs: None,
                    validation_mode: None,
                },
                HubConfig {
                    name: "b".into(),
                    domain: "dup.example.com".into(),
                    upstream: "https://u2.example.com".into(),
                    proxy: None,
                    hub_type: crate::config::HubType::Npm,
                    username: None,
                    password: None,
                    cache_ttl_secs: None,
                    validation_mode: None,
                },
            ],
        };
        let meta = ModuleMetadata {
            key: "npm",
            description: "npm",
            migration_state: crate::module::MigrationState::Ga,
            supported_protocols: &["http", "https"],
            cache_strategy: CacheStrategyProfile {
                ttl_hint: Duration::from_secs(1800),
                validation_mode: ValidationMode::LastModified,
                disk_layout: "flat",
                requires_metadata_file: true,
                supports_streaming_write: true,
            },
        };
        let result = HubRegistry::build(&config, |_| Some(meta.clone()));
        assert!(result.is_err());
    }

    #[test]
    fn build_fails_on_unresolved_module() {
        let config = Config {
            global: Default::default(),
            hubs: vec![HubConfig {
                name: "a".into(),
                domain: "a.example.com".into(),
                upstream: "https://u1.example.com".into(),
                proxy: None,
                hub_type: crate::config::HubType::Npm,
                username: None,
                password: None,
                cache_ttl_secs: None,
                validation_mode: None,
            }],
        };
        let result = HubRegistry::build(&config, |_| None);
        assert!(result.is_err());
    }
}
