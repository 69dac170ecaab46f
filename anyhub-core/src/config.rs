use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::module::ValidationMode;

/// Hub ("tenant") ecosystem type — selects the module whose HookSet and
/// default cache strategy apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HubType {
    Docker,
    Npm,
    Go,
    Pypi,
    Composer,
    Debian,
    Apk,
}

impl HubType {
    /// The module registry key this hub type resolves to.
    pub fn module_key(&self) -> &'static str {
        match self {
            HubType::Docker => "docker",
            HubType::Npm => "npm",
            HubType::Go => "go",
            HubType::Pypi => "pypi",
            HubType::Composer => "composer",
            HubType::Debian => "debian",
            HubType::Apk => "apk",
        }
    }
}

/// Global configuration, shared across all hubs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,

    /// Default TTL in seconds, overridable per hub.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_upstream_timeout_secs")]
    pub upstream_timeout_secs: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            storage_path: default_storage_path(),
            cache_ttl_secs: default_cache_ttl_secs(),
            upstream_timeout_secs: default_upstream_timeout_secs(),
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

/// Per-hub configuration, as loaded from TOML/env — one entry per tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    pub name: String,
    pub domain: String,
    pub upstream: String,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(rename = "type")]
    pub hub_type: HubType,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
    #[serde(default)]
    pub validation_mode: Option<ValidationMode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub hubs: Vec<HubConfig>,
}

impl Config {
    /// Load configuration from a TOML file plus `ANYHUB_`-prefixed
    /// environment overrides, mirroring the teacher's
    /// `Figment::new().merge(...).merge(Env::prefixed(...)).extract()`
    /// pattern, switched from YAML to TOML as the primary format.
    pub fn load(config_path: Option<&str>) -> anyhow::Result<Self> {
        let mut figment = Figment::new();

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        } else {
            for default_path in &["anyhub.toml", "/etc/anyhub/anyhub.toml"] {
                if std::path::Path::new(default_path).exists() {
                    figment = figment.merge(Toml::file(default_path));
                    break;
                }
            }
        }

        figment = figment.merge(Env::prefixed("ANYHUB_").split("__"));

        let config: Self = figment.extract()?;
        Ok(config)
    }
}

fn default_listen_port() -> u16 {
    8080
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("/var/lib/anyhub")
}

fn default_cache_ttl_secs() -> u64 {
    1800
}

fn default_upstream_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_defaults() {
        let cfg = GlobalConfig::default();
        assert_eq!(cfg.listen_port, 8080);
        assert_eq!(cfg.cache_ttl_secs, 1800);
        assert_eq!(cfg.upstream_timeout_secs, 30);
    }

    #[test]
    fn hub_type_resolves_module_key() {
        assert_eq!(HubType::Docker.module_key(), "docker");
        assert_eq!(HubType::Pypi.module_key(), "pypi");
        assert_eq!(HubType::Composer.module_key(), "composer");
    }

    #[test]
    fn config_deserializes_from_toml() {
        let toml = r#"
            [global]
            listen_port = 9000
            storage_path = "/data/cache"

            [[hubs]]
            name = "dockerhub"
            domain = "docker.example.com"
            upstream = "https://registry-1.docker.io"
            type = "docker"
        "#;
        let cfg: Config = figment::Figment::new()
            .merge(figment::providers::Toml::string(toml))
            .extract()
            .unwrap();
        assert_eq!(cfg.global.listen_port, 9000);
        assert_eq!(cfg.hubs.len(), 1);
        assert_eq!(cfg.hubs[0].hub_type, HubType::Docker);
        assert_eq!(cfg.hubs[0].upstream, "https://registry-1.docker.io");
    }

    #[test]
    fn hub_credentials_are_optional() {
        let toml = r#"
            [[hubs]]
            name = "pub"
            domain = "pub.example.com"
            upstream = "https://upstream.example.com"
            type = "npm"
        "#;
        let cfg: Config = figment::Figment::new()
            .merge(figment::providers::Toml::string(toml))
            .extract()
            .unwrap();
        assert!(cfg.hubs[0].username.is_none());
        assert!(cfg.hubs[0].password.is_none());
    }
}
