use anyhub_core::module::{
    CacheStrategyProfile, MigrationState, ModuleMetadata, ValidationMode,
};
use anyhub_core::policy::CachePolicy;
use anyhub_hooks::{HookStatus, ModuleHooks, RequestContext};
use std::time::Duration;

pub struct GoHooks;

impl ModuleHooks for GoHooks {
    /// `@v/list` and `@latest` are mutable and always revalidated; a
    /// specific `@v/<version>.{info,mod,zip}` is content-addressed and
    /// never changes once published.
    fn cache_policy(
        &self,
        _ctx: &RequestContext,
        locator_path: &str,
        current: CachePolicy,
    ) -> CachePolicy {
        if locator_path.ends_with("/@v/list") || locator_path.ends_with("/@latest") {
            return CachePolicy {
                require_revalidate: true,
                ..current
            };
        }
        if is_go_versioned_path(locator_path) {
            return CachePolicy {
                require_revalidate: false,
                ..current
            };
        }
        CachePolicy {
            require_revalidate: true,
            ..current
        }
    }

    fn content_type(&self, _ctx: &RequestContext, locator_path: &str) -> Option<String> {
        if locator_path.ends_with(".info") {
            Some("application/json".to_string())
        } else if locator_path.ends_with(".mod") {
            Some("text/plain; charset=utf-8".to_string())
        } else if locator_path.ends_with(".zip") {
            Some("application/zip".to_string())
        } else {
            None
        }
    }
}

fn is_go_versioned_path(path: &str) -> bool {
    let Some((_, tail)) = path.split_once("/@v/") else {
        return false;
    };
    tail.ends_with(".info") || tail.ends_with(".mod") || tail.ends_with(".zip")
}

pub fn metadata() -> ModuleMetadata {
    ModuleMetadata {
        key: "go",
        description: "Go module proxy protocol",
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
        normalize_path: false,
        resolve_upstream: false,
        cache_policy: true,
        content_type: true,
        rewrite_response: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RequestContext {
        RequestContext {
            tenant_name: "t".into(),
            tenant_domain: "t.example.com".into(),
            tenant_type: "go".into(),
            module_key: "go".into(),
            upstream_host: "proxy.golang.org".into(),
            request_method: "GET".into(),
        }
    }

    #[test]
    fn cache_policy_revalidates_list_and_latest() {
        let hooks = GoHooks;
        let c = ctx();
        assert!(
            hooks
                .cache_policy(&c, "/github.com/foo/bar/@v/list", CachePolicy::REVALIDATE)
                .require_revalidate
        );
        assert!(
            hooks
                .cache_policy(&c, "/github.com/foo/bar/@latest", CachePolicy::REVALIDATE)
                .require_revalidate
        );
    }

    #[test]
    fn cache_policy_immutable_for_versioned_artifacts() {
        let hooks = GoHooks;
        let c = ctx();
        for suffix in ["info", "mod", "zip"] {
            let path = format!("/github.com/foo/bar/@v/v1.2.3.{suffix}");
            let policy = hooks.cache_policy(&c, &path, CachePolicy::REVALIDATE);
            assert!(!policy.require_revalidate, "suffix {suffix} should be immutable");
        }
    }

    #[test]
    fn content_type_matches_versioned_suffix() {
        let hooks = GoHooks;
        let c = ctx();
        assert_eq!(
            hooks
                .content_type(&c, "/github.com/foo/bar/@v/v1.2.3.info")
                .as_deref(),
            Some("application/json")
        );
        assert_eq!(
            hooks
                .content_type(&c, "/github.com/foo/bar/@v/v1.2.3.zip")
                .as_deref(),
            Some("application/zip")
        );
        assert_eq!(
            hooks.content_type(&c, "/github.com/foo/bar/@v/list").as_deref(),
            None
        );
    }
}
