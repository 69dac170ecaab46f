use anyhub_core::module::{
    CacheStrategyProfile, MigrationState, ModuleMetadata, ValidationMode,
};
use anyhub_core::policy::CachePolicy;
use anyhub_hooks::{HookStatus, ModuleHooks, RequestContext};
use std::time::Duration;

pub struct NpmHooks;

impl ModuleHooks for NpmHooks {
    /// Folds metadata paths to `.../package.json` so tarballs served under
    /// `/-/` coexist as real files in a directory named after the package
    /// (spec §4.C). Paths already carrying the `/__qs/` query-fold suffix,
    /// or containing `/-/` (tarball/attachment paths), are left untouched.
    fn normalize_path(
        &self,
        _ctx: &RequestContext,
        clean_path: &str,
        raw_query: Option<&[u8]>,
    ) -> (String, Option<Vec<u8>>) {
        if clean_path.contains("/__qs/") || clean_path.contains("/-/") {
            return (clean_path.to_string(), raw_query.map(|q| q.to_vec()));
        }
        let trimmed = clean_path.trim_end_matches('/');
        let rewritten = if trimmed.is_empty() {
            "/package.json".to_string()
        } else {
            format!("{trimmed}/package.json")
        };
        (rewritten, raw_query.map(|q| q.to_vec()))
    }

    fn cache_policy(
        &self,
        _ctx: &RequestContext,
        locator_path: &str,
        current: CachePolicy,
    ) -> CachePolicy {
        let immutable = locator_path.contains("/-/") && locator_path.ends_with(".tgz");
        CachePolicy {
            require_revalidate: !immutable,
            ..current
        }
    }
}

pub fn metadata() -> ModuleMetadata {
    ModuleMetadata {
        key: "npm",
        description: "npm JavaScript package registry",
        migration_state: MigrationState::Ga,
        supported_protocols: &["http", "https"],
        cache_strategy: CacheStrategyProfile {
            ttl_hint: Duration::from_secs(30 * 60),
            validation_mode: ValidationMode::LastModified,
            disk_layout: "flat",
            requires_metadata_file: true,
            supports_streaming_write: true,
        },
    }
}

pub fn hook_status() -> HookStatus {
    HookStatus {
        normalize_path: true,
        resolve_upstream: false,
        cache_policy: true,
        content_type: false,
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
            tenant_type: "npm".into(),
            module_key: "npm".into(),
            upstream_host: "registry.npmjs.org".into(),
            request_method: "GET".into(),
        }
    }

    #[test]
    fn normalize_folds_bare_package_name_to_package_json() {
        let hooks = NpmHooks;
        let (path, _) = hooks.normalize_path(&ctx(), "/left-pad", None);
        assert_eq!(path, "/left-pad/package.json");
    }

    #[test]
    fn normalize_leaves_tarball_paths_alone() {
        let hooks = NpmHooks;
        let (path, _) = hooks.normalize_path(&ctx(), "/left-pad/-/left-pad-1.0.0.tgz", None);
        assert_eq!(path, "/left-pad/-/left-pad-1.0.0.tgz");
    }

    #[test]
    fn normalize_leaves_query_folded_paths_alone() {
        let hooks = NpmHooks;
        let (path, _) = hooks.normalize_path(&ctx(), "/left-pad/__qs/abc123", None);
        assert_eq!(path, "/left-pad/__qs/abc123");
    }

    #[test]
    fn normalize_root_folds_to_bare_package_json() {
        let hooks = NpmHooks;
        let (path, _) = hooks.normalize_path(&ctx(), "/", None);
        assert_eq!(path, "/package.json");
    }

    #[test]
    fn cache_policy_immutable_only_for_tgz_under_dash() {
        let hooks = NpmHooks;
        let c = ctx();
        let tgz = hooks.cache_policy(
            &c,
            "/left-pad/-/left-pad-1.0.0.tgz",
            CachePolicy::REVALIDATE,
        );
        assert!(!tgz.require_revalidate);

        let meta = hooks.cache_policy(&c, "/left-pad/package.json", CachePolicy::REVALIDATE);
        assert!(meta.require_revalidate);
    }
}
