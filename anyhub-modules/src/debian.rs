use anyhub_core::module::{
    CacheStrategyProfile, MigrationState, ModuleMetadata, ValidationMode,
};
use anyhub_core::policy::CachePolicy;
use anyhub_hooks::{HookStatus, ModuleHooks, RequestContext};
use std::time::Duration;

pub struct DebianHooks;

impl ModuleHooks for DebianHooks {
    /// Indexes (`Release`/`InRelease`/`Packages*`) require revalidation on
    /// every hit; package bodies under `pool/` and `by-hash/` paths are
    /// immutable once published.
    fn cache_policy(
        &self,
        _ctx: &RequestContext,
        locator_path: &str,
        _current: CachePolicy,
    ) -> CachePolicy {
        let clean = canonical_path(locator_path);
        if is_apt_index_path(&clean) {
            CachePolicy {
                allow_cache: true,
                allow_store: true,
                require_revalidate: true,
            }
        } else if is_apt_immutable_path(&clean) {
            CachePolicy {
                allow_cache: true,
                allow_store: true,
                require_revalidate: false,
            }
        } else {
            CachePolicy::DENY
        }
    }

    fn content_type(&self, _ctx: &RequestContext, locator_path: &str) -> Option<String> {
        let clean = canonical_path(locator_path);
        if clean.ends_with(".gz") {
            Some("application/gzip".to_string())
        } else if clean.ends_with(".xz") {
            Some("application/x-xz".to_string())
        } else if clean.ends_with("release.gpg") {
            Some("application/pgp-signature".to_string())
        } else if is_apt_index_path(&clean) {
            Some("text/plain".to_string())
        } else {
            None
        }
    }
}

/// True when `segment` occurs as a whole path segment of `clean` (not just
/// as a substring), so a mirror prefix like `/debian-security/dists/...`
/// still matches `dists` without a bare-prefix false positive like
/// `/mydiststhing/...`.
fn has_segment(clean: &str, segment: &str) -> bool {
    clean.split('/').any(|s| s == segment)
}

fn is_by_hash_path(clean: &str) -> bool {
    has_segment(clean, "dists") && has_segment(clean, "by-hash")
}

fn is_apt_index_path(clean: &str) -> bool {
    if is_by_hash_path(clean) {
        return false;
    }
    if !has_segment(clean, "dists") {
        return false;
    }
    clean.ends_with("/release")
        || clean.ends_with("/inrelease")
        || clean.ends_with("/release.gpg")
        || clean.contains("/packages")
}

fn is_apt_immutable_path(clean: &str) -> bool {
    is_by_hash_path(clean) || has_segment(clean, "pool")
}

/// Lowercases and collapses `.`/`..` so mirror-prefixed paths like
/// `/debian-security/dists/...` and `/debian/pool/...` compare consistently
/// regardless of casing or redundant slashes.
fn canonical_path(p: &str) -> String {
    let trimmed = p.trim();
    if trimmed.is_empty() {
        return "/".to_string();
    }
    anyhub_core::locator::clean_path(&format!("/{trimmed}")).to_ascii_lowercase()
}

pub fn metadata() -> ModuleMetadata {
    ModuleMetadata {
        key: "debian",
        description: "APT proxy with cached indexes and packages",
        migration_state: MigrationState::Beta,
        supported_protocols: &["http", "https"],
        cache_strategy: CacheStrategyProfile {
            ttl_hint: Duration::from_secs(0),
            validation_mode: ValidationMode::LastModified,
            disk_layout: "raw_path",
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
            tenant_type: "debian".into(),
            module_key: "debian".into(),
            upstream_host: "deb.debian.org".into(),
            request_method: "GET".into(),
        }
    }

    #[test]
    fn cache_policy_revalidates_release_and_packages_indexes() {
        let hooks = DebianHooks;
        let c = ctx();
        for path in [
            "/dists/bookworm/Release",
            "/dists/bookworm/InRelease",
            "/dists/bookworm/main/binary-amd64/Packages.gz",
        ] {
            let policy = hooks.cache_policy(&c, path, CachePolicy::REVALIDATE);
            assert!(policy.require_revalidate, "{path} should revalidate");
        }
    }

    #[test]
    fn cache_policy_immutable_for_pool_and_by_hash() {
        let hooks = DebianHooks;
        let c = ctx();
        let pool = hooks.cache_policy(
            &c,
            "/pool/main/a/apt/apt_2.6.1_amd64.deb",
            CachePolicy::REVALIDATE,
        );
        assert!(!pool.require_revalidate);

        let by_hash = hooks.cache_policy(
            &c,
            "/dists/bookworm/main/binary-amd64/by-hash/SHA256/abcd",
            CachePolicy::REVALIDATE,
        );
        assert!(!by_hash.require_revalidate);
    }

    #[test]
    fn cache_policy_handles_mirror_prefixed_paths() {
        let hooks = DebianHooks;
        let c = ctx();
        let policy = hooks.cache_policy(
            &c,
            "/debian-security/dists/bookworm-security/Release",
            CachePolicy::REVALIDATE,
        );
        assert!(policy.allow_cache);
        assert!(policy.require_revalidate);
    }

    #[test]
    fn canonical_path_is_case_insensitive() {
        assert_eq!(
            canonical_path("/Dists/Bookworm/InRelease"),
            "/dists/bookworm/inrelease"
        );
    }

    #[test]
    fn content_type_matches_suffix() {
        let hooks = DebianHooks;
        let c = ctx();
        assert_eq!(
            hooks.content_type(&c, "/dists/bookworm/Release.gpg").as_deref(),
            Some("application/pgp-signature")
        );
        assert_eq!(
            hooks
                .content_type(&c, "/pool/main/a/apt/apt_2.6.1_amd64.deb")
                .as_deref(),
            None
        );
    }
}
