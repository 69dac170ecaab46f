use anyhub_core::module::{
    CacheStrategyProfile, MigrationState, ModuleMetadata, ValidationMode,
};
use anyhub_core::policy::CachePolicy;
use anyhub_hooks::{HookStatus, ModuleHooks, RequestContext};
use std::time::Duration;

pub struct ApkHooks;

impl ModuleHooks for ApkHooks {
    /// `APKINDEX.tar.gz` and its signature always revalidate; `*.apk`
    /// package bodies are immutable once published.
    fn cache_policy(
        &self,
        _ctx: &RequestContext,
        locator_path: &str,
        _current: CachePolicy,
    ) -> CachePolicy {
        let clean = canonical_path(locator_path);
        if is_apkindex_path(&clean) || is_apk_signature_path(&clean) {
            CachePolicy {
                allow_cache: true,
                allow_store: true,
                require_revalidate: true,
            }
        } else if is_apk_package_path(&clean) {
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
        if clean.ends_with(".apk") {
            Some("application/vnd.android.package-archive".to_string())
        } else if clean.ends_with(".tar.gz") {
            Some("application/gzip".to_string())
        } else if clean.ends_with(".tar.gz.asc") || clean.ends_with(".tar.gz.sig") {
            Some("application/pgp-signature".to_string())
        } else {
            None
        }
    }
}

fn is_apkindex_path(clean: &str) -> bool {
    clean.ends_with("/apkindex.tar.gz")
}

fn is_apk_signature_path(clean: &str) -> bool {
    clean.ends_with("/apkindex.tar.gz.asc") || clean.ends_with("/apkindex.tar.gz.sig")
}

fn is_apk_package_path(clean: &str) -> bool {
    if is_apkindex_path(clean) || is_apk_signature_path(clean) {
        return false;
    }
    clean.ends_with(".apk")
}

/// Lowercases and collapses `.`/`..` so repo-prefixed paths (`/v3.18/main/...`)
/// compare consistently regardless of casing or redundant slashes.
fn canonical_path(p: &str) -> String {
    let trimmed = p.trim();
    if trimmed.is_empty() {
        return "/".to_string();
    }
    anyhub_core::locator::clean_path(&format!("/{trimmed}")).to_ascii_lowercase()
}

pub fn metadata() -> ModuleMetadata {
    ModuleMetadata {
        key: "apk",
        description: "Alpine APK proxy with cached indexes and packages",
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
