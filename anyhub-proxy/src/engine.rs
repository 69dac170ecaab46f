//! Cache Policy Engine (§4.E) — the baseline rule a module's `cache_policy`
//! hook then refines.

use anyhub_core::module::{CacheStrategyProfile, ValidationMode};
use anyhub_core::policy::CachePolicy;
use std::time::{Duration, SystemTime};

/// Baseline cache policy before any module-specific refinement:
///
/// - non-`GET` requests never cache.
/// - `GET` under `ValidationMode::Never` with a positive TTL hint caches
///   without ever revalidating.
/// - every other `GET` caches and revalidates.
pub fn compute_baseline(method: &str, strategy: &CacheStrategyProfile) -> CachePolicy {
    if !method.eq_ignore_ascii_case("GET") {
        return CachePolicy::DENY;
    }
    if strategy.validation_mode == ValidationMode::Never && strategy.ttl_hint > Duration::ZERO {
        return CachePolicy::TTL_ONLY;
    }
    CachePolicy::REVALIDATE
}

/// Whether a cached entry is still fresh under `ttl`, given its stored
/// modification time and the current instant.
pub fn is_fresh(modification_time: SystemTime, ttl: Duration, now: SystemTime) -> bool {
    match now.duration_since(modification_time) {
        Ok(age) => age < ttl,
        Err(_) => true, // mtime is in the future (clock skew) — treat as fresh
    }
}

/// Compare an upstream `Last-Modified` against a stored entry's mtime with a
/// one-second tolerance, per spec §4.F ("not materially newer").
pub fn upstream_not_newer(
    stored_mtime: SystemTime,
    upstream_last_modified: SystemTime,
) -> bool {
    match upstream_last_modified.duration_since(stored_mtime) {
        Ok(delta) => delta <= Duration::from_secs(1),
        Err(_) => true, // upstream mtime is older or equal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy(validation_mode: ValidationMode, ttl_secs: u64) -> CacheStrategyProfile {
        CacheStrategyProfile {
            ttl_hint: Duration::from_secs(ttl_secs),
            validation_mode,
            disk_layout: "flat",
            requires_metadata_file: false,
            supports_streaming_write: true,
        }
    }

    #[test]
    fn non_get_always_denies() {
        let s = strategy(ValidationMode::Never, 3600);
        assert_eq!(compute_baseline("POST", &s), CachePolicy::DENY);
        assert_eq!(compute_baseline("PUT", &s), CachePolicy::DENY);
    }

    #[test]
    fn get_with_never_and_positive_ttl_is_ttl_only() {
        let s = strategy(ValidationMode::Never, 3600);
        assert_eq!(compute_baseline("GET", &s), CachePolicy::TTL_ONLY);
    }

    #[test]
    fn get_with_never_and_zero_ttl_revalidates() {
        let s = strategy(ValidationMode::Never, 0);
        assert_eq!(compute_baseline("GET", &s), CachePolicy::REVALIDATE);
    }

    #[test]
    fn get_with_etag_or_last_modified_revalidates() {
        assert_eq!(
            compute_baseline("GET", &strategy(ValidationMode::Etag, 3600)),
            CachePolicy::REVALIDATE
        );
        assert_eq!(
            compute_baseline("GET", &strategy(ValidationMode::LastModified, 3600)),
            CachePolicy::REVALIDATE
        );
    }

    #[test]
    fn freshness_respects_ttl_boundary() {
        let now = SystemTime::now();
        let mtime = now - Duration::from_secs(10);
        assert!(is_fresh(mtime, Duration::from_secs(60), now));
        assert!(!is_fresh(mtime, Duration::from_secs(5), now));
    }

    #[test]
    fn upstream_within_one_second_is_not_newer() {
        let stored = SystemTime::now();
        let upstream = stored + Duration::from_millis(900);
        assert!(upstream_not_newer(stored, upstream));
        let clearly_newer = stored + Duration::from_secs(5);
        assert!(!upstream_not_newer(stored, clearly_newer));
    }
}
