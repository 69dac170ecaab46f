use serde::Serialize;
use std::time::Duration;

/// How far along a module is in its rollout — diagnostic metadata only,
/// does not affect request handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationState {
    Legacy,
    Beta,
    Ga,
}

/// How a stored entry is revalidated against the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationMode {
    Etag,
    LastModified,
    Never,
}

/// Module default cache behavior, hub-overridable via `CacheStrategyOptions`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheStrategyProfile {
    #[serde(with = "duration_secs")]
    pub ttl_hint: Duration,
    pub validation_mode: ValidationMode,
    pub disk_layout: &'static str,
    pub requires_metadata_file: bool,
    pub supports_streaming_write: bool,
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
}

/// Hub-level overrides resolved against a module's default strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrategyOverrides {
    pub ttl: Option<Duration>,
    pub validation_mode: Option<ValidationMode>,
}

impl CacheStrategyProfile {
    /// Merge hub overrides onto this module default. Only a `Some` override
    /// replaces the corresponding field — mirrors
    /// `internal/hubmodule/strategy.go`'s `ResolveStrategy`.
    pub fn resolve(&self, overrides: StrategyOverrides) -> CacheStrategyProfile {
        CacheStrategyProfile {
            ttl_hint: overrides.ttl.unwrap_or(self.ttl_hint),
            validation_mode: overrides.validation_mode.unwrap_or(self.validation_mode),
            ..*self
        }
    }
}

/// Static description of one ecosystem module, registered once at startup.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleMetadata {
    pub key: &'static str,
    pub description: &'static str,
    pub migration_state: MigrationState,
    pub supported_protocols: &'static [&'static str],
    pub cache_strategy: CacheStrategyProfile,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_only_overrides_present_fields() {
        let base = CacheStrategyProfile {
            ttl_hint: Duration::from_secs(3600),
            validation_mode: ValidationMode::Etag,
            disk_layout: "flat",
            requires_metadata_file: false,
            supports_streaming_write: true,
        };
        let merged = base.resolve(StrategyOverrides {
            ttl: Some(Duration::from_secs(60)),
            validation_mode: None,
        });
        assert_eq!(merged.ttl_hint, Duration::from_secs(60));
        assert_eq!(merged.validation_mode, ValidationMode::Etag);
    }

    #[test]
    fn resolve_with_no_overrides_is_identity() {
        let base = CacheStrategyProfile {
            ttl_hint: Duration::from_secs(1800),
            validation_mode: ValidationMode::LastModified,
            disk_layout: "flat",
            requires_metadata_file: false,
            supports_streaming_write: true,
        };
        let merged = base.resolve(StrategyOverrides::default());
        assert_eq!(merged.ttl_hint, base.ttl_hint);
        assert_eq!(merged.validation_mode, base.validation_mode);
    }
}
