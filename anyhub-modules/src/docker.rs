use anyhub_core::module::{
    CacheStrategyProfile, MigrationState, ModuleMetadata, ValidationMode,
};
use anyhub_core::policy::CachePolicy;
use anyhub_hooks::{HookStatus, ModuleHooks, RequestContext};
use std::time::Duration;

pub struct DockerHooks;

const DOCKER_HUB_HOSTS: &[&str] = &["docker.io", "registry-1.docker.io", "index.docker.io"];
const MANIFEST_ACTIONS: &[&str] = &["manifests", "blobs", "tags", "referrers"];

impl ModuleHooks for DockerHooks {
    fn normalize_path(
        &self,
        ctx: &RequestContext,
        clean_path: &str,
        raw_query: Option<&[u8]>,
    ) -> (String, Option<Vec<u8>>) {
        let is_docker_hub = DOCKER_HUB_HOSTS
            .iter()
            .any(|h| ctx.upstream_host.eq_ignore_ascii_case(h));

        if is_docker_hub {
            if let Some((repo, rest)) = split_docker_repo_path(clean_path) {
                if !repo.contains('/') && repo != "library" {
                    let rewritten = format!("/v2/library/{repo}{rest}");
                    return (rewritten, raw_query.map(|q| q.to_vec()));
                }
            }
        }
        (clean_path.to_string(), raw_query.map(|q| q.to_vec()))
    }

    fn cache_policy(
        &self,
        _ctx: &RequestContext,
        locator_path: &str,
        current: CachePolicy,
    ) -> CachePolicy {
        if locator_path == "/v2" || locator_path == "/v2/" || locator_path.contains("/_catalog") {
            return CachePolicy::DENY;
        }
        if is_docker_immutable_path(locator_path) {
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
        if locator_path.ends_with("/tags/list") {
            Some("application/json".to_string())
        } else if locator_path.contains("/blobs/") {
            Some("application/octet-stream".to_string())
        } else {
            None
        }
    }
}

/// Parses `/v2/<repo...>/<action>/<ref>` stopping at the first action
/// segment, returning `(repo, "/action/ref...")`. Rejects `_catalog`.
/// Mirrors `docker/hooks.go`'s `splitDockerRepoPath`.
fn split_docker_repo_path(path: &str) -> Option<(String, String)> {
    let stripped = path.strip_prefix("/v2/")?;
    if stripped.starts_with("_catalog") {
        return None;
    }
    let segments: Vec<&str> = stripped.split('/').collect();
    let action_idx = segments
        .iter()
        .position(|s| MANIFEST_ACTIONS.contains(s))?;
    if action_idx == 0 {
        return None;
    }
    let repo = segments[..action_idx].join("/");
    let rest = format!("/{}", segments[action_idx..].join("/"));
    Some((repo, rest))
}

fn is_docker_immutable_path(path: &str) -> bool {
    path.contains("/blobs/sha256:") || path.contains("/manifests/sha256:")
}

pub fn metadata() -> ModuleMetadata {
    ModuleMetadata {
        key: "docker",
        description: "Docker/OCI container registry",
        migration_state: MigrationState::Beta,
        supported_protocols: &["http", "https"],
        cache_strategy: CacheStrategyProfile {
            ttl_hint: Duration::from_secs(12 * 3600),
            validation_mode: ValidationMode::Etag,
            disk_layout: "flat",
            requires_metadata_file: false,
            supports_streaming_write: true,
        },
    }
}

pub fn hook_status() -> HookStatus {
    HookStatus {
        normalize_path: true,
        resolve_upstream: false,
        cache_policy: true,
        content_type: true,
        rewrite_response: false,
    }
}
