pub mod apk;
pub mod composer;
pub mod debian;
pub mod docker;
pub mod go;
pub mod npm;
pub mod pypi;

use std::sync::Arc;

use anyhub_core::module::ModuleMetadata;
use anyhub_hooks::HookRegistry;

/// Registers every built-in ecosystem's hooks and metadata into `registry`.
/// Called once at startup before any [`anyhub_core::HubRegistry`] is built,
/// since hub routes resolve their `module_key` against this registry.
pub fn register_all(registry: &HookRegistry) -> anyhow::Result<()> {
    registry.register("docker", Arc::new(docker::DockerHooks), docker::hook_status())?;
    registry.register("npm", Arc::new(npm::NpmHooks), npm::hook_status())?;
    registry.register("go", Arc::new(go::GoHooks), go::hook_status())?;
    registry.register("pypi", Arc::new(pypi::PypiHooks), pypi::hook_status())?;
    registry.register(
        "composer",
        Arc::new(composer::ComposerHooks::new()),
        composer::hook_status(),
    )?;
    registry.register("debian", Arc::new(debian::DebianHooks), debian::hook_status())?;
    registry.register("apk", Arc::new(apk::ApkHooks), apk::hook_status())?;
    Ok(())
}

/// Module metadata for every built-in ecosystem, keyed by module key. Used
/// by [`anyhub_core::HubRegistry::build`] to resolve each hub's
/// `hub_type.module_key()` to its [`ModuleMetadata`], and by the admin
/// diagnostic endpoints to list every known module regardless of whether a
/// hub currently uses it.
pub fn metadata_for(module_key: &str) -> Option<ModuleMetadata> {
    match module_key {
        "docker" => Some(docker::metadata()),
        "npm" => Some(npm::metadata()),
        "go" => Some(go::metadata()),
        "pypi" => Some(pypi::metadata()),
        "composer" => Some(composer::metadata()),
        "debian" => Some(debian::metadata()),
        "apk" => Some(apk::metadata()),
        _ => None,
    }
}

pub fn all_metadata() -> Vec<ModuleMetadata> {
    vec![
        docker::metadata(),
        npm::metadata(),
        go::metadata(),
        pypi::metadata(),
        composer::metadata(),
        debian::metadata(),
        apk::metadata(),
    ]
}
