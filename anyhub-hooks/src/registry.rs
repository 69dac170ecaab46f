use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;

use crate::hooks::{HookStatus, ModuleHooks};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("duplicate hook registration for key {0:?}")]
    Duplicate(String),
}

struct Registration {
    hooks: Arc<dyn ModuleHooks>,
    status: HookStatus,
}

/// `module_key → HookSet` registry (spec §4.B). Registration is idempotent
/// per key and fails on duplicate; lookup is case-insensitive. Built once
/// at startup and handed around as a shared `Arc`, per §9's preference for
/// a dependency-injected server-context handle over a pervasive global.
#[derive(Default)]
pub struct HookRegistry {
    entries: DashMap<String, Registration>,
}

fn normalize_key(key: &str) -> String {
    key.trim().to_ascii_lowercase()
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        key: &str,
        hooks: Arc<dyn ModuleHooks>,
        status: HookStatus,
    ) -> Result<(), RegistryError> {
        let norm = normalize_key(key);
        if self.entries.contains_key(&norm) {
            return Err(RegistryError::Duplicate(norm));
        }
        tracing::info!(module_key = %norm, "registered module hooks");
        self.entries.insert(norm, Registration { hooks, status });
        Ok(())
    }

    pub fn fetch(&self, key: &str) -> Option<Arc<dyn ModuleHooks>> {
        self.entries
            .get(&normalize_key(key))
            .map(|r| r.hooks.clone())
    }

    pub fn status(&self, key: &str) -> Option<HookStatus> {
        self.entries.get(&normalize_key(key)).map(|r| r.status)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
