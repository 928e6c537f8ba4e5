use crate::{cache::AspectInfoCache, classpath::ProjectClasspathCache, query::QueryCache};
use dashmap::DashMap;
use std::{
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

/// The caches shared by every [`BazelWorkspace`](crate::BazelWorkspace) opened on one root.
#[derive(Debug, Default)]
pub struct WorkspaceCaches {
    pub aspects: AspectInfoCache,
    pub queries: QueryCache,
    pub classpaths: ProjectClasspathCache,
}

impl WorkspaceCaches {
    pub fn new() -> Self {
        Self::default()
    }
}

fn registry() -> &'static DashMap<PathBuf, Arc<WorkspaceCaches>> {
    static REGISTRY: OnceLock<DashMap<PathBuf, Arc<WorkspaceCaches>>> = OnceLock::new();
    REGISTRY.get_or_init(DashMap::new)
}

fn registry_key(root: &Path) -> PathBuf {
    std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf())
}

/// Process-wide caches for the workspace at `root`, created on first use.
pub fn caches_for_workspace(root: &Path) -> Arc<WorkspaceCaches> {
    Arc::clone(
        registry()
            .entry(registry_key(root))
            .or_default()
            .value(),
    )
}

/// Drop the process-wide caches for `root`; workspaces still holding them keep their copy.
pub fn forget_workspace(root: &Path) -> bool {
    registry().remove(&registry_key(root)).is_some()
}
