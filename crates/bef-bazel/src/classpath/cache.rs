use super::ClasspathResult;
use crate::error::Result;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::SystemTime,
};

#[derive(Debug, Clone)]
pub struct CachedClasspath {
    pub result: Arc<ClasspathResult>,
    pub computed_at: SystemTime,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectClasspathStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Resolved classpaths keyed by project name.
///
/// Entries are only dropped by [`invalidate`](Self::invalidate) or
/// [`invalidate_all`](Self::invalidate_all), never by age. Degraded results are returned but not
/// kept, so the next request tries Bazel again.
#[derive(Debug, Default)]
pub struct ProjectClasspathCache {
    entries: DashMap<String, Arc<OnceCell<CachedClasspath>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ProjectClasspathCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compute<F>(&self, project: &str, compute: F) -> Result<CachedClasspath>
    where
        F: FnOnce() -> Result<ClasspathResult>,
    {
        let cell = Arc::clone(
            self.entries
                .entry(project.to_string())
                .or_default()
                .value(),
        );
        if let Some(cached) = cell.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(cached.clone());
        }

        let computed = cell.get_or_try_init(|| {
            self.misses.fetch_add(1, Ordering::Relaxed);
            compute().map(|result| CachedClasspath {
                result: Arc::new(result),
                computed_at: SystemTime::now(),
            })
        });
        match computed {
            Ok(cached) => {
                let cached = cached.clone();
                if cached.result.degraded {
                    self.entries
                        .remove_if(project, |_, existing| Arc::ptr_eq(existing, &cell));
                }
                Ok(cached)
            }
            Err(err) => {
                self.entries
                    .remove_if(project, |_, existing| Arc::ptr_eq(existing, &cell));
                Err(err)
            }
        }
    }

    pub fn get(&self, project: &str) -> Option<CachedClasspath> {
        self.entries
            .get(project)
            .and_then(|cell| cell.get().cloned())
    }

    pub fn invalidate(&self, project: &str) {
        self.entries.remove(project);
    }

    pub fn invalidate_all(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> ProjectClasspathStats {
        ProjectClasspathStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }
}
