use crate::{error::Result, label::TargetLabel};
use dashmap::DashMap;
use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// Rule targets declared in one package, as reported by `bazel query --output label_kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildFileModel {
    pub package: TargetLabel,
    /// Target label to rule kind, in query output order.
    pub targets: IndexMap<TargetLabel, String>,
}

impl BuildFileModel {
    pub fn empty(package: TargetLabel) -> Self {
        Self {
            package,
            targets: IndexMap::new(),
        }
    }

    pub fn is_buildable(&self) -> bool {
        !self.targets.is_empty()
    }

    pub fn kind_of(&self, label: &TargetLabel) -> Option<&str> {
        self.targets.get(label).map(String::as_str)
    }

    pub fn labels(&self) -> impl Iterator<Item = &TargetLabel> {
        self.targets.keys()
    }

    pub fn test_targets(&self) -> impl Iterator<Item = &TargetLabel> {
        self.targets
            .iter()
            .filter(|(_, kind)| kind.ends_with("_test"))
            .map(|(label, _)| label)
    }
}

/// The `bazel query` expression listing the rules of `package`.
pub fn package_rules_expression(package: &TargetLabel) -> String {
    format!("kind(rule, {})", package.package_wildcard())
}

/// Parse `<rule_kind> rule <label>` lines; anything else is skipped.
pub fn parse_label_kind_output(package: &TargetLabel, output: &str) -> BuildFileModel {
    let mut model = BuildFileModel::empty(package.clone());
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace();
        let parsed = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(kind), Some("rule"), Some(label), None) => {
                TargetLabel::parse(label).ok().map(|label| (label, kind))
            }
            _ => None,
        };
        match parsed {
            Some((label, kind)) => {
                model.targets.insert(label, kind.to_string());
            }
            None => {
                tracing::debug!(target: "bef.bazel", line, "ignoring query output line");
            }
        }
    }
    model
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Memoized package listings, computed at most once per package until flushed.
#[derive(Debug, Default)]
pub struct QueryCache {
    entries: DashMap<TargetLabel, Arc<OnceCell<Arc<BuildFileModel>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached model for `package`, running `query` on a miss.
    ///
    /// Concurrent callers for the same package share one computation. A failed query is not
    /// cached. The workspace root package (`//`) is never queried.
    pub fn get_or_query<F>(&self, package: &TargetLabel, query: F) -> Result<Arc<BuildFileModel>>
    where
        F: FnOnce(&TargetLabel) -> Result<BuildFileModel>,
    {
        let package = package.package_label();
        if package.is_root_package() {
            return Ok(Arc::new(BuildFileModel::empty(package)));
        }

        // Clone the cell out so the map shard is not locked while Bazel runs.
        let cell = Arc::clone(self.entries.entry(package.clone()).or_default().value());
        if let Some(model) = cell.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(model));
        }

        let model = cell.get_or_try_init(|| {
            self.misses.fetch_add(1, Ordering::Relaxed);
            query(&package).map(Arc::new)
        });
        match model {
            Ok(model) => Ok(Arc::clone(model)),
            Err(err) => {
                self.entries
                    .remove_if(&package, |_, existing| Arc::ptr_eq(existing, &cell));
                Err(err)
            }
        }
    }

    pub fn get(&self, package: &TargetLabel) -> Option<Arc<BuildFileModel>> {
        self.entries
            .get(&package.package_label())
            .and_then(|cell| cell.get().cloned())
    }

    pub fn flush(&self, package: &TargetLabel) {
        self.entries.remove(&package.package_label());
    }

    pub fn flush_all(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> QueryCacheStats {
        QueryCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }
}
