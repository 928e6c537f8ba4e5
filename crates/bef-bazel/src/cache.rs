use crate::{
    aspect::AspectTargetInfo,
    label::{PackageLocation, TargetLabel},
};
use dashmap::{mapref::entry::Entry, DashMap, DashSet};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// Snapshot of the cache counters and tier sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AspectCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub fallbacks: u64,
    pub current: usize,
    pub wildcard: usize,
    pub last_known_good: usize,
}

fn wildcard_covers(wildcard: &TargetLabel, package: &PackageLocation) -> bool {
    if !wildcard.is_recursive_wildcard() {
        return wildcard.same_package(&package.label());
    }
    if wildcard.is_external() {
        return false;
    }
    // `//...` has package path `...`, `//a/b/...` has `a/b/...`.
    match wildcard.package_path().strip_suffix("...") {
        Some("") => true,
        Some(prefix) => {
            let base = prefix.trim_end_matches('/');
            package.path() == base || package.path().starts_with(prefix)
        }
        None => false,
    }
}

/// Parsed aspect records keyed by target label, in three tiers:
///
/// - *current*: records from the most recent successful resolution.
/// - *wildcard*: package wildcard (`//pkg:*`) to the labels it expanded to.
/// - *last-known-good*: every record ever written to *current*, kept across
///   [`flush_current`](Self::flush_current) so a broken build can still be served.
///
/// Labels a successful aspect build covered without emitting a record are remembered next to
/// *current* and cleared with it.
///
/// All operations are per-key; there is no cache-wide lock.
#[derive(Debug, Default)]
pub struct AspectInfoCache {
    current: DashMap<TargetLabel, Arc<AspectTargetInfo>>,
    wildcard: DashMap<TargetLabel, Arc<Vec<TargetLabel>>>,
    last_known_good: DashMap<TargetLabel, Arc<AspectTargetInfo>>,
    undescribed: DashSet<TargetLabel>,
    hits: AtomicU64,
    misses: AtomicU64,
    fallbacks: AtomicU64,
}

impl AspectInfoCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up *current*, counting a hit or a miss.
    pub fn get(&self, label: &TargetLabel) -> Option<Arc<AspectTargetInfo>> {
        let found = self.peek(label);
        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Look up *current* without touching the counters.
    pub fn peek(&self, label: &TargetLabel) -> Option<Arc<AspectTargetInfo>> {
        self.current.get(label).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, label: &TargetLabel) -> bool {
        self.current.contains_key(label)
    }

    /// Insert into *current* unless another writer got there first, and return the value that
    /// ended up in the cache. The winner is mirrored into *last-known-good*.
    pub fn put(&self, label: TargetLabel, info: Arc<AspectTargetInfo>) -> Arc<AspectTargetInfo> {
        let winner = match self.current.entry(label.clone()) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => Arc::clone(entry.insert(info).value()),
        };
        self.last_known_good.insert(label, Arc::clone(&winner));
        winner
    }

    /// Serve a label from *last-known-good*, counting a fallback when one is found.
    pub fn fallback(&self, label: &TargetLabel) -> Option<Arc<AspectTargetInfo>> {
        let found = self
            .last_known_good
            .get(label)
            .map(|entry| Arc::clone(entry.value()));
        if found.is_some() {
            self.fallbacks.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(target: "bef.bazel", label = %label, "serving last-known-good aspect record");
        }
        found
    }

    pub fn last_known_good(&self, label: &TargetLabel) -> Option<Arc<AspectTargetInfo>> {
        self.last_known_good
            .get(label)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Remember that a successful aspect build emitted no record for `label`.
    pub fn mark_undescribed(&self, label: TargetLabel) {
        self.undescribed.insert(label);
    }

    pub fn is_undescribed(&self, label: &TargetLabel) -> bool {
        self.undescribed.contains(label)
    }

    /// Labels a package wildcard expanded to during the current resolution.
    pub fn wildcard_members(&self, wildcard: &TargetLabel) -> Option<Arc<Vec<TargetLabel>>> {
        self.wildcard
            .get(wildcard)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Record a wildcard expansion; an earlier concurrent expansion wins.
    pub fn put_wildcard(
        &self,
        wildcard: TargetLabel,
        members: Vec<TargetLabel>,
    ) -> Arc<Vec<TargetLabel>> {
        Arc::clone(
            self.wildcard
                .entry(wildcard)
                .or_insert_with(|| Arc::new(members))
                .value(),
        )
    }

    /// Clear *current* and *wildcard*. *Last-known-good* is untouched.
    pub fn flush_current(&self) {
        self.current.clear();
        self.wildcard.clear();
        self.undescribed.clear();
        tracing::debug!(
            target: "bef.bazel",
            last_known_good = self.last_known_good.len(),
            "flushed current aspect records"
        );
    }

    /// Clear the current records of one package and every wildcard expansion covering it,
    /// recursive ones (`//a/...`) included.
    pub fn flush_package(&self, package: &PackageLocation) {
        let package_label = package.label();
        self.current
            .retain(|label, _| !label.same_package(&package_label));
        self.undescribed
            .retain(|label| !label.same_package(&package_label));
        self.wildcard
            .retain(|wildcard, _| !wildcard_covers(wildcard, package));
    }

    /// Clear every tier, including *last-known-good*.
    pub fn flush_all(&self) {
        self.current.clear();
        self.wildcard.clear();
        self.undescribed.clear();
        self.last_known_good.clear();
    }

    pub fn current_len(&self) -> usize {
        self.current.len()
    }

    pub fn last_known_good_len(&self) -> usize {
        self.last_known_good.len()
    }

    pub fn stats(&self) -> AspectCacheStats {
        AspectCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            current: self.current.len(),
            wildcard: self.wildcard.len(),
            last_known_good: self.last_known_good.len(),
        }
    }
}
