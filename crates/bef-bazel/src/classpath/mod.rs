//! Classpath resolution for a set of activated targets.
//!
//! Each target is handed to a [`ClasspathStrategyChain`]; strategies run in order and fill a
//! shared [`ClasspathResult`] until one of them marks the target complete.

mod aspect_strategy;
mod cache;
mod implicit;
mod strategy;

pub use aspect_strategy::AspectClasspathStrategy;
pub use cache::{CachedClasspath, ProjectClasspathCache, ProjectClasspathStats};
pub use implicit::ImplicitDependencyStrategy;
pub use strategy::{ClasspathContext, ClasspathStrategy, ClasspathStrategyChain};

use crate::{
    label::{PackageLocation, TargetLabel},
    problems::BazelProblem,
};
use serde::Serialize;
use std::{collections::HashMap, path::PathBuf};

/// A resolved classpath element. With neither flag set the entry is a main (compile) entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ClasspathEntry {
    pub binary: PathBuf,
    pub source: Option<PathBuf>,
    pub test: bool,
    pub runtime: bool,
}

impl ClasspathEntry {
    pub fn main(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            source: None,
            test: false,
            runtime: false,
        }
    }

    pub fn with_source(mut self, source: Option<PathBuf>) -> Self {
        self.source = source;
        self
    }

    pub fn with_test(mut self, test: bool) -> Self {
        self.test = test;
        self
    }

    pub fn with_runtime(mut self, runtime: bool) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn is_main(&self) -> bool {
        !self.test && !self.runtime
    }

    fn merge(&mut self, other: ClasspathEntry) {
        // A flag survives only if every contributor set it.
        self.test &= other.test;
        self.runtime &= other.runtime;
        if self.source.is_none() {
            self.source = other.source;
        }
    }
}

/// The classpath of a project: ordered, unique by binary path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClasspathResult {
    pub entries: Vec<ClasspathEntry>,
    /// Every target was completed by some strategy.
    pub complete: bool,
    /// Some aspect records were served from the last-known-good tier.
    pub degraded: bool,
    pub unresolved: Vec<TargetLabel>,
    pub problems: Vec<BazelProblem>,
    #[serde(skip)]
    index: HashMap<PathBuf, usize>,
}

impl ClasspathResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `entry`, or merge it into the entry already holding the same binary.
    pub fn add_entry(&mut self, entry: ClasspathEntry) {
        match self.index.get(&entry.binary) {
            Some(&idx) => self.entries[idx].merge(entry),
            None => {
                self.index.insert(entry.binary.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    pub fn contains(&self, binary: &std::path::Path) -> bool {
        self.index.contains_key(binary)
    }

    pub fn main_entries(&self) -> impl Iterator<Item = &ClasspathEntry> {
        self.entries.iter().filter(|entry| entry.is_main())
    }

    pub fn test_entries(&self) -> impl Iterator<Item = &ClasspathEntry> {
        self.entries.iter().filter(|entry| entry.test)
    }

    pub fn runtime_entries(&self) -> impl Iterator<Item = &ClasspathEntry> {
        self.entries.iter().filter(|entry| entry.runtime)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-target view over the shared result that strategies write into.
#[derive(Debug)]
pub struct TargetClasspath<'r> {
    target: TargetLabel,
    result: &'r mut ClasspathResult,
    complete: bool,
    added: usize,
}

impl<'r> TargetClasspath<'r> {
    pub fn new(target: TargetLabel, result: &'r mut ClasspathResult) -> Self {
        Self {
            target,
            result,
            complete: false,
            added: 0,
        }
    }

    pub fn target(&self) -> &TargetLabel {
        &self.target
    }

    pub fn add_entry(&mut self, entry: ClasspathEntry) {
        self.added += 1;
        self.result.add_entry(entry);
    }

    pub fn add_problem(&mut self, message: impl Into<String>) {
        self.result
            .problems
            .push(BazelProblem::for_target(self.target.clone(), message));
    }

    pub fn mark_complete(&mut self) {
        self.complete = true;
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Entries contributed for this target so far, before de-duplication.
    pub fn added(&self) -> usize {
        self.added
    }
}

/// An IDE project: its source packages and the targets it activates (wildcards allowed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClasspathProject {
    pub name: String,
    pub packages: Vec<PackageLocation>,
    pub targets: Vec<TargetLabel>,
}

impl ClasspathProject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            packages: Vec::new(),
            targets: Vec::new(),
        }
    }

    /// A project for one package that activates every target in it.
    pub fn for_package(package: PackageLocation) -> Self {
        let wildcard = package.label().package_wildcard();
        Self {
            name: package.label().to_string(),
            packages: vec![package],
            targets: vec![wildcard],
        }
    }

    pub fn with_package(mut self, package: PackageLocation) -> Self {
        self.packages.push(package);
        self
    }

    pub fn with_target(mut self, target: TargetLabel) -> Self {
        self.targets.push(target);
        self
    }
}
