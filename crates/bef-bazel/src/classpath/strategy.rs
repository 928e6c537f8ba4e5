use super::{AspectClasspathStrategy, ClasspathResult, ImplicitDependencyStrategy, TargetClasspath};
use crate::{
    aspect::{ArtifactLocation, AspectTargetInfo},
    error::{BazelError, Result},
    label::{PackageLocation, TargetLabel},
};
use bef_config::ClasspathConfig;
use bef_process::CancellationToken;
use indexmap::{IndexMap, IndexSet};
use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

/// Everything a strategy may consult while resolving one project.
#[derive(Debug, Clone, Copy)]
pub struct ClasspathContext<'a> {
    pub workspace_root: &'a Path,
    pub execution_root: &'a Path,
    /// Packages that are source folders of the project; their targets never become entries.
    pub project_packages: &'a IndexSet<PackageLocation>,
    /// Aspect records for the activated targets and their transitive dependencies.
    pub infos: &'a IndexMap<TargetLabel, Arc<AspectTargetInfo>>,
    /// Rule kinds known from package listings, for targets without an aspect record.
    pub rule_kinds: &'a HashMap<TargetLabel, String>,
    pub config: &'a ClasspathConfig,
}

impl<'a> ClasspathContext<'a> {
    pub fn info(&self, label: &TargetLabel) -> Option<&'a Arc<AspectTargetInfo>> {
        self.infos.get(label)
    }

    pub fn rule_kind(&self, label: &TargetLabel) -> Option<&'a str> {
        match self.infos.get(label) {
            Some(info) if !info.kind.is_empty() => Some(info.kind.as_str()),
            _ => self.rule_kinds.get(label).map(String::as_str),
        }
    }

    pub fn is_test_target(&self, label: &TargetLabel) -> bool {
        self.rule_kind(label)
            .is_some_and(|kind| kind.ends_with("_test"))
    }

    pub fn is_project_package(&self, label: &TargetLabel) -> bool {
        !label.is_external() && self.project_packages.contains(&PackageLocation::from_label(label))
    }

    pub fn resolve(&self, location: &ArtifactLocation) -> PathBuf {
        location.resolve(self.workspace_root, self.execution_root)
    }
}

/// One way of contributing classpath entries for a target.
pub trait ClasspathStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Add entries for `acc.target()` and mark it complete when nothing else is needed.
    fn resolve(&self, ctx: &ClasspathContext<'_>, acc: &mut TargetClasspath<'_>) -> Result<()>;
}

/// Strategies tried in order for every target; the first to complete a target stops the chain.
#[derive(Clone)]
pub struct ClasspathStrategyChain {
    strategies: Vec<Arc<dyn ClasspathStrategy>>,
}

impl Default for ClasspathStrategyChain {
    fn default() -> Self {
        Self {
            strategies: vec![
                Arc::new(AspectClasspathStrategy),
                Arc::new(ImplicitDependencyStrategy),
            ],
        }
    }
}

impl fmt::Debug for ClasspathStrategyChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.strategies.iter().map(|s| s.name()))
            .finish()
    }
}

impl ClasspathStrategyChain {
    pub fn empty() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    pub fn push(&mut self, strategy: impl ClasspathStrategy + 'static) -> &mut Self {
        self.strategies.push(Arc::new(strategy));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Resolve `targets` into one result.
    ///
    /// `cancellation` is checked before each target; a strategy error is recorded as a problem
    /// for that target and the next strategy still runs.
    pub fn resolve(
        &self,
        ctx: &ClasspathContext<'_>,
        targets: &[TargetLabel],
        cancellation: Option<&CancellationToken>,
    ) -> Result<ClasspathResult> {
        let mut result = ClasspathResult::new();

        for target in targets {
            if cancellation.is_some_and(CancellationToken::is_cancelled) {
                return Err(BazelError::Cancelled {
                    operation: "classpath resolution".to_string(),
                });
            }

            let mut acc = TargetClasspath::new(target.clone(), &mut result);
            for strategy in &self.strategies {
                if let Err(err) = strategy.resolve(ctx, &mut acc) {
                    tracing::warn!(
                        target: "bef.bazel",
                        label = %target,
                        strategy = strategy.name(),
                        error = %err,
                        "classpath strategy failed"
                    );
                    acc.add_problem(format!("{} strategy failed: {err}", strategy.name()));
                    continue;
                }
                if acc.is_complete() {
                    tracing::trace!(
                        target: "bef.bazel",
                        label = %target,
                        strategy = strategy.name(),
                        "classpath target complete"
                    );
                    break;
                }
            }

            if !acc.is_complete() {
                result.unresolved.push(target.clone());
            }
        }

        result.complete = result.unresolved.is_empty();
        Ok(result)
    }
}
