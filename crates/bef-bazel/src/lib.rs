//! Aspect-based dependency resolution for Bazel workspaces.
//!
//! This crate turns Bazel's build graph into what IDE project tooling needs:
//! - package listings via `bazel query --output label_kind`, cached per package
//! - per-target metadata emitted by an IDE aspect, parsed through pluggable providers and kept
//!   in a three-tier cache (current, wildcard expansions, last-known-good)
//! - label-level and package-level dependency graphs with a dependency-first ordering
//! - per-project classpaths resolved by an ordered chain of strategies
//!
//! [`BazelWorkspace`] is the entry point; everything it runs goes through a [`CommandRunner`],
//! so tests can substitute a fake Bazel.

pub mod aspect;
mod cache;
pub mod classpath;
mod command;
mod error;
mod graph;
mod label;
mod problems;
mod query;
mod registry;
mod workspace;

pub use crate::{
    aspect::{
        AspectDependency, AspectInfoProvider, AspectParseBatch, AspectParseError, AspectParser,
        AspectTargetInfo, ArtifactLocation, DependencyKind, JarArtifact, ProviderRegistry,
    },
    cache::{AspectCacheStats, AspectInfoCache},
    classpath::{
        CachedClasspath, ClasspathEntry, ClasspathProject, ClasspathResult, ClasspathStrategy,
        ClasspathStrategyChain,
    },
    command::{CommandOutput, CommandRunner, DefaultCommandRunner},
    error::{BazelError, Result},
    graph::{DependencyGraph, DependencyGraphBuilder, GraphGranularity},
    label::{LabelError, PackageLocation, TargetLabel},
    problems::{parse_problem_line, parse_problems, BazelProblem},
    query::{
        package_rules_expression, parse_label_kind_output, BuildFileModel, QueryCache,
        QueryCacheStats,
    },
    registry::{caches_for_workspace, forget_workspace, WorkspaceCaches},
    workspace::{
        bazel_workspace_root, is_bazel_workspace, AspectBuild, AspectLoad, BazelWorkspace,
        BuildOutcome, TargetExpansion,
    },
};

pub use bef_process::{CancellationToken, OutputStream};
