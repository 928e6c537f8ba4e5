//! Per-target metadata emitted by the IDE aspect.
//!
//! The aspect writes one JSON document per target. [`AspectParser`] turns such a document into an
//! [`AspectTargetInfo`], delegating the rule-family specific parts to the first registered
//! [`AspectInfoProvider`] that accepts the target's rule kind.

mod parser;
mod provider;

pub use parser::{AspectParseBatch, AspectParseFailure, AspectParser};
pub use provider::{AspectInfoProvider, GenericRuleProvider, JvmAspectInfoProvider, ProviderRegistry};

use crate::label::{LabelError, PackageLocation, TargetLabel};
use serde::{Deserialize, Serialize};
use std::{
    io,
    path::{Path, PathBuf},
};

#[derive(Debug, thiserror::Error)]
pub enum AspectParseError {
    #[error("failed to read aspect file `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("aspect file `{}` is not valid JSON: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("aspect file `{}` has no `key.label`", path.display())]
    MissingLabel { path: PathBuf },
    #[error("aspect file `{}` has invalid label `{label}`: {source}", path.display())]
    InvalidLabel {
        path: PathBuf,
        label: String,
        #[source]
        source: LabelError,
    },
    #[error("no provider handles rule kind `{kind}` (aspect file `{}`)", path.display())]
    UnknownRuleKind { path: PathBuf, kind: String },
    #[error("aspect file `{}` has malformed `{field}`: {message}", path.display())]
    Malformed {
        path: PathBuf,
        field: String,
        message: String,
    },
}

impl AspectParseError {
    pub fn path(&self) -> &Path {
        match self {
            Self::Io { path, .. }
            | Self::Json { path, .. }
            | Self::MissingLabel { path }
            | Self::InvalidLabel { path, .. }
            | Self::UnknownRuleKind { path, .. }
            | Self::Malformed { path, .. } => path,
        }
    }
}

/// Location of a file known to Bazel.
///
/// Source files live under the workspace root; generated files live under the execution root,
/// below `root_execution_path_fragment` (e.g. `bazel-out/k8-fastbuild/bin`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactLocation {
    pub relative_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_execution_path_fragment: Option<String>,
    #[serde(default)]
    pub is_source: bool,
    #[serde(default)]
    pub is_external: bool,
}

impl ArtifactLocation {
    pub fn source(relative_path: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            root_execution_path_fragment: None,
            is_source: true,
            is_external: false,
        }
    }

    pub fn generated(root_fragment: impl Into<String>, relative_path: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            root_execution_path_fragment: Some(root_fragment.into()),
            is_source: false,
            is_external: false,
        }
    }

    /// Path relative to the root it lives under.
    pub fn execution_path(&self) -> PathBuf {
        match &self.root_execution_path_fragment {
            Some(fragment) if !fragment.is_empty() => {
                Path::new(fragment).join(&self.relative_path)
            }
            _ => PathBuf::from(&self.relative_path),
        }
    }

    /// Absolute path: workspace sources against `workspace_root`, everything else against
    /// `execution_root`.
    pub fn resolve(&self, workspace_root: &Path, execution_root: &Path) -> PathBuf {
        let relative = self.execution_path();
        if relative.is_absolute() {
            return relative;
        }
        if self.is_source && !self.is_external {
            workspace_root.join(relative)
        } else {
            execution_root.join(relative)
        }
    }
}

/// A compiled jar with its optional header (interface) and source jars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JarArtifact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jar: Option<ArtifactLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface_jar: Option<ArtifactLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_jar: Option<ArtifactLocation>,
}

impl JarArtifact {
    /// The jar to put on a classpath: the full jar, or the interface jar when that is all
    /// the aspect reported.
    pub fn binary(&self) -> Option<&ArtifactLocation> {
        self.jar.as_ref().or(self.interface_jar.as_ref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    Compile,
    Runtime,
}

impl DependencyKind {
    /// Maps the aspect's numeric `dependency_type` (0 compile, 1 runtime).
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Self::Compile),
            1 => Some(Self::Runtime),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AspectDependency {
    pub label: TargetLabel,
    pub kind: DependencyKind,
}

/// Parsed aspect output for one target. Shared as `Arc<AspectTargetInfo>` once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AspectTargetInfo {
    pub label: TargetLabel,
    /// Rule kind such as `java_library`; empty when the aspect did not report one.
    pub kind: String,
    pub deps: Vec<AspectDependency>,
    pub sources: Vec<ArtifactLocation>,
    pub outputs: Vec<JarArtifact>,
    pub generated_outputs: Vec<JarArtifact>,
    pub main_class: Option<String>,
    pub tags: Vec<String>,
    pub build_file: Option<ArtifactLocation>,
    pub aspect_file: PathBuf,
}

impl AspectTargetInfo {
    /// A record carrying only the fields every rule family shares.
    pub fn new(label: TargetLabel, kind: impl Into<String>, aspect_file: impl Into<PathBuf>) -> Self {
        Self {
            label,
            kind: kind.into(),
            deps: Vec::new(),
            sources: Vec::new(),
            outputs: Vec::new(),
            generated_outputs: Vec::new(),
            main_class: None,
            tags: Vec::new(),
            build_file: None,
            aspect_file: aspect_file.into(),
        }
    }

    pub fn is_test_rule(&self) -> bool {
        self.kind.ends_with("_test")
    }

    pub fn package(&self) -> PackageLocation {
        PackageLocation::from_label(&self.label)
    }

    pub fn dependency_labels(&self) -> impl Iterator<Item = &TargetLabel> {
        self.deps.iter().map(|dep| &dep.label)
    }

    pub fn deps_of_kind(&self, kind: DependencyKind) -> impl Iterator<Item = &TargetLabel> {
        self.deps
            .iter()
            .filter(move |dep| dep.kind == kind)
            .map(|dep| &dep.label)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}
