use super::{
    AspectDependency, AspectParseError, AspectTargetInfo, ArtifactLocation, DependencyKind,
    ProviderRegistry,
};
use crate::label::TargetLabel;
use serde::Deserialize;
use serde_json::Value;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

/// Parses aspect output files into [`AspectTargetInfo`] records.
///
/// Parsing only reads the file; nothing is cached here.
#[derive(Debug, Clone, Default)]
pub struct AspectParser {
    registry: ProviderRegistry,
}

#[derive(Debug)]
pub struct AspectParseFailure {
    pub path: PathBuf,
    pub error: AspectParseError,
}

/// Outcome of parsing many aspect files: one corrupt file never fails the batch.
#[derive(Debug, Default)]
pub struct AspectParseBatch {
    pub infos: Vec<Arc<AspectTargetInfo>>,
    pub failures: Vec<AspectParseFailure>,
}

impl AspectParseBatch {
    pub fn labels(&self) -> impl Iterator<Item = &TargetLabel> {
        self.infos.iter().map(|info| &info.label)
    }
}

impl AspectParser {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn parse_file(&self, path: &Path) -> Result<AspectTargetInfo, AspectParseError> {
        let text = fs::read_to_string(path).map_err(|source| AspectParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.parse_str(&text, path)
    }

    /// Parse `text` as if it had been read from `path`.
    pub fn parse_str(&self, text: &str, path: &Path) -> Result<AspectTargetInfo, AspectParseError> {
        let payload: Value =
            serde_json::from_str(text).map_err(|source| AspectParseError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        self.parse_value(&payload, path)
    }

    pub fn parse_value(
        &self,
        payload: &Value,
        path: &Path,
    ) -> Result<AspectTargetInfo, AspectParseError> {
        let malformed = |field: &str, message: String| AspectParseError::Malformed {
            path: path.to_path_buf(),
            field: field.to_string(),
            message,
        };

        if !payload.is_object() {
            return Err(malformed("", "expected a JSON object".to_string()));
        }

        let raw_label = payload
            .pointer("/key/label")
            .and_then(Value::as_str)
            .ok_or_else(|| AspectParseError::MissingLabel {
                path: path.to_path_buf(),
            })?;
        let label = parse_label(raw_label, path)?;

        let kind = match payload.get("kind_string") {
            Some(Value::String(kind)) => Some(kind.clone()),
            None | Some(Value::Null) => None,
            Some(other) => {
                return Err(malformed("kind_string", format!("expected a string, got {other}")))
            }
        };

        let mut base = AspectTargetInfo::new(label, kind.clone().unwrap_or_default(), path);
        base.deps = parse_deps(payload, path)?;
        if let Some(tags) = payload.get("tags").filter(|v| !v.is_null()) {
            base.tags = Vec::<String>::deserialize(tags)
                .map_err(|err| malformed("tags", err.to_string()))?;
        }
        if let Some(location) = payload
            .get("build_file_artifact_location")
            .filter(|v| !v.is_null())
        {
            base.build_file = Some(
                ArtifactLocation::deserialize(location)
                    .map_err(|err| malformed("build_file_artifact_location", err.to_string()))?,
            );
        }

        let Some(kind) = kind else {
            tracing::warn!(
                target: "bef.bazel",
                label = %base.label,
                path = %path.display(),
                "aspect file has no kind_string; keeping label and deps only"
            );
            return Ok(base);
        };

        let provider =
            self.registry
                .provider_for(&kind)
                .ok_or_else(|| AspectParseError::UnknownRuleKind {
                    path: path.to_path_buf(),
                    kind: kind.clone(),
                })?;
        tracing::trace!(
            target: "bef.bazel",
            label = %base.label,
            kind = %kind,
            provider = provider.name(),
            "parsing aspect file"
        );
        provider.build(payload, base)
    }

    /// Parse every file, logging and skipping the ones that fail.
    pub fn parse_batch<P: AsRef<Path>>(&self, paths: &[P]) -> AspectParseBatch {
        let mut batch = AspectParseBatch::default();
        for path in paths {
            let path = path.as_ref();
            match self.parse_file(path) {
                Ok(info) => batch.infos.push(Arc::new(info)),
                Err(error) => {
                    tracing::warn!(
                        target: "bef.bazel",
                        path = %path.display(),
                        error = %error,
                        "skipping unparseable aspect file"
                    );
                    batch.failures.push(AspectParseFailure {
                        path: path.to_path_buf(),
                        error,
                    });
                }
            }
        }
        batch
    }
}

fn parse_label(raw: &str, path: &Path) -> Result<TargetLabel, AspectParseError> {
    TargetLabel::parse(raw).map_err(|source| AspectParseError::InvalidLabel {
        path: path.to_path_buf(),
        label: raw.to_string(),
        source,
    })
}

fn parse_deps(payload: &Value, path: &Path) -> Result<Vec<AspectDependency>, AspectParseError> {
    let deps = match payload.get("deps") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(deps)) => deps,
        Some(_) => {
            return Err(AspectParseError::Malformed {
                path: path.to_path_buf(),
                field: "deps".to_string(),
                message: "expected an array".to_string(),
            })
        }
    };

    let mut out = Vec::with_capacity(deps.len());
    for (idx, dep) in deps.iter().enumerate() {
        let raw_label = dep
            .pointer("/target/label")
            .and_then(Value::as_str)
            .ok_or_else(|| AspectParseError::Malformed {
                path: path.to_path_buf(),
                field: format!("deps[{idx}].target.label"),
                message: "missing".to_string(),
            })?;
        let kind = match dep.get("dependency_type") {
            None | Some(Value::Null) => DependencyKind::Compile,
            Some(code) => code
                .as_u64()
                .and_then(DependencyKind::from_code)
                .ok_or_else(|| AspectParseError::Malformed {
                    path: path.to_path_buf(),
                    field: format!("deps[{idx}].dependency_type"),
                    message: format!("unknown dependency type {code}"),
                })?,
        };
        out.push(AspectDependency {
            label: parse_label(raw_label, path)?,
            kind,
        });
    }
    Ok(out)
}
