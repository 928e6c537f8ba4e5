use super::{ArtifactLocation, AspectParseError, AspectTargetInfo, JarArtifact};
use serde::Deserialize;
use serde_json::Value;
use std::{fmt, sync::Arc};

/// Builds the rule-family specific part of an [`AspectTargetInfo`].
///
/// `base` already carries the label, kind, deps, tags and BUILD file; the provider fills in
/// whatever its rule family reports in `payload`.
pub trait AspectInfoProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn can_handle(&self, kind: &str) -> bool;

    fn build(
        &self,
        payload: &Value,
        base: AspectTargetInfo,
    ) -> Result<AspectTargetInfo, AspectParseError>;
}

fn malformed(base: &AspectTargetInfo, field: &str, err: impl fmt::Display) -> AspectParseError {
    AspectParseError::Malformed {
        path: base.aspect_file.clone(),
        field: field.to_string(),
        message: err.to_string(),
    }
}

#[derive(Debug, Default, Deserialize)]
struct JavaIdeInfo {
    #[serde(default)]
    jars: Vec<JarArtifact>,
    #[serde(default)]
    generated_jars: Vec<JarArtifact>,
    #[serde(default)]
    sources: Vec<ArtifactLocation>,
    #[serde(default)]
    main_class: Option<String>,
}

/// Java, Kotlin and Scala rules, and the JVM import rules.
#[derive(Debug, Default, Clone, Copy)]
pub struct JvmAspectInfoProvider;

impl JvmAspectInfoProvider {
    const PREFIXES: [&'static str; 3] = ["java_", "kt_jvm_", "scala_"];
    const KINDS: [&'static str; 2] = ["jvm_import", "android_library"];
}

impl AspectInfoProvider for JvmAspectInfoProvider {
    fn name(&self) -> &'static str {
        "jvm"
    }

    fn can_handle(&self, kind: &str) -> bool {
        Self::PREFIXES.iter().any(|prefix| kind.starts_with(prefix)) || Self::KINDS.contains(&kind)
    }

    fn build(
        &self,
        payload: &Value,
        mut base: AspectTargetInfo,
    ) -> Result<AspectTargetInfo, AspectParseError> {
        let info = match payload.get("java_ide_info") {
            None | Some(Value::Null) => JavaIdeInfo::default(),
            Some(value) => JavaIdeInfo::deserialize(value)
                .map_err(|err| malformed(&base, "java_ide_info", err))?,
        };

        base.outputs = info.jars;
        base.generated_outputs = info.generated_jars;
        base.sources = info.sources;
        base.main_class = info.main_class.filter(|class| !class.is_empty());
        Ok(base)
    }
}

/// Non-JVM plumbing rules. Only label, deps and sources are recorded.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericRuleProvider;

impl GenericRuleProvider {
    const KINDS: [&'static str; 8] = [
        "filegroup",
        "genrule",
        "alias",
        "proto_library",
        "cc_library",
        "sh_binary",
        "sh_library",
        "test_suite",
    ];
}

impl AspectInfoProvider for GenericRuleProvider {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn can_handle(&self, kind: &str) -> bool {
        Self::KINDS.contains(&kind)
    }

    fn build(
        &self,
        payload: &Value,
        mut base: AspectTargetInfo,
    ) -> Result<AspectTargetInfo, AspectParseError> {
        if let Some(sources) = payload.get("sources").filter(|v| !v.is_null()) {
            base.sources = Vec::<ArtifactLocation>::deserialize(sources)
                .map_err(|err| malformed(&base, "sources", err))?;
        }
        Ok(base)
    }
}

/// Providers consulted in registration order; the first that accepts a kind wins.
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn AspectInfoProvider>>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self {
            providers: vec![Arc::new(JvmAspectInfoProvider), Arc::new(GenericRuleProvider)],
        }
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.providers.iter().map(|p| p.name()))
            .finish()
    }
}

impl ProviderRegistry {
    pub fn empty() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    pub fn register(&mut self, provider: impl AspectInfoProvider + 'static) -> &mut Self {
        self.providers.push(Arc::new(provider));
        self
    }

    pub fn provider_for(&self, kind: &str) -> Option<&dyn AspectInfoProvider> {
        self.providers
            .iter()
            .find(|provider| provider.can_handle(kind))
            .map(|provider| &**provider)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }
}
