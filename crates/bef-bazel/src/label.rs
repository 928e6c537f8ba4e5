use serde::{Deserialize, Serialize};
use std::{borrow::Borrow, fmt, str::FromStr};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LabelError {
    #[error("empty label")]
    Empty,
    #[error("label `{0}` must start with `//` or `@repo//`")]
    MissingRoot(String),
    #[error("label `{0}` has an empty repository name")]
    EmptyRepository(String),
    #[error("label `{0}` has more than one `:`")]
    MultipleColons(String),
    #[error("label `{0}` has an empty target name")]
    EmptyTarget(String),
    #[error("label `{0}` has a malformed package path")]
    InvalidPackage(String),
}

const PACKAGE_WILDCARDS: [&str; 3] = ["*", "all", "all-targets"];

/// A Bazel label such as `//projects/libs/foo:foo` or `@maven//:com_google_guava_guava`.
///
/// Labels are normalized on construction (`@//a:b` becomes `//a:b`, `@repo` becomes
/// `@repo//:repo`) and compare, order and hash by their string form.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetLabel {
    label: String,
}

impl TargetLabel {
    pub fn parse(input: &str) -> Result<Self, LabelError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(LabelError::Empty);
        }

        let (repo_prefix, rest) = if input.starts_with('@') {
            let ats = if input.starts_with("@@") { 2 } else { 1 };
            let without_ats = &input[ats..];
            match without_ats.find("//") {
                Some(0) => ("", &without_ats[2..]),
                Some(idx) => (&input[..ats + idx], &without_ats[idx + 2..]),
                None => {
                    // `@repo` is shorthand for `@repo//:repo`.
                    if without_ats.is_empty() || without_ats.contains([':', '/']) {
                        return Err(LabelError::EmptyRepository(input.to_string()));
                    }
                    let label = format!("{input}//:{without_ats}");
                    return Ok(Self { label });
                }
            }
        } else if let Some(rest) = input.strip_prefix("//") {
            ("", rest)
        } else {
            return Err(LabelError::MissingRoot(input.to_string()));
        };

        let (package, target) = match rest.split_once(':') {
            Some((package, target)) => {
                if target.contains(':') {
                    return Err(LabelError::MultipleColons(input.to_string()));
                }
                if target.is_empty() {
                    return Err(LabelError::EmptyTarget(input.to_string()));
                }
                (package, Some(target))
            }
            None => (rest, None),
        };

        if package.starts_with('/') || package.contains("//") {
            return Err(LabelError::InvalidPackage(input.to_string()));
        }
        // `//foo/` is accepted and means `//foo`.
        let package = package.strip_suffix('/').unwrap_or(package);

        let mut label = String::with_capacity(input.len());
        label.push_str(repo_prefix);
        label.push_str("//");
        label.push_str(package);
        if let Some(target) = target {
            label.push(':');
            label.push_str(target);
        }
        Ok(Self { label })
    }

    pub fn as_str(&self) -> &str {
        &self.label
    }

    fn after_root(&self) -> &str {
        // Every constructed label contains `//`.
        self.label
            .find("//")
            .map_or(self.label.as_str(), |idx| &self.label[idx + 2..])
    }

    /// External repository name, without the leading `@`/`@@`.
    pub fn repository(&self) -> Option<&str> {
        let idx = self.label.find("//")?;
        let prefix = &self.label[..idx];
        let name = prefix.trim_start_matches('@');
        (!prefix.is_empty()).then_some(name)
    }

    pub fn is_external(&self) -> bool {
        self.label.starts_with('@')
    }

    /// Package path without the repository prefix, e.g. `projects/libs/foo`.
    pub fn package_path(&self) -> &str {
        let rest = self.after_root();
        rest.split_once(':').map_or(rest, |(package, _)| package)
    }

    pub fn explicit_target(&self) -> Option<&str> {
        self.after_root().split_once(':').map(|(_, target)| target)
    }

    /// The target name, implied by the last package component for `//a/b`.
    pub fn target_name(&self) -> &str {
        self.explicit_target().unwrap_or_else(|| {
            let package = self.package_path();
            package.rsplit('/').next().unwrap_or(package)
        })
    }

    /// `//pkg:*`, `//pkg:all`, `//pkg:all-targets`.
    pub fn is_package_wildcard(&self) -> bool {
        self.explicit_target()
            .is_some_and(|target| PACKAGE_WILDCARDS.contains(&target))
    }

    /// `//pkg/...` or `//...`, optionally followed by a package wildcard.
    pub fn is_recursive_wildcard(&self) -> bool {
        let package = self.package_path();
        package == "..." || package.ends_with("/...")
    }

    pub fn is_wildcard(&self) -> bool {
        self.is_package_wildcard() || self.is_recursive_wildcard()
    }

    /// `true` for the workspace root package (`//` or `//:name`) of the main repository.
    pub fn is_root_package(&self) -> bool {
        !self.is_external() && self.package_path().is_empty()
    }

    /// The label of the package itself (`//a/b`), dropping any target name.
    pub fn package_label(&self) -> TargetLabel {
        let prefix_len = self.label.len() - self.after_root().len();
        let mut label = self.label[..prefix_len].to_string();
        label.push_str(self.package_path());
        TargetLabel { label }
    }

    /// `//a/b:*`, the key used for package wildcard expansion.
    pub fn package_wildcard(&self) -> TargetLabel {
        self.with_target("*")
    }

    pub fn with_target(&self, name: &str) -> TargetLabel {
        let mut label = self.package_label().label;
        label.push(':');
        label.push_str(name);
        TargetLabel { label }
    }

    /// Same repository and package.
    pub fn same_package(&self, other: &TargetLabel) -> bool {
        self.repository() == other.repository() && self.package_path() == other.package_path()
    }
}

impl fmt::Display for TargetLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

impl fmt::Debug for TargetLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TargetLabel({})", self.label)
    }
}

impl FromStr for TargetLabel {
    type Err = LabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TargetLabel {
    type Error = LabelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for TargetLabel {
    type Error = LabelError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<TargetLabel> for String {
    fn from(value: TargetLabel) -> Self {
        value.label
    }
}

impl Borrow<str> for TargetLabel {
    fn borrow(&self) -> &str {
        &self.label
    }
}

impl AsRef<str> for TargetLabel {
    fn as_ref(&self) -> &str {
        &self.label
    }
}

/// A workspace-relative package directory, e.g. `projects/libs/foo`. The root package is `""`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageLocation {
    path: String,
}

impl PackageLocation {
    pub fn new(path: impl AsRef<str>) -> Self {
        let path = path.as_ref().replace('\\', "/");
        let path = path.trim_matches('/');
        Self {
            path: path.to_string(),
        }
    }

    pub fn root() -> Self {
        Self {
            path: String::new(),
        }
    }

    pub fn from_label(label: &TargetLabel) -> Self {
        Self::new(label.package_path())
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    /// The package label, `//projects/libs/foo`.
    pub fn label(&self) -> TargetLabel {
        TargetLabel {
            label: format!("//{}", self.path),
        }
    }
}

impl fmt::Display for PackageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "//{}", self.path)
    }
}
