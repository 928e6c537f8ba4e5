//! Configuration for the Bazel dependency resolution engine.
//!
//! Configuration lives in an optional `bef.toml` at the workspace root. Every field has a
//! default, so an absent file (or an empty one) yields a working configuration.

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use thiserror::Error;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;

/// File name looked up at the workspace root by [`BefConfig::discover`].
pub const CONFIG_FILE_NAME: &str = "bef.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // The default `Display` embeds a source snippet; keep just the message.
        ConfigError::Toml(err.message().to_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BefConfig {
    #[serde(default)]
    pub bazel: BazelConfig,
    #[serde(default)]
    pub aspect: AspectConfig,
    #[serde(default)]
    pub classpath: ClasspathConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BefConfig {
    /// Load a config file from TOML.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::load_from_str(&text)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load `<workspace_root>/bef.toml` if it exists, otherwise return the defaults.
    pub fn discover(workspace_root: &Path) -> Result<Self, ConfigError> {
        let path = workspace_root.join(CONFIG_FILE_NAME);
        if !path.is_file() {
            tracing::debug!(
                target: "bef.config",
                workspace_root = %workspace_root.display(),
                "no bef.toml found; using defaults"
            );
            return Ok(Self::default());
        }
        let config = Self::load_from_path(&path)?;
        tracing::debug!(target: "bef.config", path = %path.display(), "loaded config");
        Ok(config)
    }
}

/// How the Bazel executable is invoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BazelConfig {
    /// Bazel (or bazelisk) executable; resolved through `PATH` when not absolute.
    #[serde(default = "BazelConfig::default_executable")]
    pub executable: PathBuf,

    /// Per-invocation timeout in milliseconds. Absent means wait indefinitely.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Extra flags appended to every `bazel build`.
    #[serde(default)]
    pub build_flags: Vec<String>,

    /// Overrides `bazel info execution_root`.
    #[serde(default)]
    pub execution_root: Option<PathBuf>,

    /// Maximum bytes captured per output stream of a Bazel invocation.
    #[serde(default = "BazelConfig::default_max_output_bytes")]
    pub max_output_bytes: usize,
}

impl BazelConfig {
    fn default_executable() -> PathBuf {
        PathBuf::from("bazel")
    }

    fn default_max_output_bytes() -> usize {
        16 * 1024 * 1024
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(|ms| Duration::from_millis(ms.max(1)))
    }
}

impl Default for BazelConfig {
    fn default() -> Self {
        Self {
            executable: Self::default_executable(),
            timeout_ms: None,
            build_flags: Vec::new(),
            execution_root: None,
            max_output_bytes: Self::default_max_output_bytes(),
        }
    }
}

/// The aspect that emits one JSON file per target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AspectConfig {
    /// `--aspects` value, `<bzl file label>%<aspect name>`.
    #[serde(default = "AspectConfig::default_aspect")]
    pub aspect: String,

    /// Output group requested so the JSON files are built.
    #[serde(default = "AspectConfig::default_output_group")]
    pub output_group: String,

    /// Suffix identifying aspect JSON files in Bazel's output.
    #[serde(default = "AspectConfig::default_file_suffix")]
    pub file_suffix: String,
}

impl AspectConfig {
    fn default_aspect() -> String {
        "@bazel_eclipse_aspect//:bef_aspect.bzl%bef_aspect".to_owned()
    }

    fn default_output_group() -> String {
        "json-files".to_owned()
    }

    fn default_file_suffix() -> String {
        ".bef-aspect.json".to_owned()
    }
}

impl Default for AspectConfig {
    fn default() -> Self {
        Self {
            aspect: Self::default_aspect(),
            output_group: Self::default_output_group(),
            file_suffix: Self::default_file_suffix(),
        }
    }
}

/// Whether test rules take part in wildcard (`:*`, `:all`) expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WildcardTestPolicy {
    /// Test rules are expanded; their contributions are flagged as test entries.
    #[default]
    Include,
    /// Test rules are dropped from wildcard expansions.
    Exclude,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClasspathConfig {
    #[serde(default)]
    pub wildcard_tests: WildcardTestPolicy,

    /// Artifacts Bazel injects into every test runtime, relative to the workspace root.
    #[serde(default = "ClasspathConfig::default_implicit_test_artifacts")]
    pub implicit_test_artifacts: Vec<PathBuf>,
}

impl ClasspathConfig {
    fn default_implicit_test_artifacts() -> Vec<PathBuf> {
        vec![PathBuf::from(
            "bazel-bin/external/bazel_tools/tools/jdk/_ijar/TestRunner/external/remote_java_tools/java_tools/Runner_deploy-ijar.jar",
        )]
    }
}

impl Default for ClasspathConfig {
    fn default() -> Self {
        Self {
            wildcard_tests: WildcardTestPolicy::default(),
            implicit_test_artifacts: Self::default_implicit_test_artifacts(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// A level (`info`, `debug`, ...) or a full `EnvFilter` directive string.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs as JSON lines.
    #[serde(default)]
    pub json: bool,

    /// Write logs to stderr.
    #[serde(default = "LoggingConfig::default_stderr")]
    pub stderr: bool,

    /// Also append logs to this file. If it cannot be opened, file logging is skipped.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    fn default_stderr() -> bool {
        true
    }

    pub(crate) fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::default_level();
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => "trace".to_owned(),
            "debug" => "debug".to_owned(),
            "info" => "info".to_owned(),
            "warn" | "warning" => "warn".to_owned(),
            "error" => "error".to_owned(),
            // Anything else is treated as an `EnvFilter` directive string.
            _ => trimmed.to_owned(),
        }
    }

    fn config_env_filter(&self) -> tracing_subscriber::EnvFilter {
        let directives = Self::normalize_level_directives(&self.level);
        tracing_subscriber::EnvFilter::try_new(directives).unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::default()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        })
    }

    /// The effective filter: the configured level with `RUST_LOG` merged on top.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let env_directives = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        let config_directives = Self::normalize_level_directives(&self.level);

        match env_directives {
            Some(env_directives) => {
                let combined = format!("{config_directives},{env_directives}");
                tracing_subscriber::EnvFilter::try_new(combined)
                    .or_else(|_| tracing_subscriber::EnvFilter::try_new(env_directives))
                    .unwrap_or_else(|_| self.config_env_filter())
            }
            None => self.config_env_filter(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            stderr: Self::default_stderr(),
            file: None,
        }
    }
}

struct MutexFileMakeWriter {
    file: Arc<Mutex<std::fs::File>>,
}

impl<'a> MakeWriter<'a> for MutexFileMakeWriter {
    type Writer = MutexFileWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        // A poisoned lock only means another writer panicked mid-line.
        MutexFileWriter {
            guard: self
                .file
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        }
    }
}

struct MutexFileWriter<'a> {
    guard: std::sync::MutexGuard<'a, std::fs::File>,
}

impl Write for MutexFileWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.guard.flush()
    }
}

static TRACING_INIT: Once = Once::new();

/// Install the global `tracing` subscriber.
///
/// Safe to call more than once; only the first call has an effect.
pub fn init_tracing(config: &LoggingConfig) {
    TRACING_INIT.call_once(|| {
        let filter = config.env_filter();

        let file = config.file.as_ref().and_then(|path| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
                .map(|file| Arc::new(Mutex::new(file)))
        });
        let file_failed = config.file.is_some() && file.is_none();

        let mut make_writer = BoxMakeWriter::new(std::io::sink);
        if config.stderr {
            // `cargo test` only captures output written through the test writer.
            if cfg!(debug_assertions) {
                make_writer = BoxMakeWriter::new(
                    make_writer.and(tracing_subscriber::fmt::writer::TestWriter::with_stderr),
                );
            } else {
                make_writer = BoxMakeWriter::new(make_writer.and(std::io::stderr));
            }
        }
        if let Some(file) = file {
            make_writer = BoxMakeWriter::new(make_writer.and(MutexFileMakeWriter { file }));
        }

        let layer: Box<dyn tracing_subscriber::Layer<_> + Send + Sync> = if config.json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        };

        let subscriber = tracing_subscriber::registry().with(filter).with(layer);
        if tracing::subscriber::set_global_default(subscriber).is_ok() && file_failed {
            if let Some(path) = config.file.as_ref() {
                tracing::warn!(
                    target: "bef.config",
                    path = %path.display(),
                    "failed to open log file; file logging disabled"
                );
            }
        }
    });
}
