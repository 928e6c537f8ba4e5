use bef_config::{BefConfig, ConfigError, WildcardTestPolicy};
use pretty_assertions::assert_eq;
use std::path::PathBuf;
use std::time::Duration;

#[test]
fn empty_config_uses_defaults() {
    let config = BefConfig::load_from_str("").unwrap();
    assert_eq!(config, BefConfig::default());
    assert_eq!(config.bazel.executable, PathBuf::from("bazel"));
    assert_eq!(config.bazel.timeout(), None);
    assert_eq!(config.aspect.file_suffix, ".bef-aspect.json");
    assert_eq!(config.classpath.wildcard_tests, WildcardTestPolicy::Include);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn overrides_are_applied() {
    let text = r#"
[bazel]
executable = "/opt/bin/bazelisk"
timeout_ms = 30000
build_flags = ["--config=ci"]
execution_root = "/tmp/execroot"

[aspect]
file_suffix = ".custom.json"

[classpath]
wildcard_tests = "exclude"
implicit_test_artifacts = ["tools/junit.jar"]

[logging]
level = "bef.bazel=debug"
json = true
"#;

    let config = BefConfig::load_from_str(text).unwrap();
    assert_eq!(config.bazel.executable, PathBuf::from("/opt/bin/bazelisk"));
    assert_eq!(config.bazel.timeout(), Some(Duration::from_secs(30)));
    assert_eq!(config.bazel.build_flags, vec!["--config=ci".to_string()]);
    assert_eq!(
        config.bazel.execution_root,
        Some(PathBuf::from("/tmp/execroot"))
    );
    assert_eq!(config.aspect.file_suffix, ".custom.json");
    // Untouched fields in a partially specified section keep their defaults.
    assert_eq!(config.aspect.output_group, "json-files");
    assert_eq!(config.classpath.wildcard_tests, WildcardTestPolicy::Exclude);
    assert_eq!(
        config.classpath.implicit_test_artifacts,
        vec![PathBuf::from("tools/junit.jar")]
    );
    assert!(config.logging.json);
    assert!(config.logging.stderr);
}

#[test]
fn unknown_keys_are_rejected() {
    let err = BefConfig::load_from_str("[bazel]\nexecutabel = \"bazel\"\n").unwrap_err();
    assert!(matches!(err, ConfigError::Toml(_)), "{err:?}");
    assert!(err.to_string().contains("unknown field"), "{err}");
}

#[test]
fn invalid_policy_is_rejected() {
    let err = BefConfig::load_from_str("[classpath]\nwildcard_tests = \"sometimes\"\n").unwrap_err();
    assert!(matches!(err, ConfigError::Toml(_)), "{err:?}");
}
