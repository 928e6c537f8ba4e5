use crate::suite::support::label;
use bef_bazel::{
    AspectInfoProvider, AspectParseError, AspectParser, AspectTargetInfo, ArtifactLocation,
    DependencyKind, ProviderRegistry,
};
use pretty_assertions::assert_eq;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

const FOO_ASPECT: &str = r#"{
  "key": { "label": "//projects/libs/foo:foo" },
  "kind_string": "java_library",
  "build_file_artifact_location": {
    "relative_path": "projects/libs/foo/BUILD",
    "is_source": true
  },
  "tags": ["manual"],
  "deps": [
    { "target": { "label": "@maven//:com_google_guava_guava" } },
    { "target": { "label": "@maven//:ch_qos_logback_logback_classic" }, "dependency_type": 1 }
  ],
  "java_ide_info": {
    "jars": [
      {
        "jar": {
          "relative_path": "projects/libs/foo/libfoo.jar",
          "root_execution_path_fragment": "bazel-out/k8-fastbuild/bin"
        },
        "interface_jar": {
          "relative_path": "projects/libs/foo/libfoo-hjar.jar",
          "root_execution_path_fragment": "bazel-out/k8-fastbuild/bin"
        },
        "source_jar": {
          "relative_path": "projects/libs/foo/libfoo-src.jar",
          "root_execution_path_fragment": "bazel-out/k8-fastbuild/bin"
        }
      }
    ],
    "generated_jars": [
      {
        "jar": {
          "relative_path": "projects/libs/foo/libfoo-gen.jar",
          "root_execution_path_fragment": "bazel-out/k8-fastbuild/bin"
        }
      }
    ],
    "sources": [
      { "relative_path": "projects/libs/foo/src/main/java/Foo.java", "is_source": true }
    ],
    "main_class": ""
  }
}"#;

fn parse(text: &str) -> Result<AspectTargetInfo, AspectParseError> {
    AspectParser::default().parse_str(text, Path::new("foo.bef-aspect.json"))
}

#[test]
fn parses_jvm_target() {
    let info = parse(FOO_ASPECT).unwrap();

    assert_eq!(info.label, label("//projects/libs/foo:foo"));
    assert_eq!(info.kind, "java_library");
    assert!(!info.is_test_rule());
    assert_eq!(info.tags, vec!["manual".to_string()]);
    assert_eq!(info.aspect_file, PathBuf::from("foo.bef-aspect.json"));
    assert_eq!(
        info.deps_of_kind(DependencyKind::Compile).collect::<Vec<_>>(),
        vec![&label("@maven//:com_google_guava_guava")]
    );
    assert_eq!(
        info.deps_of_kind(DependencyKind::Runtime).collect::<Vec<_>>(),
        vec![&label("@maven//:ch_qos_logback_logback_classic")]
    );
    assert_eq!(info.main_class, None);
    assert_eq!(info.sources.len(), 1);
    assert_eq!(info.generated_outputs.len(), 1);
    assert_eq!(
        info.build_file,
        Some(ArtifactLocation::source("projects/libs/foo/BUILD"))
    );

    let jar = &info.outputs[0];
    assert_eq!(
        jar.binary().unwrap().resolve(Path::new("/ws"), Path::new("/exec")),
        PathBuf::from("/exec/bazel-out/k8-fastbuild/bin/projects/libs/foo/libfoo.jar")
    );
    assert_eq!(
        info.sources[0].resolve(Path::new("/ws"), Path::new("/exec")),
        PathBuf::from("/ws/projects/libs/foo/src/main/java/Foo.java")
    );
}

#[test]
fn missing_kind_parses_as_generic_record() {
    let info = parse(
        r#"{ "key": { "label": "//a:b" }, "deps": [ { "target": { "label": "//c:d" } } ] }"#,
    )
    .unwrap();
    assert_eq!(info.kind, "");
    assert_eq!(info.dependency_labels().collect::<Vec<_>>(), vec![&label("//c:d")]);
    assert!(info.outputs.is_empty());
}

#[test]
fn generic_rules_keep_label_deps_and_sources_only() {
    let info = parse(
        r#"{
          "key": { "label": "//protos:api" },
          "kind_string": "proto_library",
          "deps": [ { "target": { "label": "//protos:common" } } ],
          "sources": [ { "relative_path": "protos/api.proto", "is_source": true } ],
          "java_ide_info": { "jars": [ { "jar": { "relative_path": "ignored.jar" } } ] }
        }"#,
    )
    .unwrap();
    assert_eq!(info.kind, "proto_library");
    assert_eq!(info.sources, vec![ArtifactLocation::source("protos/api.proto")]);
    assert!(info.outputs.is_empty());
}

#[test]
fn unknown_rule_kind_is_an_error() {
    let err = parse(r#"{ "key": { "label": "//a:b" }, "kind_string": "py_library" }"#).unwrap_err();
    match err {
        AspectParseError::UnknownRuleKind { kind, .. } => assert_eq!(kind, "py_library"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn malformed_key_fields_are_errors() {
    assert!(matches!(
        parse(r#"{ "kind_string": "java_library" }"#),
        Err(AspectParseError::MissingLabel { .. })
    ));
    assert!(matches!(
        parse(r#"{ "key": { "label": "not-a-label" }, "kind_string": "java_library" }"#),
        Err(AspectParseError::InvalidLabel { .. })
    ));
    assert!(matches!(
        parse(r#"{ "key": { "label": "//a:b" }, "kind_string": "java_library", "deps": [ { "target": {} } ] }"#),
        Err(AspectParseError::Malformed { .. })
    ));
    assert!(matches!(
        parse(r#"{ "key": { "label": "//a:b" }, "kind_string": "java_library", "deps": [ { "target": { "label": "//c" }, "dependency_type": 9 } ] }"#),
        Err(AspectParseError::Malformed { .. })
    ));
    assert!(matches!(
        parse(r#"{ "key": { "label": "//a:b" }, "kind_string": "java_library", "java_ide_info": { "jars": 3 } }"#),
        Err(AspectParseError::Malformed { .. })
    ));
    assert!(matches!(parse("{ not json"), Err(AspectParseError::Json { .. })));
}

#[test]
fn batch_skips_corrupt_files() {
    let dir = tempdir().unwrap();
    let good = dir.path().join("foo.bef-aspect.json");
    let corrupt = dir.path().join("bar.bef-aspect.json");
    let missing = dir.path().join("gone.bef-aspect.json");
    std::fs::write(&good, FOO_ASPECT).unwrap();
    std::fs::write(&corrupt, "{ \"key\": ").unwrap();

    let batch = AspectParser::default().parse_batch(&[&good, &corrupt, &missing]);

    assert_eq!(
        batch.labels().collect::<Vec<_>>(),
        vec![&label("//projects/libs/foo:foo")]
    );
    assert_eq!(batch.failures.len(), 2);
    assert_eq!(batch.failures[0].path, corrupt);
    assert!(matches!(batch.failures[1].error, AspectParseError::Io { .. }));
    assert_eq!(batch.failures[1].error.path(), missing.as_path());
}

#[test]
fn registered_providers_extend_the_parser() {
    struct PythonProvider;

    impl AspectInfoProvider for PythonProvider {
        fn name(&self) -> &'static str {
            "python"
        }

        fn can_handle(&self, kind: &str) -> bool {
            kind.starts_with("py_")
        }

        fn build(
            &self,
            payload: &Value,
            mut base: AspectTargetInfo,
        ) -> Result<AspectTargetInfo, AspectParseError> {
            base.main_class = payload
                .pointer("/py_ide_info/main")
                .and_then(Value::as_str)
                .map(str::to_string);
            Ok(base)
        }
    }

    let mut registry = ProviderRegistry::default();
    registry.register(PythonProvider);
    let parser = AspectParser::new(registry);

    let info = parser
        .parse_str(
            r#"{ "key": { "label": "//tools:gen" }, "kind_string": "py_binary", "py_ide_info": { "main": "gen.py" } }"#,
            Path::new("gen.bef-aspect.json"),
        )
        .unwrap();
    assert_eq!(info.main_class.as_deref(), Some("gen.py"));
}
