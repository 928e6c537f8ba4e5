use crate::suite::support::{foo_fixture, label, target, FOO, GUAVA};
use bef_bazel::{
    caches_for_workspace, forget_workspace, BazelWorkspace, ClasspathProject, GraphGranularity,
    PackageLocation,
};
use bef_config::BefConfig;
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn foo_project() -> ClasspathProject {
    ClasspathProject::new("foo")
        .with_package(PackageLocation::new("projects/libs/foo"))
        .with_target(label(FOO))
}

#[test]
fn broken_build_falls_back_to_last_known_good() {
    let fixture = foo_fixture();
    let workspace = fixture.workspace();

    let good = workspace.resolve_classpath(&foo_project(), None).unwrap();
    assert!(!good.result.degraded);

    workspace.flush_aspect_info_cache();
    fixture.bazel.set_broken(true);

    let degraded = workspace.resolve_classpath(&foo_project(), None).unwrap();
    assert!(degraded.result.degraded);
    assert!(degraded.result.complete);
    assert_eq!(degraded.result.entries, good.result.entries);
    assert_eq!(
        degraded.result.problems[0].target,
        Some(label("//projects/libs/foo:foo"))
    );
    assert_eq!(degraded.result.problems[0].line, Some(3));
    assert!(workspace.caches().aspects.stats().fallbacks >= 3);

    // Degraded results are not kept: once Bazel recovers the next request rebuilds.
    fixture.bazel.set_broken(false);
    let builds = fixture.bazel.aspect_builds().len();
    let recovered = workspace.resolve_classpath(&foo_project(), None).unwrap();
    assert!(!recovered.result.degraded);
    assert_eq!(fixture.bazel.aspect_builds().len(), builds + 1);
}

#[test]
fn flush_keeps_last_known_good_and_clean_drops_it() {
    let fixture = foo_fixture();
    let workspace = fixture.workspace();
    workspace.resolve_classpath(&foo_project(), None).unwrap();

    let aspects = &workspace.caches().aspects;
    let lkg_before = aspects.last_known_good_len();
    assert_eq!(aspects.current_len(), 3);
    assert_eq!(lkg_before, 3);

    workspace.flush_aspect_info_cache();
    assert_eq!(aspects.current_len(), 0);
    assert!(aspects.last_known_good_len() >= lkg_before);
    assert!(workspace.caches().classpaths.get("foo").is_none());

    workspace.clean();
    assert_eq!(aspects.last_known_good_len(), 0);

    fixture.bazel.set_broken(true);
    let result = workspace.resolve_classpath(&foo_project(), None).unwrap();
    assert!(!result.result.degraded);
    assert!(!result.result.complete);
    assert_eq!(result.result.unresolved, vec![label(FOO)]);
    assert!(result.result.entries.is_empty());
}

#[test]
fn package_flush_only_rebuilds_that_package() {
    let fixture = foo_fixture();
    let workspace = fixture.workspace();
    workspace.resolve_classpath(&foo_project(), None).unwrap();

    workspace.flush_cache(&PackageLocation::new("projects/libs/foo"));
    let aspects = &workspace.caches().aspects;
    assert!(aspects.peek(&label(FOO)).is_none());
    assert!(aspects.peek(&label(GUAVA)).is_some());

    workspace.resolve_classpath(&foo_project(), None).unwrap();
    let builds = fixture.bazel.aspect_builds();
    assert_eq!(builds.len(), 2);
    assert_eq!(builds[1].last().map(String::as_str), Some(FOO));
}

#[test]
fn workspaces_on_one_root_share_caches() {
    let fixture = foo_fixture();
    let first = BazelWorkspace::shared(fixture.root(), BefConfig::default(), fixture.bazel.clone());
    let second = BazelWorkspace::shared(fixture.root(), BefConfig::default(), fixture.bazel.clone());
    assert!(Arc::ptr_eq(first.caches(), second.caches()));
    assert!(Arc::ptr_eq(first.caches(), &caches_for_workspace(fixture.root())));

    first.resolve_classpath(&foo_project(), None).unwrap();
    second.resolve_classpath(&foo_project(), None).unwrap();
    assert_eq!(fixture.bazel.aspect_builds().len(), 1);

    assert!(forget_workspace(fixture.root()));
    assert!(!Arc::ptr_eq(first.caches(), &caches_for_workspace(fixture.root())));
    forget_workspace(fixture.root());
}

#[test]
fn build_reports_problems() {
    let fixture = foo_fixture();
    let workspace = fixture.workspace();

    let outcome = workspace.build(&[label(FOO)], None).unwrap();
    assert!(outcome.success);
    assert!(outcome.problems.is_empty());

    fixture.bazel.set_broken(true);
    let outcome = workspace.build(&[label(FOO)], None).unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.exit_code, Some(1));
    assert_eq!(outcome.problems.len(), 1);
    assert_eq!(outcome.problems[0].target, Some(label(FOO)));
}

#[test]
fn execution_root_is_queried_once() {
    let fixture = foo_fixture();
    let workspace = fixture.workspace();
    assert_eq!(workspace.execution_root().unwrap(), fixture.execution_root());
    assert_eq!(workspace.execution_root().unwrap(), fixture.execution_root());
    assert_eq!(fixture.bazel.calls_of("info"), 1);

    let mut config = BefConfig::default();
    config.bazel.execution_root = Some("custom-execroot".into());
    let configured = fixture.workspace_with(config);
    assert_eq!(
        configured.execution_root().unwrap(),
        fixture.root().join("custom-execroot")
    );
    assert_eq!(fixture.bazel.calls_of("info"), 1);
}

#[test]
fn undescribed_dependencies_are_built_once() {
    let fixture = foo_fixture();
    fixture.add_target(target(
        "//apps/a:a",
        "java_library",
        &[(GUAVA, 0), ("@remotejdk//:jdk", 0)],
        Vec::new(),
    ));
    let workspace = fixture.workspace();
    let app = [label("//apps/a:a")];

    let first = workspace.load_aspect_infos(&app, None).unwrap();
    let second = workspace.load_aspect_infos(&app, None).unwrap();
    assert_eq!(fixture.bazel.aspect_builds().len(), 1);
    assert_eq!(
        first.infos.keys().collect::<Vec<_>>(),
        second.infos.keys().collect::<Vec<_>>()
    );
    assert!(!second.degraded);
    assert!(second.problems.is_empty());

    let graph = workspace
        .dependency_graph(&app, GraphGranularity::Target, None)
        .unwrap();
    assert!(graph.leaf_labels(false).contains(&label("@remotejdk//:jdk")));
    assert_eq!(fixture.bazel.aspect_builds().len(), 1);

    workspace.flush_aspect_info_cache();
    workspace.load_aspect_infos(&app, None).unwrap();
    assert_eq!(fixture.bazel.aspect_builds().len(), 2);
}

#[test]
fn package_flush_drops_recursive_expansions_covering_it() {
    let fixture = foo_fixture();
    let workspace = fixture.workspace();
    let recursive = [label("//projects/...")];
    fixture.bazel.set_query(
        "kind(rule, //projects/...)",
        "java_library rule //projects/libs/foo:foo\n",
    );

    let first = workspace.expand_targets(&recursive).unwrap();
    assert_eq!(first.targets, vec![label(FOO)]);

    fixture.bazel.set_query(
        "kind(rule, //projects/...)",
        "java_library rule //projects/libs/foo:foo\njava_library rule //projects/libs/foo:bar\n",
    );
    workspace.flush_cache(&PackageLocation::new("tools/other"));
    assert_eq!(workspace.expand_targets(&recursive).unwrap().targets.len(), 1);

    workspace.flush_cache(&PackageLocation::new("projects/libs/foo"));
    let second = workspace.expand_targets(&recursive).unwrap();
    assert_eq!(
        second.targets,
        vec![label(FOO), label("//projects/libs/foo:bar")]
    );
}
