use crate::suite::support::{foo_fixture, label, target, FOO, GUAVA};
use bef_bazel::{
    AspectDependency, AspectTargetInfo, DependencyGraph, DependencyGraphBuilder, DependencyKind,
    GraphGranularity, PackageLocation, TargetLabel,
};
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;

fn pkg(name: &str) -> TargetLabel {
    PackageLocation::new(name).label()
}

fn set(labels: &[&str]) -> BTreeSet<TargetLabel> {
    labels.iter().map(|l| pkg(l)).collect()
}

fn labels(raw: &[&str]) -> BTreeSet<TargetLabel> {
    raw.iter().map(|l| label(l)).collect()
}

fn sample_graph() -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    graph.add_dependency(pkg("rootA"), pkg("midA1"));
    graph.add_dependency(pkg("rootA"), pkg("midA2"));
    graph.add_dependency(pkg("midA1"), pkg("leafA1"));
    graph.add_dependency(pkg("midA1"), pkg("leafA1b"));
    graph.add_dependency(pkg("midA2"), pkg("leafA2"));
    graph
}

#[test]
fn roots_and_leaves() {
    let graph = sample_graph();
    assert_eq!(graph.node_count(), 6);
    assert_eq!(graph.edge_count(), 5);
    assert_eq!(graph.root_labels(), set(&["rootA"]));
    assert_eq!(graph.leaf_labels(false), set(&["leafA1", "leafA1b", "leafA2"]));
    assert!(graph
        .root_labels()
        .intersection(&graph.leaf_labels(false))
        .next()
        .is_none());
}

#[test]
fn isolated_nodes_are_both_root_and_leaf() {
    let mut graph = sample_graph();
    graph.add_node(pkg("alone"));
    let roots = graph.root_labels();
    let leaves = graph.leaf_labels(false);
    let both: Vec<_> = roots.intersection(&leaves).cloned().collect();
    assert_eq!(both, vec![pkg("alone")]);
}

#[test]
fn order_places_dependencies_first() {
    let graph = sample_graph();
    let selected = vec![
        PackageLocation::new("midA2"),
        PackageLocation::new("rootA"),
        PackageLocation::new("leafA2"),
    ];
    assert_eq!(
        graph.order_labels(&selected),
        vec![
            PackageLocation::new("leafA2"),
            PackageLocation::new("midA2"),
            PackageLocation::new("rootA"),
        ]
    );

    // Traversal passes through unselected nodes.
    let selected = vec![PackageLocation::new("rootA"), PackageLocation::new("leafA1b")];
    assert_eq!(
        graph.order_labels(&selected),
        vec![PackageLocation::new("leafA1b"), PackageLocation::new("rootA")]
    );
}

#[test]
fn transitive_queries() {
    let graph = sample_graph();
    assert_eq!(
        graph.transitive_dependencies(&pkg("rootA")),
        vec![
            pkg("midA1"),
            pkg("leafA1"),
            pkg("leafA1b"),
            pkg("midA2"),
            pkg("leafA2"),
        ]
    );
    assert!(graph.is_dependency(&pkg("rootA"), &pkg("leafA2")));
    assert!(!graph.is_dependency(&pkg("midA2"), &pkg("leafA1")));
    assert_eq!(
        graph.direct_dependents(&pkg("leafA2")).collect::<Vec<_>>(),
        vec![&pkg("midA2")]
    );
}

#[test]
fn external_leaves_can_be_ignored() {
    let mut graph = DependencyGraph::new();
    graph.add_dependency(label("//app:app"), label("//lib:lib"));
    graph.add_dependency(label("//lib:lib"), label(GUAVA));
    graph.add_dependency(label("//app:app"), label("//util:util"));

    assert_eq!(
        graph.leaf_labels(false),
        labels(&[GUAVA, "//util:util"])
    );
    assert_eq!(
        graph.leaf_labels(true),
        labels(&["//util:util"])
    );
}

fn record(l: &str, deps: &[&str]) -> AspectTargetInfo {
    let mut info = AspectTargetInfo::new(label(l), "java_library", "x.json");
    info.deps = deps
        .iter()
        .map(|dep| AspectDependency {
            label: label(dep),
            kind: DependencyKind::Compile,
        })
        .collect();
    info
}

#[test]
fn builder_collapses_to_packages() {
    let infos = vec![
        record("//app:app", &["//app:helpers", "//lib:lib", GUAVA]),
        record("//app:helpers", &["//lib:lib"]),
        record("//lib:lib", &[]),
    ];

    let targets = DependencyGraphBuilder::new(GraphGranularity::Target).build(&infos);
    assert_eq!(targets.node_count(), 4);
    assert_eq!(targets.edge_count(), 4);

    let packages = DependencyGraphBuilder::new(GraphGranularity::Package)
        .include_external(false)
        .build(&infos);
    assert_eq!(
        packages.labels().cloned().collect::<Vec<_>>(),
        vec![pkg("app"), pkg("lib")]
    );
    assert_eq!(packages.edge_count(), 1);
    assert!(packages.is_dependency(&pkg("app"), &pkg("lib")));
}

#[test]
fn workspace_orders_packages_from_aspect_records() {
    let fixture = foo_fixture();
    let workspace = fixture.workspace();

    let graph = workspace
        .dependency_graph(&[label(FOO)], GraphGranularity::Target, None)
        .unwrap();
    assert_eq!(graph.root_labels(), labels(&[FOO]));
    assert!(graph.leaf_labels(true).is_empty());

    fixture.add_target(target(
        "//projects/apps/server:server",
        "java_binary",
        &[(FOO, 0)],
        Vec::new(),
    ));
    fixture.bazel.set_query(
        "kind(rule, //projects/apps/server:*)",
        "java_binary rule //projects/apps/server:server\n",
    );
    let ordered = workspace
        .order_packages(
            &[
                PackageLocation::new("projects/apps/server"),
                PackageLocation::new("projects/libs/foo"),
            ],
            None,
        )
        .unwrap();
    assert_eq!(
        ordered,
        vec![
            PackageLocation::new("projects/libs/foo"),
            PackageLocation::new("projects/apps/server"),
        ]
    );
}
