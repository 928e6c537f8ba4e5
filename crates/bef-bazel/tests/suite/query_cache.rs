use crate::suite::support::{foo_fixture, label, FOO, FOO_QUERY, FOO_TEST};
use bef_bazel::{BazelError, BuildFileModel, QueryCache, QueryCacheStats};
use pretty_assertions::assert_eq;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Barrier,
    },
    thread,
    time::Duration,
};

#[test]
fn package_listing_is_cached() {
    let fixture = foo_fixture();
    let workspace = fixture.workspace();

    let model = workspace.list_targets(&label("//projects/libs/foo")).unwrap();
    assert!(model.is_buildable());
    assert_eq!(model.kind_of(&label(FOO)), Some("java_library"));
    assert_eq!(model.kind_of(&label(FOO_TEST)), Some("java_test"));
    assert_eq!(model.test_targets().collect::<Vec<_>>(), vec![&label(FOO_TEST)]);

    // Any label in the package shares the entry.
    let again = workspace.list_targets(&label(FOO)).unwrap();
    assert!(Arc::ptr_eq(&model, &again));

    assert_eq!(
        fixture.bazel.calls(),
        vec![vec![
            "query".to_string(),
            FOO_QUERY.to_string(),
            "--output".to_string(),
            "label_kind".to_string(),
        ]]
    );
    assert_eq!(
        workspace.caches().queries.stats(),
        QueryCacheStats {
            hits: 1,
            misses: 1,
            entries: 1,
        }
    );
}

#[test]
fn root_package_is_never_queried() {
    let fixture = foo_fixture();
    let workspace = fixture.workspace();

    let model = workspace.list_targets(&label("//")).unwrap();
    assert!(!model.is_buildable());
    assert_eq!(model.package, label("//"));
    assert_eq!(fixture.bazel.call_count(), 0);
}

#[test]
fn failed_queries_are_not_cached() {
    let fixture = foo_fixture();
    let workspace = fixture.workspace();
    fixture.bazel.fail_queries(1);

    let err = workspace.list_targets(&label(FOO)).unwrap_err();
    assert!(matches!(err, BazelError::CommandFailed { .. }), "{err}");
    assert!(workspace.caches().queries.get(&label(FOO)).is_none());

    let model = workspace.list_targets(&label(FOO)).unwrap();
    assert!(model.is_buildable());
    assert_eq!(fixture.bazel.calls_of("query"), 2);
}

#[test]
fn unknown_package_is_an_error() {
    let fixture = foo_fixture();
    let workspace = fixture.workspace();

    let err = workspace.list_targets(&label("//nope:nope")).unwrap_err();
    match err {
        BazelError::CommandFailed { subcommand, .. } => assert_eq!(subcommand, "query"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn flush_forces_a_new_query() {
    let fixture = foo_fixture();
    let workspace = fixture.workspace();
    workspace.list_targets(&label(FOO)).unwrap();

    fixture.bazel.set_query(FOO_QUERY, "java_library rule //projects/libs/foo:foo\n");
    workspace.list_targets(&label(FOO)).unwrap();
    assert_eq!(fixture.bazel.calls_of("query"), 1);

    workspace.caches().queries.flush(&label(FOO));
    let model = workspace.list_targets(&label(FOO)).unwrap();
    assert_eq!(model.labels().collect::<Vec<_>>(), vec![&label(FOO)]);
    assert_eq!(fixture.bazel.calls_of("query"), 2);
}

#[test]
fn concurrent_callers_share_one_query() {
    let cache = Arc::new(QueryCache::new());
    let runs = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(6));

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let runs = Arc::clone(&runs);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache
                    .get_or_query(&label("//a:b"), |package| {
                        runs.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(50));
                        Ok(BuildFileModel::empty(package.clone()))
                    })
                    .unwrap()
            })
        })
        .collect();
    let models: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(models.iter().all(|model| Arc::ptr_eq(model, &models[0])));
    assert_eq!(models[0].package, label("//a"));
}
