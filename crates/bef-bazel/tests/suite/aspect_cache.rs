use crate::suite::support::label;
use bef_bazel::{AspectCacheStats, AspectInfoCache, AspectTargetInfo, PackageLocation};
use pretty_assertions::assert_eq;
use std::{
    sync::{Arc, Barrier},
    thread,
};

fn info(l: &str, kind: &str) -> Arc<AspectTargetInfo> {
    Arc::new(AspectTargetInfo::new(label(l), kind, format!("{l}.json")))
}

#[test]
fn counts_hits_and_misses() {
    let cache = AspectInfoCache::new();
    let foo = label("//a:foo");

    assert!(cache.get(&foo).is_none());
    cache.put(foo.clone(), info("//a:foo", "java_library"));
    assert!(cache.get(&foo).is_some());
    assert!(cache.get(&foo).is_some());
    assert!(cache.peek(&foo).is_some());

    assert_eq!(
        cache.stats(),
        AspectCacheStats {
            hits: 2,
            misses: 1,
            fallbacks: 0,
            current: 1,
            wildcard: 0,
            last_known_good: 1,
        }
    );
}

#[test]
fn first_put_wins_and_is_mirrored() {
    let cache = AspectInfoCache::new();
    let foo = label("//a:foo");

    let first = cache.put(foo.clone(), info("//a:foo", "java_library"));
    let second = cache.put(foo.clone(), info("//a:foo", "java_binary"));

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(second.kind, "java_library");
    assert!(Arc::ptr_eq(&cache.last_known_good(&foo).unwrap(), &first));
}

#[test]
fn concurrent_puts_agree_on_one_value() {
    let cache = Arc::new(AspectInfoCache::new());
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|idx| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache.put(label("//a:foo"), info("//a:foo", &format!("kind_{idx}")))
            })
        })
        .collect();
    let winners: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let current = cache.peek(&label("//a:foo")).unwrap();
    assert!(winners.iter().all(|winner| Arc::ptr_eq(winner, &current)));
    assert!(Arc::ptr_eq(
        &cache.last_known_good(&label("//a:foo")).unwrap(),
        &current
    ));
}

#[test]
fn flush_current_keeps_last_known_good() {
    let cache = AspectInfoCache::new();
    let foo = label("//a:foo");
    cache.put(foo.clone(), info("//a:foo", "java_library"));
    cache.put_wildcard(label("//a:*"), vec![foo.clone()]);

    cache.flush_current();

    assert!(cache.peek(&foo).is_none());
    assert!(cache.wildcard_members(&label("//a:*")).is_none());
    assert_eq!(cache.last_known_good_len(), 1);
    assert_eq!(cache.fallback(&foo).unwrap().kind, "java_library");
    assert!(cache.fallback(&label("//a:other")).is_none());
    assert_eq!(cache.stats().fallbacks, 1);

    cache.flush_all();
    assert_eq!(cache.last_known_good_len(), 0);
}

#[test]
fn package_flush_is_scoped() {
    let cache = AspectInfoCache::new();
    cache.put(label("//a:foo"), info("//a:foo", "java_library"));
    cache.put(label("//a/b:bar"), info("//a/b:bar", "java_library"));
    cache.put(label("@r//a:baz"), info("@r//a:baz", "jvm_import"));
    cache.put_wildcard(label("//a:*"), vec![label("//a:foo")]);

    cache.flush_package(&PackageLocation::new("a"));

    assert!(cache.peek(&label("//a:foo")).is_none());
    assert!(cache.peek(&label("//a/b:bar")).is_some());
    assert!(cache.peek(&label("@r//a:baz")).is_some());
    assert!(cache.wildcard_members(&label("//a:*")).is_none());
    assert_eq!(cache.last_known_good_len(), 3);
}

#[test]
fn wildcard_expansion_first_writer_wins() {
    let cache = AspectInfoCache::new();
    let first = cache.put_wildcard(label("//a:*"), vec![label("//a:foo")]);
    let second = cache.put_wildcard(label("//a:*"), vec![label("//a:bar")]);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(*second, vec![label("//a:foo")]);
}

#[test]
fn package_flush_reaches_recursive_wildcards() {
    let cache = AspectInfoCache::new();
    for wildcard in ["//a/...", "//...", "//b/...", "//ab/...", "//a/c:*", "@r//a/..."] {
        cache.put_wildcard(label(wildcard), Vec::new());
    }

    cache.flush_package(&PackageLocation::new("a/c"));

    let kept: Vec<_> = ["//a/...", "//...", "//b/...", "//ab/...", "//a/c:*", "@r//a/..."]
        .into_iter()
        .filter(|wildcard| cache.wildcard_members(&label(wildcard)).is_some())
        .collect();
    assert_eq!(kept, vec!["//b/...", "//ab/...", "@r//a/..."]);
}

#[test]
fn undescribed_labels_live_with_the_current_tier() {
    let cache = AspectInfoCache::new();
    cache.mark_undescribed(label("@remotejdk//:jdk"));
    cache.mark_undescribed(label("//a:gen"));
    assert!(cache.is_undescribed(&label("@remotejdk//:jdk")));

    cache.flush_package(&PackageLocation::new("a"));
    assert!(!cache.is_undescribed(&label("//a:gen")));
    assert!(cache.is_undescribed(&label("@remotejdk//:jdk")));

    cache.flush_current();
    assert!(!cache.is_undescribed(&label("@remotejdk//:jdk")));
}
