//! Integration tests for the host-side image cache.
//!
//! Images move between a temp cache root and an in-memory runtime, so the
//! tests exercise the blob store, the index and the worker pool together.

use std::sync::Arc;
use std::thread;

use proptest::prelude::*;
use tempfile::TempDir;

use minicluster::image::{
    normalize, normalize_all, ImageCache, ImageCacheConfig, ImageError, MemoryRuntime,
    MissStrategy,
};

// =============================================================================
// Test Fixtures
// =============================================================================

fn config(images: &[&str], strategy: MissStrategy) -> ImageCacheConfig {
    ImageCacheConfig::new(images.iter().map(|s| s.to_string()).collect(), strategy)
}

fn cache_with(runtime: &MemoryRuntime) -> (TempDir, ImageCache) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let cache = ImageCache::new(dir.path(), Arc::new(runtime.clone()));
    (dir, cache)
}

// =============================================================================
// Normalization
// =============================================================================

#[test]
fn untagged_names_get_latest_and_tagged_names_are_kept() {
    let normalized = normalize_all(&["alpine", "alpine:1.24"]).expect("valid names");
    assert_eq!(normalized, vec!["alpine:latest", "alpine:1.24"]);
}

#[test]
fn registry_ports_are_not_mistaken_for_tags() {
    assert_eq!(
        normalize("registry.local:5000/team/app").unwrap(),
        "registry.local:5000/team/app:latest"
    );
    assert_eq!(
        normalize("registry.local:5000/team/app:v2").unwrap(),
        "registry.local:5000/team/app:v2"
    );
}

#[test]
fn every_invalid_name_is_reported() {
    let err = normalize_all(&["alpine", "Upper Case", "", "ok:tag"]).unwrap_err();
    match err {
        ImageError::InvalidImageName(errors) => {
            assert_eq!(errors.len(), 2);
            assert!(errors[0].contains("Upper Case"));
        }
        other => panic!("unexpected {:?}", other),
    }
}

// =============================================================================
// Cache operations
// =============================================================================

#[test]
fn export_is_skipped_for_already_cached_images() {
    let runtime = MemoryRuntime::new().with_image("alpine:latest", b"v1");
    let (_dir, cache) = cache_with(&runtime);

    let first = cache
        .export_images(&config(&["alpine"], MissStrategy::Skip))
        .expect("first export");
    assert_eq!(first, vec!["alpine:latest"]);

    let second = cache
        .export_images(&config(&["alpine:latest"], MissStrategy::Skip))
        .expect("second export");
    assert!(second.is_empty());
}

#[test]
fn cached_subset_reports_only_cached_names() {
    let runtime = MemoryRuntime::new().with_image("alpine:latest", b"a");
    let (_dir, cache) = cache_with(&runtime);
    cache
        .export_images(&config(&["alpine"], MissStrategy::Skip))
        .expect("export");

    let wanted = config(&["alpine", "busybox:1.36"], MissStrategy::Skip);
    let subset = cache.cached_subset(&wanted).expect("subset");
    assert_eq!(subset.into_iter().collect::<Vec<_>>(), vec!["alpine:latest"]);
    assert!(!cache.are_images_cached(&wanted).expect("check"));
}

#[test]
fn import_of_uncached_image_is_a_no_op() {
    let runtime = MemoryRuntime::new();
    let (_dir, cache) = cache_with(&runtime);

    let imported = cache
        .import_images(&config(&["nginx:1.25"], MissStrategy::Skip))
        .expect("import");
    assert!(imported.is_empty());
    assert!(runtime.loads().is_empty());
}

#[test]
fn concurrent_exports_of_the_same_image_cache_it_once() {
    let runtime = MemoryRuntime::new().with_image("alpine:latest", b"a");
    let (dir, cache) = cache_with(&runtime);

    let results: Vec<Vec<String>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                scope.spawn(move || {
                    cache
                        .export_images(&config(&["alpine"], MissStrategy::Skip))
                        .expect("export")
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("worker panicked"))
            .collect()
    });

    let writers = results.iter().filter(|r| !r.is_empty()).count();
    assert_eq!(writers, 1);
    let reopened = ImageCache::new(dir.path(), Arc::new(MemoryRuntime::new()));
    assert_eq!(
        reopened.cached_images().unwrap().into_iter().collect::<Vec<_>>(),
        vec!["alpine:latest"]
    );
}

#[test]
fn prune_then_import_finds_nothing() {
    let runtime = MemoryRuntime::new().with_image("alpine:latest", b"a");
    let (dir, cache) = cache_with(&runtime);
    cache
        .export_images(&config(&["alpine"], MissStrategy::Skip))
        .expect("export");
    let removed = cache
        .prune_images(&config(&["alpine:latest"], MissStrategy::Skip))
        .expect("prune");
    assert_eq!(removed, vec!["alpine:latest"]);

    let target = MemoryRuntime::new();
    let fresh = ImageCache::new(dir.path(), Arc::new(target.clone()));
    let imported = fresh
        .import_images(&config(&["alpine"], MissStrategy::Skip))
        .expect("import");
    assert!(imported.is_empty());
    assert!(target.loads().is_empty());
}

// =============================================================================
// Properties
// =============================================================================

fn image_name() -> impl Strategy<Value = String> {
    let path = "[a-z0-9]{1,8}(/[a-z0-9]{1,8}){0,2}";
    let tag = prop::option::of("[a-zA-Z0-9][a-zA-Z0-9._-]{0,10}");
    let domain = prop::option::of("[a-z]{1,6}\\.[a-z]{2,3}(:[0-9]{2,4})?");
    (domain, path, tag).prop_map(|(domain, path, tag)| {
        let mut name = match domain {
            Some(d) => format!("{}/{}", d, path),
            None => path,
        };
        if let Some(t) = tag {
            name.push(':');
            name.push_str(&t);
        }
        name
    })
}

proptest! {
    /// Normalizing an already normalized name changes nothing.
    #[test]
    fn normalize_is_idempotent(name in image_name()) {
        let once = normalize(&name).expect("generated names are valid");
        let twice = normalize(&once).expect("normalized names stay valid");
        prop_assert_eq!(&once, &twice);
        prop_assert!(once.rsplit('/').next().unwrap_or("").contains(':'));
    }
}
