mod common;

use common::*;
use registry_mirror::error::MirrorError;
use registry_mirror::image::Manifest;
use registry_mirror::mirror::{self, PlatformFilter, PushedReference};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_single_tag_copy() {
    let source = MemoryRegistry::new("registry.example");
    let target = MemoryRegistry::new("mirror.example");
    let image = TestImage::new("foo", &["bbb", "ccc"]);
    source.add_image("foo", &image, Some("latest"));

    let connector = MemoryConnector::new().with_registry(&source).with_registry(&target);
    let context = context(connector, options());
    let report = mirror::run(
        &context,
        &[mapping("registry.example/foo:latest", "mirror.example/foo:stable")],
    )
    .await;

    assert!(report.is_success(), "{:?}", report.failures);
    assert_eq!(
        report.pushed,
        vec![PushedReference {
            digest: image.digest().to_string(),
            reference: "mirror.example/foo:stable".to_string(),
        }]
    );
    assert_eq!(
        report.pushed[0].to_string(),
        format!("{} mirror.example/foo:stable", image.digest())
    );
    assert_eq!(target.upload_count(), image.blobs.len());
    assert_eq!(target.manifest_put_count(), 1);
    assert_eq!(target.tag("foo", "stable").as_deref(), Some(image.digest()));
    assert_eq!(report.stats.blobs_uploaded, image.blobs.len());
    assert_eq!(report.stats.manifests_pushed, 1);
}

#[tokio::test]
async fn test_destination_tag_inherited_from_source() {
    let source = MemoryRegistry::new("registry.example");
    let target = MemoryRegistry::new("mirror.example");
    let image = TestImage::new("foo", &["a"]);
    source.add_image("foo", &image, Some("v1"));

    let connector = MemoryConnector::new().with_registry(&source).with_registry(&target);
    let context = context(connector, options());
    let report = mirror::run(&context, &[mapping("registry.example/foo:v1", "mirror.example/team/foo")]).await;

    assert!(report.is_success(), "{:?}", report.failures);
    assert_eq!(target.tag("team/foo", "v1").as_deref(), Some(image.digest()));
    assert_eq!(report.pushed[0].reference, "mirror.example/team/foo:v1");
}

#[tokio::test]
async fn test_digest_source_pushes_by_digest() {
    let source = MemoryRegistry::new("registry.example");
    let target = MemoryRegistry::new("mirror.example");
    let image = TestImage::new("foo", &["a", "b"]);
    source.add_image("foo", &image, None);

    let connector = MemoryConnector::new().with_registry(&source).with_registry(&target);
    let context = context(connector, options());
    let report = mirror::run(
        &context,
        &[mapping(
            &format!("registry.example/foo@{}", image.digest()),
            "mirror.example/foo",
        )],
    )
    .await;

    assert!(report.is_success(), "{:?}", report.failures);
    assert!(target.has_manifest("foo", image.digest()));
    assert_eq!(report.pushed.len(), 1);
    assert_eq!(
        report.pushed[0].reference,
        format!("mirror.example/foo@{}", image.digest())
    );
}

#[tokio::test]
async fn test_same_registry_copy_mounts_blobs() {
    let registry = MemoryRegistry::new("registry.example");
    let image = TestImage::new("foo", &["a", "b"]);
    registry.add_image("foo", &image, Some("latest"));

    let connector = MemoryConnector::new().with_registry(&registry);
    let context = context(connector, options());
    let report = mirror::run(&context, &[mapping("registry.example/foo:latest", "registry.example/bar:latest")]).await;

    assert!(report.is_success(), "{:?}", report.failures);
    assert_eq!(registry.upload_count(), 0);
    assert_eq!(registry.mount_count(), image.blobs.len());
    assert_eq!(registry.tag("bar", "latest").as_deref(), Some(image.digest()));
}

#[tokio::test]
async fn test_declined_mount_falls_back_to_upload() {
    let registry = MemoryRegistry::new("registry.example");
    registry.decline_mounts();
    let image = TestImage::new("foo", &["a", "b"]);
    registry.add_image("foo", &image, Some("latest"));

    let connector = MemoryConnector::new().with_registry(&registry);
    let context = context(connector, options());
    let report = mirror::run(&context, &[mapping("registry.example/foo:latest", "registry.example/bar:latest")]).await;

    assert!(report.is_success(), "{:?}", report.failures);
    assert_eq!(registry.mount_count(), 0);
    assert_eq!(registry.upload_count(), image.blobs.len());
}

#[tokio::test]
async fn test_failed_mount_falls_back_to_upload() {
    let registry = MemoryRegistry::new("registry.example");
    registry.fail_mounts(MirrorError::Http {
        status: 500,
        message: "internal error".to_string(),
    });
    let image = TestImage::new("foo", &["a", "b"]);
    registry.add_image("foo", &image, Some("latest"));

    let connector = MemoryConnector::new().with_registry(&registry);
    let context = context(connector, options());
    let report = mirror::run(&context, &[mapping("registry.example/foo:latest", "registry.example/bar:latest")]).await;

    assert!(report.is_success(), "{:?}", report.failures);
    assert_eq!(registry.mount_count(), 0);
    assert_eq!(registry.upload_count(), image.blobs.len());
    assert_eq!(registry.tag("bar", "latest").as_deref(), Some(image.digest()));
}

#[tokio::test]
async fn test_mount_reporting_existing_blob_counts_as_present() {
    let registry = MemoryRegistry::new("registry.example");
    registry.fail_mounts(MirrorError::AlreadyExists("blob".to_string()));
    let image = TestImage::new("foo", &["a", "b"]);
    registry.add_image("foo", &image, Some("latest"));

    let connector = MemoryConnector::new().with_registry(&registry);
    let context = context(connector, options());
    let report = mirror::run(&context, &[mapping("registry.example/foo:latest", "registry.example/bar:latest")]).await;

    assert!(report.is_success(), "{:?}", report.failures);
    assert_eq!(registry.upload_count(), 0);
    assert_eq!(report.stats.blobs_present, image.blobs.len());
    assert_eq!(registry.tag("bar", "latest").as_deref(), Some(image.digest()));
}

#[tokio::test]
async fn test_skip_mount_always_uploads() {
    let registry = MemoryRegistry::new("registry.example");
    let image = TestImage::new("foo", &["a"]);
    registry.add_image("foo", &image, Some("latest"));

    let mut options = options();
    options.skip_mount = true;
    let connector = MemoryConnector::new().with_registry(&registry);
    let context = context(connector, options);
    let report = mirror::run(&context, &[mapping("registry.example/foo:latest", "registry.example/bar:latest")]).await;

    assert!(report.is_success(), "{:?}", report.failures);
    assert_eq!(registry.mount_count(), 0);
    assert_eq!(registry.upload_count(), image.blobs.len());
}

#[tokio::test]
async fn test_mount_digest_mismatch_is_fatal() {
    let registry = MemoryRegistry::new("registry.example");
    registry.mismatch_mounts();
    let image = TestImage::new("foo", &["a"]);
    registry.add_image("foo", &image, Some("latest"));

    let connector = MemoryConnector::new().with_registry(&registry);
    let context = context(connector, options());
    let report = mirror::run(&context, &[mapping("registry.example/foo:latest", "registry.example/bar:latest")]).await;

    assert!(!report.is_success());
    assert!(report
        .failures
        .iter()
        .any(|f| matches!(f.cause, MirrorError::DigestMismatch { .. })));
    assert_eq!(registry.upload_count(), 0);
    assert!(registry.tag("bar", "latest").is_none());
    assert!(report.pushed.is_empty());
}

#[tokio::test]
async fn test_blob_reused_across_destination_repositories() {
    let source = MemoryRegistry::new("a.example");
    let target = MemoryRegistry::new("mirror.example");
    let image = TestImage::new("app", &["base", "app"]);
    source.add_image("app", &image, Some("1"));

    let connector = MemoryConnector::new().with_registry(&source).with_registry(&target);
    let context = context(connector, options());
    let report = mirror::run(
        &context,
        &[
            mapping("a.example/app:1", "mirror.example/one:1"),
            mapping("a.example/app:1", "mirror.example/two:1"),
            mapping("a.example/app:1", "mirror.example/three:1"),
        ],
    )
    .await;

    assert!(report.is_success(), "{:?}", report.failures);
    assert_eq!(target.upload_count(), image.blobs.len());
    assert_eq!(target.mount_count(), 2 * image.blobs.len());
    for repository in ["one", "two", "three"] {
        assert_eq!(target.tag(repository, "1").as_deref(), Some(image.digest()));
    }
    assert!(report.phases >= 2);
    assert_eq!(context.blobs_in_flight(), 0);
}

#[tokio::test]
async fn test_shared_digest_uploaded_once_per_repository() {
    let target = MemoryRegistry::new("mirror.example");
    let mut connector = MemoryConnector::new().with_registry(&target);
    let mut mappings = Vec::new();
    let mut images = Vec::new();
    for index in 0..5 {
        let host = format!("source{}.example", index);
        let registry = MemoryRegistry::new(&host);
        let own = format!("own{}", index);
        let image = TestImage::new(&format!("app{}", index), &["base", own.as_str()]);
        registry.add_image("app", &image, Some("1"));
        connector = connector.with_registry(&registry);
        mappings.push(mapping(&format!("{}/app:1", host), &format!("mirror.example/shared:v{}", index)));
        images.push(image);
    }
    let base = images[0].blobs[1].digest().to_string();
    assert_eq!(base, images[4].blobs[1].digest());

    let context = context(connector, options());
    let report = mirror::run(&context, &mappings).await;

    assert!(report.is_success(), "{:?}", report.failures);
    assert_eq!(target.uploads_of("shared", &base), 1);
    assert_eq!(target.overlapping_uploads(), 0);
    for (index, image) in images.iter().enumerate() {
        assert_eq!(
            target.tag("shared", &format!("v{}", index)).as_deref(),
            Some(image.digest())
        );
        assert_eq!(target.uploads_of("shared", image.blobs[2].digest()), 1);
    }
    assert_eq!(report.pushed.len(), 5);
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let source = MemoryRegistry::new("registry.example");
    let target = MemoryRegistry::new("mirror.example");
    let image = TestImage::new("foo", &["a", "b"]);
    let index = TestIndex::new(vec![
        (TestImage::new("amd64", &["x"]), "linux/amd64"),
        (TestImage::new("arm64", &["y"]), "linux/arm64"),
    ]);
    source.add_image("foo", &image, Some("latest"));
    source.add_index("multi", &index, Some("v1"));
    let mappings = vec![
        mapping("registry.example/foo:latest", "mirror.example/foo:stable"),
        mapping("registry.example/foo:latest", "mirror.example/foo:prod"),
        mapping("registry.example/multi:v1", "mirror.example/multi:v1"),
    ];

    let first = mirror::run(
        &context(MemoryConnector::new().with_registry(&source).with_registry(&target), options()),
        &mappings,
    )
    .await;
    assert!(first.is_success(), "{:?}", first.failures);
    assert_eq!(first.pushed.len(), 3);
    let uploads = target.upload_count();
    let puts = target.manifest_put_count();

    let second = mirror::run(
        &context(MemoryConnector::new().with_registry(&source).with_registry(&target), options()),
        &mappings,
    )
    .await;
    assert!(second.is_success(), "{:?}", second.failures);
    assert!(second.pushed.is_empty());
    assert_eq!(target.upload_count(), uploads);
    assert_eq!(target.manifest_put_count(), puts);
    assert_eq!(second.stats.manifests_skipped, 3);
}

#[tokio::test]
async fn test_force_copies_again() {
    let source = MemoryRegistry::new("registry.example");
    let target = MemoryRegistry::new("mirror.example");
    let image = TestImage::new("foo", &["a"]);
    source.add_image("foo", &image, Some("latest"));
    let mappings = vec![mapping("registry.example/foo:latest", "mirror.example/foo:latest")];

    mirror::run(
        &context(MemoryConnector::new().with_registry(&source).with_registry(&target), options()),
        &mappings,
    )
    .await;
    let uploads = target.upload_count();
    let puts = target.manifest_put_count();

    let mut options = options();
    options.force = true;
    let report = mirror::run(
        &context(MemoryConnector::new().with_registry(&source).with_registry(&target), options),
        &mappings,
    )
    .await;

    assert!(report.is_success(), "{:?}", report.failures);
    assert_eq!(target.manifest_put_count(), puts + 1);
    assert_eq!(report.pushed.len(), 1);
    // blobs already in the repository are not uploaded again
    assert_eq!(target.upload_count(), uploads);
}

#[tokio::test]
async fn test_manifest_list_filtered_to_one_platform() {
    let source = MemoryRegistry::new("registry.example");
    let target = MemoryRegistry::new("mirror.example");
    let amd64 = TestImage::new("amd64", &["shared", "amd64-only"]);
    let arm64 = TestImage::new("arm64", &["shared", "arm64-only"]);
    let index = TestIndex::new(vec![(amd64.clone(), "linux/amd64"), (arm64.clone(), "linux/arm64")]);
    source.add_index("app", &index, Some("v1"));

    let connector = MemoryConnector::new().with_registry(&source).with_registry(&target);
    let filter = PlatformFilter::from_pattern("linux/amd64").unwrap();
    let context = context_with(connector, options(), filter, CancellationToken::new());
    let report = mirror::run(&context, &[mapping("registry.example/app:v1", "mirror.example/app:v1")]).await;

    assert!(report.is_success(), "{:?}", report.failures);
    let pushed = target.tag("app", "v1").expect("tag pushed");
    assert_ne!(pushed, index.digest());
    assert_eq!(report.pushed.len(), 1);
    assert_eq!(report.pushed[0].digest, pushed);

    assert!(target.has_manifest("app", amd64.digest()));
    assert!(!target.has_manifest("app", arm64.digest()));
    for blob in &amd64.blobs {
        assert!(target.has_blob("app", blob.digest()));
    }
    assert!(!target.has_blob("app", arm64.blobs[2].digest()));

    let stored = target.manifest("app", &pushed).unwrap();
    match stored.decode().unwrap() {
        Manifest::List(list) => {
            assert_eq!(list.manifests.len(), 1);
            assert_eq!(list.manifests[0].digest, amd64.digest());
        }
        Manifest::Image(_) => panic!("expected a manifest list"),
    }
}

#[tokio::test]
async fn test_unfiltered_manifest_list_keeps_digest() {
    let source = MemoryRegistry::new("registry.example");
    let target = MemoryRegistry::new("mirror.example");
    let index = TestIndex::new(vec![
        (TestImage::new("amd64", &["x"]), "linux/amd64"),
        (TestImage::new("arm64", &["y"]), "linux/arm64"),
    ]);
    source.add_index("app", &index, Some("v1"));

    let connector = MemoryConnector::new().with_registry(&source).with_registry(&target);
    let context = context(connector, options());
    let report = mirror::run(&context, &[mapping("registry.example/app:v1", "mirror.example/app:v1")]).await;

    assert!(report.is_success(), "{:?}", report.failures);
    assert_eq!(target.tag("app", "v1").as_deref(), Some(index.digest()));
    for child in &index.children {
        assert!(target.has_manifest("app", child.digest()));
    }
    // children are pushed by digest but only the requested tag is reported
    assert_eq!(report.pushed.len(), 1);
}

#[tokio::test]
async fn test_filter_removing_everything_is_skipped() {
    let source = MemoryRegistry::new("registry.example");
    let target = MemoryRegistry::new("mirror.example");
    let index = TestIndex::new(vec![(TestImage::new("amd64", &["x"]), "linux/amd64")]);
    source.add_index("app", &index, Some("v1"));

    let connector = MemoryConnector::new().with_registry(&source).with_registry(&target);
    let filter = PlatformFilter::from_pattern("windows/.*").unwrap();
    let context = context_with(connector, options(), filter, CancellationToken::new());
    let report = mirror::run(&context, &[mapping("registry.example/app:v1", "mirror.example/app:v1")]).await;

    assert!(report.is_success(), "{:?}", report.failures);
    assert!(report.pushed.is_empty());
    assert_eq!(target.manifest_put_count(), 0);
}

#[tokio::test]
async fn test_unreachable_source_does_not_abort_others() {
    let source = MemoryRegistry::new("registry.example");
    let target = MemoryRegistry::new("mirror.example");
    let image = TestImage::new("foo", &["a"]);
    source.add_image("foo", &image, Some("latest"));

    let connector = MemoryConnector::new().with_registry(&source).with_registry(&target);
    let context = context(connector, options());
    let report = mirror::run(
        &context,
        &[
            mapping("down.example/foo:latest", "mirror.example/down:latest"),
            mapping("registry.example/foo:latest", "mirror.example/foo:latest"),
        ],
    )
    .await;

    assert_eq!(report.failures.len(), 1);
    let failure = &report.failures[0];
    assert_eq!(failure.source, "down.example/foo:latest");
    assert_eq!(failure.destination, "mirror.example/down:latest");
    assert!(matches!(failure.cause, MirrorError::Connection(_)));
    assert_eq!(report.pushed.len(), 1);
    assert_eq!(target.tag("foo", "latest").as_deref(), Some(image.digest()));

    let aggregate = report.into_result().unwrap_err();
    assert_eq!(aggregate.len(), 1);
    assert!(aggregate.to_string().contains("down.example/foo:latest"));
}

#[tokio::test]
async fn test_failed_upload_blocks_only_its_manifest() {
    let source = MemoryRegistry::new("registry.example");
    let target = MemoryRegistry::new("mirror.example");
    let broken = TestImage::new("broken", &["bad", "fine"]);
    let healthy = TestImage::new("healthy", &["good"]);
    source.add_image("broken", &broken, Some("1"));
    source.add_image("healthy", &healthy, Some("1"));
    target.fail_uploads_of(broken.blobs[1].digest());

    let connector = MemoryConnector::new().with_registry(&source).with_registry(&target);
    let context = context(connector, options());
    let report = mirror::run(
        &context,
        &[
            mapping("registry.example/broken:1", "mirror.example/broken:1"),
            mapping("registry.example/healthy:1", "mirror.example/healthy:1"),
        ],
    )
    .await;

    assert!(!report.is_success());
    assert!(report
        .failures
        .iter()
        .any(|f| matches!(f.cause, MirrorError::BlobTransfer(_))));
    assert!(report
        .failures
        .iter()
        .any(|f| matches!(f.cause, MirrorError::ManifestPush(_)) && f.destination == "mirror.example/broken:1"));
    // sibling blobs of the same manifest are still copied
    assert!(target.has_blob("broken", broken.blobs[2].digest()));
    assert!(target.tag("broken", "1").is_none());
    assert_eq!(target.tag("healthy", "1").as_deref(), Some(healthy.digest()));
    assert_eq!(report.stats.blobs_failed, 1);
}

#[tokio::test]
async fn test_missing_tag_fails_unless_skipped() {
    let source = MemoryRegistry::new("registry.example");
    let target = MemoryRegistry::new("mirror.example");
    let image = TestImage::new("foo", &["a"]);
    source.add_image("foo", &image, Some("latest"));
    let mappings = vec![
        mapping("registry.example/foo:missing", "mirror.example/foo:missing"),
        mapping("registry.example/foo:latest", "mirror.example/foo:latest"),
    ];

    let report = mirror::run(
        &context(MemoryConnector::new().with_registry(&source).with_registry(&target), options()),
        &mappings,
    )
    .await;
    assert_eq!(report.failures.len(), 1);
    assert!(matches!(report.failures[0].cause, MirrorError::Resolution(_)));
    assert_eq!(report.pushed.len(), 1);

    let mut options = options();
    options.skip_missing = true;
    let report = mirror::run(
        &context(MemoryConnector::new().with_registry(&source).with_registry(&target), options),
        &mappings,
    )
    .await;
    assert!(report.is_success(), "{:?}", report.failures);
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let source = MemoryRegistry::new("registry.example");
    let target = MemoryRegistry::new("mirror.example");
    let image = TestImage::new("foo", &["a", "b"]);
    source.add_image("foo", &image, Some("latest"));

    let mut options = options();
    options.dry_run = true;
    let connector = MemoryConnector::new().with_registry(&source).with_registry(&target);
    let context = context(connector, options);
    let report = mirror::run(&context, &[mapping("registry.example/foo:latest", "mirror.example/foo:latest")]).await;

    assert!(report.is_success(), "{:?}", report.failures);
    assert!(report.pushed.is_empty());
    assert_eq!(report.phases, 1);
    assert_eq!(target.upload_count(), 0);
    assert_eq!(target.manifest_put_count(), 0);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let source = MemoryRegistry::new("registry.example");
    let target = MemoryRegistry::new("mirror.example");
    source.add_image("foo", &TestImage::new("foo", &["a"]), Some("latest"));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let connector = MemoryConnector::new().with_registry(&source).with_registry(&target);
    let context = context_with(connector, options(), PlatformFilter::all(), cancel);
    let report = mirror::run(&context, &[mapping("registry.example/foo:latest", "mirror.example/foo:latest")]).await;

    assert!(!report.failures.is_empty());
    assert!(report
        .failures
        .iter()
        .all(|f| matches!(f.cause, MirrorError::Cancelled)));
    assert_eq!(target.upload_count(), 0);
}

#[tokio::test]
async fn test_cancel_aborts_in_flight_uploads() {
    let source = MemoryRegistry::new("registry.example");
    let target = MemoryRegistry::new("mirror.example").with_upload_delay(Duration::from_secs(30));
    source.add_image("foo", &TestImage::new("foo", &["a", "b"]), Some("latest"));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let connector = MemoryConnector::new().with_registry(&source).with_registry(&target);
    let context = context_with(connector, options(), PlatformFilter::all(), cancel);
    let mappings = [mapping("registry.example/foo:latest", "mirror.example/foo:latest")];
    let report = tokio::time::timeout(Duration::from_secs(10), mirror::run(&context, &mappings))
        .await
        .expect("run returns promptly after cancellation");

    assert!(report
        .failures
        .iter()
        .any(|f| matches!(f.cause, MirrorError::Cancelled)));
    assert!(report.pushed.is_empty());
    assert_eq!(target.upload_count(), 0);
}

#[tokio::test]
async fn test_independent_sources_connect_in_parallel() {
    let target = MemoryRegistry::new("mirror.example");
    let mut connector = MemoryConnector::new()
        .with_registry(&target)
        .with_connect_delay(Duration::from_millis(200));
    let mut mappings = Vec::new();
    for index in 0..4 {
        let source = MemoryRegistry::new(&format!("source{}.example", index));
        let image = TestImage::new(&format!("app{}", index), &["layer"]);
        source.add_image("app", &image, Some("1"));
        connector = connector.with_registry(&source);
        mappings.push(mapping(
            &format!("source{}.example/app:1", index),
            &format!("mirror.example/app{}:1", index),
        ));
    }

    let connector = Arc::new(connector);
    let context = shared_context(connector.clone(), options());
    let report = mirror::run(&context, &mappings).await;

    assert!(report.is_success(), "{:?}", report.failures);
    assert_eq!(report.pushed.len(), 4);
    assert!(connector.peak_concurrent_connects() > 1);
}

#[tokio::test]
async fn test_manifest_not_matching_requested_digest_is_rejected() {
    let source = MemoryRegistry::new("registry.example");
    let target = MemoryRegistry::new("mirror.example");
    let image = TestImage::new("foo", &["a"]);
    let other = TestImage::new("other", &["b"]);
    source.add_image("foo", &image, None);
    source.serve_manifest_as("foo", image.digest(), &other.manifest);

    let connector = MemoryConnector::new().with_registry(&source).with_registry(&target);
    let context = context(connector, options());
    let report = mirror::run(
        &context,
        &[mapping(&format!("registry.example/foo@{}", image.digest()), "mirror.example/foo:v1")],
    )
    .await;

    assert_eq!(report.failures.len(), 1);
    assert!(matches!(report.failures[0].cause, MirrorError::DigestMismatch { .. }));
    assert!(target.tag("foo", "v1").is_none());
    assert_eq!(target.upload_count(), 0);
}

#[tokio::test]
async fn test_destination_blobs_checked_concurrently() {
    let source = MemoryRegistry::new("registry.example");
    let target = MemoryRegistry::new("mirror.example").with_stat_delay(Duration::from_millis(50));
    let image = TestImage::new("foo", &["a", "b", "c", "d"]);
    source.add_image("foo", &image, Some("latest"));

    let connector = MemoryConnector::new().with_registry(&source).with_registry(&target);
    let context = context(connector, options());
    let report = mirror::run(&context, &[mapping("registry.example/foo:latest", "mirror.example/foo:latest")]).await;

    assert!(report.is_success(), "{:?}", report.failures);
    assert!(target.peak_concurrent_stats() > 1);
    assert!(target.peak_concurrent_stats() <= options().limits.max_per_registry);
}
