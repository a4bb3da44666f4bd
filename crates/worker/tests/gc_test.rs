use std::sync::Arc;

use builder_core::BuilderError;
use builder_testing_utils::{
    MockComponentRepository, MockContainerRuntime, MockRegistryApi, MockSlugStorage,
    MockVersionRepository, VersionRecordBuilder,
};
use builder_worker::gc::{FreeReason, GarbageCollector, GcReport, SlugSweeper};
use chrono::{Duration as ChronoDuration, Utc};

fn collector(
    registry: &MockRegistryApi,
    versions: &MockVersionRepository,
    components: MockComponentRepository,
) -> GarbageCollector {
    GarbageCollector::new(
        Arc::new(registry.clone()),
        Arc::new(versions.clone()),
        Arc::new(components),
    )
}

#[tokio::test]
async fn test_only_unreferenced_versions_are_deleted() {
    let registry = MockRegistryApi::new().with_tags("web", &["v1", "v2", "v3"]);
    let versions = MockVersionRepository::with_records(vec![
        VersionRecordBuilder::new("web", "v1").build(),
        VersionRecordBuilder::new("web", "v2").unusable().build(),
        VersionRecordBuilder::new("web", "v3").build(),
    ]);
    let gc = collector(&registry, &versions, MockComponentRepository::new(&["web"], &[]));

    let free = gc.free_version_images().await.unwrap();
    assert_eq!(free.len(), 1);
    assert_eq!(free[0].tag, "v2");
    assert_eq!(free[0].reason, FreeReason::FreeVersion);

    let report = gc.sweep().await.unwrap();
    assert_eq!(
        report,
        GcReport {
            free_component: 0,
            free_version: 1,
            deleted: 1,
            skipped: 0,
        }
    );
    assert_eq!(
        registry.deleted(),
        vec![("web".to_string(), MockRegistryApi::digest_of("web", "v2"))]
    );
    assert_eq!(registry.remaining_tags("web"), vec!["v1", "v3"]);
}

#[tokio::test]
async fn test_deleted_component_images_are_freed() {
    let registry = MockRegistryApi::new()
        .with_tags("gone", &["a", "b"])
        .with_tags("web", &["v1"]);
    let versions =
        MockVersionRepository::with_records(vec![VersionRecordBuilder::new("web", "v1").build()]);
    let gc = collector(
        &registry,
        &versions,
        MockComponentRepository::new(&["web"], &["Gone"]),
    );

    let report = gc.sweep().await.unwrap();
    assert_eq!(report.free_component, 2);
    assert_eq!(report.free_version, 0);
    assert_eq!(report.deleted, 2);
    assert!(registry.remaining_tags("gone").is_empty());
    assert_eq!(registry.remaining_tags("web"), vec!["v1"]);
}

#[tokio::test]
async fn test_delete_disabled_aborts_sweep() {
    let registry = MockRegistryApi::new()
        .with_tags("web", &["old1", "old2", "v3"])
        .disable_delete();
    let versions =
        MockVersionRepository::with_records(vec![VersionRecordBuilder::new("web", "v3").build()]);
    let gc = collector(&registry, &versions, MockComponentRepository::new(&["web"], &[]));

    let err = gc.sweep().await.unwrap_err();
    assert!(matches!(err, BuilderError::RegistryWriteDisabled));
    assert_eq!(registry.delete_attempts(), 1);
    assert_eq!(registry.remaining_tags("web").len(), 3);
}

#[tokio::test]
async fn test_tag_sharing_manifest_with_referenced_tag_is_kept() {
    let registry = MockRegistryApi::new()
        .with_tag_digest("web", "v1", "sha256:same")
        .with_tag_digest("web", "v2", "sha256:same")
        .with_tag_digest("web", "v0", "sha256:old");
    let versions =
        MockVersionRepository::with_records(vec![VersionRecordBuilder::new("web", "v2").build()]);
    let gc = collector(&registry, &versions, MockComponentRepository::new(&["web"], &[]));

    let free = gc.free_version_images().await.unwrap();
    assert_eq!(free.len(), 1);
    assert_eq!(free[0].tag, "v0");

    let report = gc.sweep().await.unwrap();
    assert_eq!(report.free_version, 1);
    assert_eq!(report.deleted, 1);
    assert_eq!(
        registry.deleted(),
        vec![("web".to_string(), "sha256:old".to_string())]
    );
    assert_eq!(registry.remaining_tags("web"), vec!["v1", "v2"]);
}

#[tokio::test]
async fn test_unreadable_repository_is_skipped() {
    let registry = MockRegistryApi::new()
        .fail_tags("broken")
        .fail_tags("gone")
        .with_tags("web", &["v1", "v2"]);
    let versions =
        MockVersionRepository::with_records(vec![VersionRecordBuilder::new("web", "v2").build()]);
    let gc = collector(
        &registry,
        &versions,
        MockComponentRepository::new(&["broken", "web"], &["gone"]),
    );

    let report = gc.sweep().await.unwrap();
    assert_eq!(
        report,
        GcReport {
            free_component: 0,
            free_version: 1,
            deleted: 1,
            skipped: 2,
        }
    );
    assert_eq!(registry.remaining_tags("web"), vec!["v2"]);
}

#[tokio::test]
async fn test_empty_registry_is_a_noop() {
    let registry = MockRegistryApi::new();
    let versions = MockVersionRepository::new();
    let gc = collector(&registry, &versions, MockComponentRepository::new(&["web"], &[]));

    assert_eq!(gc.sweep().await.unwrap(), GcReport::default());
    assert_eq!(registry.delete_attempts(), 0);
}

#[tokio::test]
async fn test_slug_sweep_keeps_newest_versions() {
    let now = Utc::now();
    let versions = MockVersionRepository::with_records(vec![
        VersionRecordBuilder::new("web", "v1")
            .delivered_slug("/grdata/slug/web/v1.tgz")
            .created_at(now - ChronoDuration::hours(3))
            .build(),
        VersionRecordBuilder::new("web", "v2")
            .delivered_image("hub.kato.me/web:v2")
            .created_at(now - ChronoDuration::hours(2))
            .build(),
        VersionRecordBuilder::new("web", "v3")
            .delivered_image("hub.kato.me/web:v3")
            .created_at(now - ChronoDuration::hours(1))
            .build(),
        VersionRecordBuilder::new("api", "v1")
            .delivered_image("hub.kato.me/api:v1")
            .build(),
    ]);
    let containers = MockContainerRuntime::with_images(&["hub.kato.me/web:v2", "hub.kato.me/web:v3"]);
    let slugs = MockSlugStorage::new().with_file("/grdata/slug/web/v1.tgz", b"slug");
    let sweeper = SlugSweeper::new(
        Arc::new(versions.clone()),
        Arc::new(containers.clone()),
        Arc::new(slugs.clone()),
        1,
    );

    assert_eq!(sweeper.sweep().await.unwrap(), 2);
    assert!(versions.find("web", "v3").is_some());
    assert!(versions.find("web", "v2").is_none());
    assert!(versions.find("web", "v1").is_none());
    assert!(versions.find("api", "v1").is_some());
    assert!(!containers.has_image("hub.kato.me/web:v2"));
    assert!(containers.has_image("hub.kato.me/web:v3"));
    assert!(!slugs.contains("/grdata/slug/web/v1.tgz"));
}

#[tokio::test]
async fn test_slug_sweep_keeps_record_when_removal_fails() {
    let now = Utc::now();
    let versions = MockVersionRepository::with_records(vec![
        VersionRecordBuilder::new("web", "v1")
            .delivered_image("hub.kato.me/web:v1")
            .created_at(now - ChronoDuration::hours(2))
            .build(),
        VersionRecordBuilder::new("web", "v2")
            .delivered_image("hub.kato.me/web:v2")
            .created_at(now - ChronoDuration::hours(1))
            .build(),
    ]);
    let containers = MockContainerRuntime::new();
    containers.fail("remove", 1, |image| BuilderError::Network(format!("daemon busy removing {image}")));
    let sweeper = SlugSweeper::new(
        Arc::new(versions.clone()),
        Arc::new(containers),
        Arc::new(MockSlugStorage::new()),
        1,
    );

    assert_eq!(sweeper.sweep().await.unwrap(), 0);
    assert_eq!(versions.count(), 2);
}
