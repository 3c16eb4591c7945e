//! Trait contract tests for TestStore.
//!
//! These tests verify the behavioral contract of the store trait against
//! the in-memory fake and the JSON file store. Any conforming
//! implementation must pass these.

use testsync_state::fakes::{MemoryTestStore, StoreWrite};
use testsync_state::{
    HeaderUpdate, JsonFileStore, RecordId, RecordPatch, StorageError, StoreHeader,
    TestProperties, TestStatus, TestStore,
};

fn props(project: &str, title: &str) -> TestProperties {
    TestProperties {
        title: title.to_string(),
        project: project.to_string(),
        tag: "root".to_string(),
        file_name: "arith".to_string(),
        status: Some(TestStatus::Pass),
        archived: false,
        active: true,
        icon: Some(TestStatus::Pass.icon().to_string()),
    }
}

async fn create_then_query_filters_by_namespace(store: &dyn TestStore) {
    store.create(&props("web", "a")).await.unwrap();
    store.create(&props("api", "b")).await.unwrap();
    store.create(&props("web", "c")).await.unwrap();

    let web = store.query("web").await.unwrap();
    let titles: Vec<_> = web.iter().map(|r| r.properties.title.as_str()).collect();
    assert_eq!(titles, vec!["a", "c"]);
    assert_eq!(store.query("api").await.unwrap().len(), 1);
    assert!(store.query("none").await.unwrap().is_empty());
}

async fn create_assigns_unique_ids(store: &dyn TestStore) {
    let a = store.create(&props("web", "a")).await.unwrap();
    let b = store.create(&props("web", "a")).await.unwrap();
    assert_ne!(a.id, b.id);
    assert_ne!(a.url, b.url);
    assert_eq!(a.properties, props("web", "a"));
}

async fn update_applies_only_patched_fields(store: &dyn TestStore) {
    let created = store.create(&props("web", "a")).await.unwrap();
    let patch = RecordPatch {
        status: Some(TestStatus::Fail),
        icon: Some(TestStatus::Fail.icon().to_string()),
        ..Default::default()
    };
    store.update(&created.id, &patch).await.unwrap();

    let record = store.query("web").await.unwrap().remove(0);
    assert_eq!(record.properties.status, Some(TestStatus::Fail));
    assert_eq!(record.properties.icon.as_deref(), Some("clear_red"));
    assert_eq!(record.properties.title, "a");
    assert!(record.properties.active);
}

async fn update_unknown_record_fails(store: &dyn TestStore) {
    let err = store
        .update(&RecordId("missing".to_string()), &RecordPatch::archive())
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::RecordNotFound { .. }));
}

async fn archived_records_stay_queryable(store: &dyn TestStore) {
    let created = store.create(&props("web", "a")).await.unwrap();
    store.update(&created.id, &RecordPatch::archive()).await.unwrap();

    let records = store.query("web").await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].properties.archived);
}

async fn tracked_spans_namespaces(store: &dyn TestStore) {
    store.create(&props("web", "a")).await.unwrap();
    store.create(&props("api", "b")).await.unwrap();
    let inactive = TestProperties {
        active: false,
        ..props("web", "c")
    };
    store.create(&inactive).await.unwrap();
    let archived = store.create(&props("web", "d")).await.unwrap();
    store.update(&archived.id, &RecordPatch::archive()).await.unwrap();

    let mut titles: Vec<_> = store
        .tracked()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.properties.title)
        .collect();
    titles.sort();
    assert_eq!(titles, vec!["a", "b"]);
}

fn seeded_header() -> StoreHeader {
    StoreHeader {
        title: "Tests 0/0 (nightly)".to_string(),
        icon: None,
    }
}

/// Expects a store whose header is [`seeded_header`].
async fn header_update_rewrites_counter(store: &dyn TestStore) {
    store
        .update_header(&HeaderUpdate {
            counter: Some("3/4".to_string()),
            icon: Some("list_red".to_string()),
        })
        .await
        .unwrap();
    let header = store.header().await.unwrap();
    assert_eq!(header.title, "Tests 3/4 (nightly)");
    assert_eq!(header.icon.as_deref(), Some("list_red"));

    store
        .update_header(&HeaderUpdate {
            counter: None,
            icon: Some("checklist_green".to_string()),
        })
        .await
        .unwrap();
    let header = store.header().await.unwrap();
    assert_eq!(header.title, "Tests 3/4 (nightly)");
    assert_eq!(header.icon.as_deref(), Some("checklist_green"));
}

async fn header_without_counter_keeps_title(store: &dyn TestStore) {
    let before = store.header().await.unwrap();
    store
        .update_header(&HeaderUpdate {
            counter: Some("1/1".to_string()),
            icon: None,
        })
        .await
        .unwrap();
    assert_eq!(store.header().await.unwrap(), before);
}

// ===========================================================================
// MemoryTestStore
// ===========================================================================

#[tokio::test]
async fn memory_create_then_query_filters_by_namespace() {
    create_then_query_filters_by_namespace(&MemoryTestStore::new()).await;
}

#[tokio::test]
async fn memory_create_assigns_unique_ids() {
    create_assigns_unique_ids(&MemoryTestStore::new()).await;
}

#[tokio::test]
async fn memory_update_applies_only_patched_fields() {
    update_applies_only_patched_fields(&MemoryTestStore::new()).await;
}

#[tokio::test]
async fn memory_update_unknown_record_fails() {
    update_unknown_record_fails(&MemoryTestStore::new()).await;
}

#[tokio::test]
async fn memory_archived_records_stay_queryable() {
    archived_records_stay_queryable(&MemoryTestStore::new()).await;
}

#[tokio::test]
async fn memory_tracked_spans_namespaces() {
    tracked_spans_namespaces(&MemoryTestStore::new()).await;
}

#[tokio::test]
async fn memory_header_update_rewrites_counter() {
    header_update_rewrites_counter(&MemoryTestStore::new().with_header(seeded_header())).await;
}

#[tokio::test]
async fn memory_header_without_counter_keeps_title() {
    header_without_counter_keeps_title(&MemoryTestStore::new()).await;
}

#[tokio::test]
async fn memory_write_log_records_creates_and_updates() {
    let store = MemoryTestStore::new();
    let created = store.create(&props("web", "a")).await.unwrap();
    store.update(&created.id, &RecordPatch::archive()).await.unwrap();

    let writes = store.writes();
    assert_eq!(writes.len(), 2);
    assert!(matches!(&writes[0], StoreWrite::Created { id, .. } if *id == created.id));
    assert_eq!(
        writes[1],
        StoreWrite::Updated {
            id: created.id.clone(),
            patch: RecordPatch::archive(),
        }
    );

    store.clear_writes();
    assert!(store.writes().is_empty());
    assert_eq!(store.records().len(), 1);
}

// ===========================================================================
// JsonFileStore
// ===========================================================================

fn json_store() -> (tempfile::TempDir, JsonFileStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::open(dir.path().join("store.json")).unwrap();
    (dir, store)
}

#[tokio::test]
async fn json_create_then_query_filters_by_namespace() {
    let (_dir, store) = json_store();
    create_then_query_filters_by_namespace(&store).await;
}

#[tokio::test]
async fn json_create_assigns_unique_ids() {
    let (_dir, store) = json_store();
    create_assigns_unique_ids(&store).await;
}

#[tokio::test]
async fn json_update_applies_only_patched_fields() {
    let (_dir, store) = json_store();
    update_applies_only_patched_fields(&store).await;
}

#[tokio::test]
async fn json_update_unknown_record_fails() {
    let (_dir, store) = json_store();
    update_unknown_record_fails(&store).await;
}

#[tokio::test]
async fn json_archived_records_stay_queryable() {
    let (_dir, store) = json_store();
    archived_records_stay_queryable(&store).await;
}

#[tokio::test]
async fn json_tracked_spans_namespaces() {
    let (_dir, store) = json_store();
    tracked_spans_namespaces(&store).await;
}

#[tokio::test]
async fn json_header_update_rewrites_counter() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    let seeded = serde_json::json!({ "header": seeded_header(), "records": [] });
    std::fs::write(&path, serde_json::to_vec(&seeded).unwrap()).unwrap();

    let store = JsonFileStore::open(&path).unwrap();
    header_update_rewrites_counter(&store).await;

    let reopened = JsonFileStore::open(&path).unwrap();
    assert_eq!(
        reopened.header().await.unwrap().title,
        "Tests 3/4 (nightly)"
    );
}

#[tokio::test]
async fn json_header_without_counter_keeps_title() {
    let (_dir, store) = json_store();
    header_without_counter_keeps_title(&store).await;
}
