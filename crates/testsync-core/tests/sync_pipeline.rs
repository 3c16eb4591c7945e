use std::sync::Arc;
use std::time::Duration;

use testsync_core::{
    RunResults, SnapshotFrames, SyncConfig, SyncError, SyncPipeline, TestStatus, TestStore,
};
use testsync_state::fakes::MemoryTestStore;
use testsync_state::StoreHeader;

const RUN: &str = r#"{ "files": [
    { "id": "f1", "name": "tests/arith.test.ts", "result": { "state": "fail" }, "tasks": [
        { "id": "t1", "name": "10", "tasks": [
            { "id": "t1a", "name": "should be 10", "result": { "state": "pass" } },
            { "id": "t1b", "name": "should not be 11",
              "file": { "id": "f1", "name": "tests/arith.test.ts", "filepath": "/repo/tests/arith.test.ts" },
              "result": { "state": "fail", "errors": [
                { "name": "AssertionError", "message": "expected 11 not to be 11",
                  "stacks": [ { "file": "/repo/tests/arith.test.ts", "line": 8, "column": 22 } ] }
              ] } }
        ] },
        { "id": "t2", "name": "should be skipped", "mode": "skip" }
    ] }
] }"#;

fn config() -> SyncConfig {
    SyncConfig::new("web").with_polling(0, Duration::ZERO)
}

#[tokio::test]
async fn sync_with_store_reconciles_and_refreshes_header() {
    let store = Arc::new(MemoryTestStore::new().with_header(StoreHeader {
        title: "Tests 0/0".to_string(),
        icon: None,
    }));
    let run = RunResults::from_json(RUN).unwrap();

    let report = SyncPipeline::run(
        Some(store.clone() as Arc<dyn TestStore>),
        Arc::new(SnapshotFrames::new(&run.files)),
        &config(),
        &run,
    )
    .await
    .expect("sync");

    assert_eq!(report.tests, 3);
    let changes = report.changes.as_ref().expect("changes with a store");
    assert_eq!(changes.len(), 3);
    assert_eq!(changes["t1b"].status, TestStatus::Fail);
    assert!(report.has_new_results);

    // the skipped test is stored inactive, so only two are tracked
    let summary = report.summary.expect("summary");
    assert_eq!((summary.passing, summary.total), (1, 2));
    let header = store.header().await.unwrap();
    assert_eq!(header.title, "Tests 1/2");
    assert_eq!(header.icon.as_deref(), Some("list_red"));

    assert_eq!(report.stacks.len(), 1);
    assert_eq!(report.stacks[0].id, "t1b");
    assert_eq!(report.stacks[0].location(), "tests/arith.test.ts:8:22");
}

#[tokio::test]
async fn second_sync_reports_nothing_new() {
    let store = Arc::new(MemoryTestStore::new());
    let run = RunResults::from_json(RUN).unwrap();
    let frames = Arc::new(SnapshotFrames::new(&run.files));

    for _ in 0..2 {
        SyncPipeline::run(
            Some(store.clone() as Arc<dyn TestStore>),
            frames.clone(),
            &config(),
            &run,
        )
        .await
        .unwrap();
    }
    store.clear_writes();

    let store_dyn: Arc<dyn TestStore> = store.clone();
    let report = SyncPipeline::run(Some(store_dyn), frames, &config(), &run)
        .await
        .unwrap();

    assert!(report.changes_or_empty().is_empty());
    assert!(!report.has_new_results);
    assert_eq!(report.stats.unwrap().kept, 3);
    assert!(store.writes().is_empty());
}

#[tokio::test]
async fn sync_without_store_still_resolves_stacks() {
    let run = RunResults::from_json(RUN).unwrap();

    let frames = Arc::new(SnapshotFrames::new(&run.files));
    let report = SyncPipeline::run(None, frames, &config(), &run)
        .await
        .unwrap();

    assert!(report.changes.is_none());
    assert!(report.summary.is_none());
    assert!(report.has_new_results);
    assert_eq!(report.stacks.len(), 1);
}

#[tokio::test]
async fn empty_namespace_is_a_config_error() {
    let run = RunResults::default();
    let err = SyncPipeline::run(
        None,
        Arc::new(SnapshotFrames::default()),
        &SyncConfig::new(""),
        &run,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, SyncError::Config(_)));
}

#[tokio::test]
async fn report_serializes_camel_case() {
    let run = RunResults::from_json(RUN).unwrap();
    let frames = Arc::new(SnapshotFrames::new(&run.files));
    let report = SyncPipeline::run(None, frames, &config(), &run)
        .await
        .unwrap();

    let value = serde_json::to_value(&report).unwrap();
    for key in ["namespace", "hasNewResults", "generatedAt", "durationMs", "stacks"] {
        assert!(value.get(key).is_some(), "missing key: {key}");
    }
}
