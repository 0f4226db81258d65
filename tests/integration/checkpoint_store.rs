//! Checkpoint file behavior as seen by operators and by resumed runs

use racing_backfill::backfill::BackfillEngine;
use racing_backfill::resume::{
    read_checkpoint, Checkpoint, CheckpointStore, DateRange, ResumeError, RunLock,
    CHECKPOINT_SCHEMA_VERSION,
};
use racing_backfill::store::MemoryStore;
use racing_backfill::RegionFilter;
use std::sync::Arc;
use tempfile::TempDir;

use super::support::{config, d, fetch_client, ScriptedProvider};

fn checkpoint(days: &[u32]) -> Checkpoint {
    let mut cp = Checkpoint::new(
        DateRange {
            start: d(1),
            end: d(31),
        },
        RegionFilter::new(["gb"]),
        31,
    );
    for day in days {
        cp.mark_processed(d(*day));
        cp.stats.units_processed += 1;
    }
    cp
}

#[test]
fn test_save_leaves_only_the_checkpoint_and_lock() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("checkpoint.json");
    let mut store = CheckpointStore::open(&path).unwrap();
    for n in 1..=5 {
        let days: Vec<u32> = (1..=n).collect();
        store.save(&checkpoint(&days)).unwrap();
    }

    let mut names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["checkpoint.json", "checkpoint.json.lock"]);
    assert_eq!(
        RunLock::lock_path_for(&path),
        dir.path().join("checkpoint.json.lock")
    );

    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.contains("\"schema_version\": 2"));
    assert!(contents.contains("\"2024-01-05\""));
}

#[test]
fn test_status_read_does_not_need_the_lock() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("checkpoint.json");
    let mut store = CheckpointStore::open(&path).unwrap();
    store.save(&checkpoint(&[1, 2])).unwrap();

    let seen = read_checkpoint(&path).unwrap().unwrap();
    assert_eq!(seen.processed_dates.len(), 2);
    assert_eq!(seen.last_date, Some(d(2)));
}

#[test]
fn test_unsupported_schema_version_is_reported() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("checkpoint.json");
    let mut value = serde_json::to_value(checkpoint(&[1])).unwrap();
    value["schema_version"] = serde_json::json!(1);
    std::fs::write(&path, serde_json::to_string(&value).unwrap()).unwrap();

    match read_checkpoint(&path) {
        Err(ResumeError::SchemaVersionMismatch { expected, found }) => {
            assert_eq!(expected, CHECKPOINT_SCHEMA_VERSION);
            assert_eq!(found, 1);
        }
        other => panic!("expected a version mismatch, got {other:?}"),
    }
}

#[test]
fn test_inconsistent_last_date_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("checkpoint.json");
    let mut value = serde_json::to_value(checkpoint(&[1, 2])).unwrap();
    value["last_date"] = serde_json::json!("2024-01-01");
    std::fs::write(&path, serde_json::to_string(&value).unwrap()).unwrap();

    assert!(matches!(
        read_checkpoint(&path),
        Err(ResumeError::InvalidCheckpoint(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_unusable_checkpoint_falls_back_to_a_fresh_plan() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir, d(1), d(4)).with_resume(true);
    std::fs::write(&cfg.checkpoint_path, "{\"schema_version\": 2, \"truncated").unwrap();

    let mut engine = BackfillEngine::new(
        cfg,
        fetch_client(ScriptedProvider::new().shared()),
        Arc::new(MemoryStore::new()),
    )
    .unwrap();
    let prepared = engine.prepare().unwrap();
    assert!(!prepared.resumed);
    assert_eq!(prepared.len(), 4);
    assert_eq!(prepared.skipped, 0);

    // The first save replaces the corrupt file
    let summary = engine.execute(prepared).await.unwrap();
    assert!(summary.is_success());
    let path = dir.path().join("checkpoint.json");
    assert_eq!(read_checkpoint(&path).unwrap().unwrap().processed_dates.len(), 4);
}
