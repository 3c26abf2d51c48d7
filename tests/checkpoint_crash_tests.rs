//! Tests that simulate crashes around checkpoint writes.
//!
//! A crash can leave a `.tmp` file behind, or stop the process after files
//! were processed but before their completion was persisted. Neither may lose
//! previously persisted progress or corrupt the checkpoint.
//!
//! Run with: cargo test --test checkpoint_crash_tests

use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;

use flurry::checkpoint::CheckpointManager;
use flurry::error::CheckpointError;
use flurry::source::{DiscoveryManager, HourFolder};
use flurry::storage::{StorageProvider, StorageProviderRef};

const SOURCE: &str = "rogerthat";
const FOLDER: &str = "2018-02-14 10:00:00";

async fn storage(dir: &TempDir) -> StorageProviderRef {
    Arc::new(
        StorageProvider::for_url_with_options(dir.path().to_str().unwrap(), HashMap::new())
            .await
            .unwrap(),
    )
}

fn checkpoint_file(dir: &TempDir) -> std::path::PathBuf {
    dir.path().join(format!("{SOURCE}_checkpoint.json"))
}

fn add_file(dir: &TempDir, name: &str) {
    let folder = dir.path().join(FOLDER);
    std::fs::create_dir_all(&folder).unwrap();
    std::fs::write(folder.join(name), b"{}\n").unwrap();
}

async fn save_with(state_dir: &TempDir, files: &[&str]) {
    let mut manager = CheckpointManager::new(storage(state_dir).await, SOURCE);
    let folder = HourFolder::parse(FOLDER).unwrap();
    manager.state_mut().cursor.frontier = Some(folder);
    for file in files {
        manager.state_mut().mark_complete(folder, file);
    }
    manager.save().await.unwrap();
}

/// A crash after writing the temp file but before the rename leaves a stale
/// `.tmp` next to the previous checkpoint. The previous state must load.
#[tokio::test]
async fn test_stale_temp_file_leaves_old_state_readable() {
    let state_dir = TempDir::new().unwrap();
    save_with(&state_dir, &["a.json"]).await;

    let tmp = state_dir.path().join(format!("{SOURCE}_checkpoint.json.tmp"));
    std::fs::write(&tmp, br#"{"schema_version": 1, "cursor": {"fron"#).unwrap();

    let mut manager = CheckpointManager::new(storage(&state_dir).await, SOURCE);
    assert!(manager.load().await.unwrap());
    let folder = HourFolder::parse(FOLDER).unwrap();
    assert!(manager.state().is_complete(&folder, "a.json"));

    // The next save replaces the stale temp file.
    manager.state_mut().mark_complete(folder, "b.json");
    manager.save().await.unwrap();
    assert!(!tmp.exists());

    let mut reloaded = CheckpointManager::new(storage(&state_dir).await, SOURCE);
    assert!(reloaded.load().await.unwrap());
    assert_eq!(reloaded.state().completed_in(&folder), 2);
}

/// A crash during the very first save leaves only the temp file.
#[tokio::test]
async fn test_temp_file_without_checkpoint_starts_fresh() {
    let state_dir = TempDir::new().unwrap();
    let tmp = state_dir.path().join(format!("{SOURCE}_checkpoint.json.tmp"));
    std::fs::write(&tmp, b"{").unwrap();

    let mut manager = CheckpointManager::new(storage(&state_dir).await, SOURCE);
    assert!(!manager.load().await.unwrap());
    assert!(manager.state().completed.is_empty());
}

/// A checkpoint that does not parse must never be replaced by empty state.
#[tokio::test]
async fn test_corrupted_checkpoint_is_an_error() {
    let state_dir = TempDir::new().unwrap();
    std::fs::write(checkpoint_file(&state_dir), b"{\"cursor\": [").unwrap();

    let mut manager = CheckpointManager::new(storage(&state_dir).await, SOURCE);
    let err = manager.load().await.unwrap_err();
    assert!(matches!(err, CheckpointError::CheckpointParse { .. }));
}

/// Completions persisted before a crash survive the restart.
#[tokio::test]
async fn test_restart_recovers_persisted_completions() {
    let source_dir = TempDir::new().unwrap();
    let state_dir = TempDir::new().unwrap();
    add_file(&source_dir, "a.json");
    add_file(&source_dir, "b.json");
    let now = Utc.with_ymd_and_hms(2018, 2, 14, 10, 30, 0).unwrap();

    {
        let mut manager = DiscoveryManager::new(
            SOURCE,
            storage(&source_dir).await,
            CheckpointManager::new(storage(&state_dir).await, SOURCE),
        );
        assert!(!manager.init().await.unwrap());
        let files = manager.discover_at(now).await.unwrap();
        manager.mark_complete(&files[0]);
        manager.persist().await.unwrap();
    }

    let mut manager = DiscoveryManager::new(
        SOURCE,
        storage(&source_dir).await,
        CheckpointManager::new(storage(&state_dir).await, SOURCE),
    );
    assert!(manager.init().await.unwrap());
    assert_eq!(manager.frontier().map(|f| f.name()), Some(FOLDER.to_string()));

    let files = manager.discover_at(now).await.unwrap();
    let names: Vec<&str> = files.iter().map(|f| f.file_name()).collect();
    assert_eq!(names, ["b.json"]);
}

/// A crash after processing but before persisting only causes reprocessing.
#[tokio::test]
async fn test_unpersisted_completion_is_reprocessed() {
    let source_dir = TempDir::new().unwrap();
    let state_dir = TempDir::new().unwrap();
    add_file(&source_dir, "a.json");
    let now = Utc.with_ymd_and_hms(2018, 2, 14, 10, 30, 0).unwrap();

    {
        let mut manager = DiscoveryManager::new(
            SOURCE,
            storage(&source_dir).await,
            CheckpointManager::new(storage(&state_dir).await, SOURCE),
        );
        let files = manager.discover_at(now).await.unwrap();
        manager.persist().await.unwrap();
        manager.mark_complete(&files[0]);
        assert!(manager.is_dirty());
        // Dropped without persisting.
    }

    let mut manager = DiscoveryManager::new(
        SOURCE,
        storage(&source_dir).await,
        CheckpointManager::new(storage(&state_dir).await, SOURCE),
    );
    manager.init().await.unwrap();
    let files = manager.discover_at(now).await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].file_name(), "a.json");
}
