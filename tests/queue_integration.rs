//! Integration tests for the task store.
//!
//! These tests run against a real on-disk SQLite file, with several handles
//! (each with its own connection pool) standing in for separate processes.

use std::collections::HashSet;
use std::time::Duration;

use harvester_core::queue::keys;
use harvester_core::{
    DatabaseOptions, NewTask, RetryPolicy, StoreError, StoreLocation, StoreOptions, TaskStatus,
    TaskStore,
};
use sqlx::{Connection, SqliteConnection};
use tempfile::TempDir;

const GROUP: &str = "cats";

/// Helper to open a store under a fresh temp root.
async fn setup_store() -> (TaskStore, StoreLocation, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let location = StoreLocation::new(temp_dir.path(), GROUP);
    let store = TaskStore::open(&location, &StoreOptions::default())
        .await
        .expect("Failed to open store");
    store.initialize().await.expect("Failed to initialize");
    (store, location, temp_dir)
}

fn tasks(sequence_key: i64, count: usize) -> Vec<NewTask> {
    (0..count)
        .map(|i| {
            NewTask::new(
                sequence_key,
                format!("p{sequence_key}-{i:03}.jpg"),
                format!("https://example.com/{sequence_key}/{i}.jpg"),
                Some(1024),
            )
        })
        .collect()
}

// ==================== Basic Operations ====================

#[tokio::test]
async fn test_open_creates_store_at_conventional_path() {
    let (_store, location, temp_dir) = setup_store().await;

    let expected = temp_dir.path().join("cache").join(GROUP).join("cats.db");
    assert_eq!(location.db_path(), expected);
    assert!(location.exists());
}

#[tokio::test]
async fn test_insert_is_idempotent_and_keeps_first_values() {
    let (store, _location, _temp_dir) = setup_store().await;

    let first = NewTask::new(1, "a.jpg", "https://example.com/first", Some(10));
    let second = NewTask::new(2, "a.jpg", "https://example.com/second", Some(20));

    assert_eq!(store.insert_tasks(&[first]).await.expect("insert"), 1);
    assert_eq!(store.insert_tasks(&[second]).await.expect("insert"), 0);

    let pending = store
        .list_by_status(TaskStatus::Pending)
        .await
        .expect("list");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].source_locator, "https://example.com/first");
    assert_eq!(pending[0].sequence_key, 1);
    assert_eq!(pending[0].expected_size, Some(10));
}

#[tokio::test]
async fn test_duplicate_names_within_one_batch_insert_once() {
    let (store, _location, _temp_dir) = setup_store().await;

    let batch = vec![
        NewTask::new(1, "same.jpg", "https://example.com/1", None),
        NewTask::new(1, "same.jpg", "https://example.com/2", None),
        NewTask::new(1, "other.jpg", "https://example.com/3", None),
    ];
    assert_eq!(store.insert_tasks(&batch).await.expect("insert"), 2);
    assert_eq!(store.progress().await.expect("progress").total, 2);
}

#[tokio::test]
async fn test_claim_follows_sequence_then_name() {
    let (store, _location, _temp_dir) = setup_store().await;
    store
        .insert_tasks(&[
            NewTask::new(2, "a.jpg", "https://example.com/2a", None),
            NewTask::new(1, "b.jpg", "https://example.com/1b", None),
            NewTask::new(1, "a.jpg", "https://example.com/1a", None),
        ])
        .await
        .expect("insert");

    let mut order = Vec::new();
    while let Some(task) = store.claim_next("worker-1").await.expect("claim") {
        order.push((task.sequence_key, task.name));
    }
    assert_eq!(
        order,
        vec![
            (1, "a.jpg".to_string()),
            (1, "b.jpg".to_string()),
            (2, "a.jpg".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let (store, location, _temp_dir) = setup_store().await;
    store.insert_tasks(&tasks(1, 3)).await.expect("insert");
    store
        .set_metadata(keys::TOTAL_UNITS, "4")
        .await
        .expect("metadata");
    store.close().await;

    let reopened = TaskStore::open(&location, &StoreOptions::default())
        .await
        .expect("reopen");
    assert_eq!(reopened.progress().await.expect("progress").pending, 3);
    assert_eq!(
        reopened
            .get_metadata(keys::TOTAL_UNITS)
            .await
            .expect("metadata")
            .as_deref(),
        Some("4")
    );
}

// ==================== Concurrency ====================

#[tokio::test]
async fn test_concurrent_claims_hand_each_task_to_one_worker() {
    let (store, location, _temp_dir) = setup_store().await;
    store.insert_tasks(&tasks(1, 20)).await.expect("insert");
    store.insert_tasks(&tasks(2, 20)).await.expect("insert");

    let mut handles = Vec::new();
    for n in 1..=6 {
        let location = location.clone();
        handles.push(tokio::spawn(async move {
            let handle = TaskStore::open(&location, &StoreOptions::default())
                .await
                .expect("open");
            let worker_id = format!("worker-{n}");
            let mut claimed = Vec::new();
            while let Some(task) = handle.claim_next(&worker_id).await.expect("claim") {
                assert_eq!(task.owner.as_deref(), Some(worker_id.as_str()));
                claimed.push(task.id.clone());
                handle.mark_complete(&task.id).await.expect("complete");
            }
            handle.close().await;
            claimed
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.expect("join"));
    }
    let unique: HashSet<_> = all.iter().collect();

    assert_eq!(all.len(), 40, "every task claimed");
    assert_eq!(unique.len(), 40, "no task claimed twice");
    let progress = store.progress().await.expect("progress");
    assert_eq!(progress.completed, 40);
    assert_eq!(progress.in_progress, 0);
}

#[tokio::test]
async fn test_more_claimers_than_tasks() {
    let (store, location, _temp_dir) = setup_store().await;
    store.insert_tasks(&tasks(1, 3)).await.expect("insert");

    let mut handles = Vec::new();
    for n in 1..=8 {
        let location = location.clone();
        handles.push(tokio::spawn(async move {
            let handle = TaskStore::open(&location, &StoreOptions::default())
                .await
                .expect("open");
            let claimed = handle
                .claim_next(&format!("worker-{n}"))
                .await
                .expect("claim");
            handle.close().await;
            claimed.map(|task| task.id)
        }));
    }

    let mut claimed = Vec::new();
    let mut empty = 0;
    for handle in handles {
        match handle.await.expect("join") {
            Some(id) => claimed.push(id),
            None => empty += 1,
        }
    }

    assert_eq!(claimed.len(), 3);
    assert_eq!(claimed.iter().collect::<HashSet<_>>().len(), 3);
    assert_eq!(empty, 5);
    assert_eq!(store.progress().await.expect("progress").in_progress, 3);
}

#[tokio::test]
async fn test_claim_waits_out_a_held_write_lock() {
    let (store, location, _temp_dir) = setup_store().await;
    store.insert_tasks(&tasks(1, 1)).await.expect("insert");

    // No SQLite-level waiting, so contention surfaces as BUSY to the retry wrapper.
    let options = StoreOptions {
        database: DatabaseOptions {
            busy_timeout_ms: 0,
            ..DatabaseOptions::default()
        },
        ..StoreOptions::default()
    };
    let contender = TaskStore::open(&location, &options).await.expect("open");

    let url = format!("sqlite://{}", location.db_path().display());
    let mut locker = SqliteConnection::connect(&url).await.expect("connect");
    sqlx::query("BEGIN IMMEDIATE")
        .execute(&mut locker)
        .await
        .expect("lock");

    let claim = tokio::spawn(async move { contender.claim_next("worker-1").await });
    tokio::time::sleep(Duration::from_millis(300)).await;
    sqlx::query("COMMIT")
        .execute(&mut locker)
        .await
        .expect("unlock");

    let task = claim
        .await
        .expect("join")
        .expect("claim succeeds after retries")
        .expect("task available");
    assert_eq!(task.owner.as_deref(), Some("worker-1"));
    let progress = store.progress().await.expect("progress");
    assert_eq!(progress.in_progress, 1);
    assert_eq!(progress.pending, 0);
}

#[tokio::test]
async fn test_claim_gives_up_after_retry_budget() {
    let (store, location, _temp_dir) = setup_store().await;
    store.insert_tasks(&tasks(1, 1)).await.expect("insert");

    let options = StoreOptions {
        database: DatabaseOptions {
            busy_timeout_ms: 0,
            ..DatabaseOptions::default()
        },
        retry: RetryPolicy::linear(3, Duration::from_millis(10)),
    };
    let contender = TaskStore::open(&location, &options).await.expect("open");

    let url = format!("sqlite://{}", location.db_path().display());
    let mut locker = SqliteConnection::connect(&url).await.expect("connect");
    sqlx::query("BEGIN IMMEDIATE")
        .execute(&mut locker)
        .await
        .expect("lock");

    let err = contender
        .claim_next("worker-1")
        .await
        .expect_err("lock never released");
    assert!(err.is_retry_exhausted(), "unexpected error: {err}");
    if let StoreError::RetryExhausted { attempts, .. } = err {
        assert_eq!(attempts, 3);
    }

    sqlx::query("ROLLBACK")
        .execute(&mut locker)
        .await
        .expect("unlock");
    assert_eq!(store.progress().await.expect("progress").pending, 1);
}

// ==================== Recovery ====================

#[tokio::test]
async fn test_crashed_worker_task_is_reclaimed_after_reset() {
    let (store, location, _temp_dir) = setup_store().await;
    store.insert_tasks(&tasks(1, 2)).await.expect("insert");

    // worker-1 claims and "dies" without recording an outcome.
    let orphan = store
        .claim_next("worker-1")
        .await
        .expect("claim")
        .expect("task");
    store.close().await;

    let resumed = TaskStore::open(&location, &StoreOptions::default())
        .await
        .expect("reopen");
    assert_eq!(resumed.reset_in_progress().await.expect("reset"), 1);
    assert_eq!(resumed.progress().await.expect("progress").in_progress, 0);

    let reset = resumed.get(&orphan.id).await.expect("get").expect("row");
    assert_eq!(reset.status(), TaskStatus::Pending);
    assert!(reset.owner.is_none());

    let reclaimed = resumed
        .claim_next("worker-2")
        .await
        .expect("claim")
        .expect("task");
    assert_eq!(reclaimed.id, orphan.id);
    assert_eq!(reclaimed.owner.as_deref(), Some("worker-2"));

    resumed.mark_complete(&reclaimed.id).await.expect("complete");
    let done = resumed.get(&orphan.id).await.expect("get").expect("row");
    assert_eq!(done.status(), TaskStatus::Completed);
    assert!(done.completed_at.is_some());
}

#[tokio::test]
async fn test_marks_require_in_progress() {
    let (store, _location, _temp_dir) = setup_store().await;
    store.insert_tasks(&tasks(1, 1)).await.expect("insert");
    let pending = store
        .list_by_status(TaskStatus::Pending)
        .await
        .expect("list")
        .remove(0);

    let err = store.mark_complete(&pending.id).await.unwrap_err();
    assert!(matches!(err, StoreError::TaskNotClaimed(_)));

    let task = store.claim_next("worker-1").await.expect("claim").expect("task");
    store
        .mark_failed(&task.id, "HTTP 404", 1)
        .await
        .expect("fail");
    let failed = store.get(&task.id).await.expect("get").expect("row");
    assert_eq!(failed.status(), TaskStatus::Failed);
    assert_eq!(failed.last_error.as_deref(), Some("HTTP 404"));
    assert_eq!(failed.retry_count, 1);
    assert!(failed.owner.is_none());

    // A terminal task cannot be marked again.
    assert!(store.mark_complete(&task.id).await.is_err());
}

#[tokio::test]
async fn test_progress_is_conserved_through_lifecycle() {
    let (store, _location, _temp_dir) = setup_store().await;
    store.insert_tasks(&tasks(1, 6)).await.expect("insert");

    let check = |p: harvester_core::Progress| {
        assert_eq!(p.total, p.pending + p.in_progress + p.completed + p.failed);
    };
    check(store.progress().await.expect("progress"));

    let a = store.claim_next("w1").await.expect("claim").expect("task");
    let b = store.claim_next("w2").await.expect("claim").expect("task");
    let _c = store.claim_next("w3").await.expect("claim").expect("task");
    check(store.progress().await.expect("progress"));

    store.mark_complete(&a.id).await.expect("complete");
    store.mark_failed(&b.id, "boom", 3).await.expect("fail");
    let progress = store.progress().await.expect("progress");
    check(progress);
    assert_eq!(progress.completed, 1);
    assert_eq!(progress.failed, 1);
    assert_eq!(progress.in_progress, 1);
    assert_eq!(progress.pending, 3);

    store.reset_in_progress().await.expect("reset");
    check(store.progress().await.expect("progress"));
}

#[tokio::test]
async fn test_pipeline_finished_needs_flag_and_empty_queue() {
    let (store, _location, _temp_dir) = setup_store().await;
    store.insert_tasks(&tasks(1, 1)).await.expect("insert");

    assert!(!store.is_pipeline_finished().await.expect("finished"));
    store
        .set_metadata(keys::INGESTION_COMPLETE, "true")
        .await
        .expect("flag");
    assert!(!store.is_pipeline_finished().await.expect("finished"));

    let task = store.claim_next("w1").await.expect("claim").expect("task");
    assert!(!store.is_pipeline_finished().await.expect("finished"));

    store.mark_failed(&task.id, "gone", 3).await.expect("fail");
    assert!(store.is_pipeline_finished().await.expect("finished"));
}

#[tokio::test]
async fn test_initialize_clears_previous_run() {
    let (store, _location, _temp_dir) = setup_store().await;
    store.insert_tasks(&tasks(1, 4)).await.expect("insert");
    store
        .set_metadata(keys::INGESTION_COMPLETE, "true")
        .await
        .expect("flag");

    store.initialize().await.expect("initialize");

    assert_eq!(store.progress().await.expect("progress").total, 0);
    assert!(!store.has_sequence(1).await.expect("has_sequence"));
    assert!(!store.is_ingestion_complete().await.expect("flag"));
}

#[tokio::test]
async fn test_delete_removes_group_directory() {
    let (store, location, _temp_dir) = setup_store().await;
    store.insert_tasks(&tasks(1, 1)).await.expect("insert");

    store.delete().await.expect("delete");

    assert!(!location.exists());
    assert!(!location.dir().exists());
}
