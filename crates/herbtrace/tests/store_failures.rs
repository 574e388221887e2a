//! Behavior when the backing store fails or stalls.

use std::time::Duration;

use herbtrace_core::{ErrorKind, LedgerBuilder, LedgerError, LedgerStore, Stage, StorageError};
use herbtrace_testing::{fixtures, flaky_ledger, FlakyStore, StoreOp};
use tokio::sync::broadcast::error::TryRecvError;

#[tokio::test]
async fn test_failed_event_write_changes_nothing() {
    let (ledger, store) = flaky_ledger();
    let mut rx = ledger.subscribe();
    store.fail_next(StoreOp::SaveEvent, 1);

    let err = ledger.append(fixtures::collection()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);
    assert!(err.is_retryable());

    assert_eq!(store.memory().event_count(), 0);
    assert_eq!(store.memory().batch_count(), 0);
    assert_eq!(store.call_count(StoreOp::SaveBatch), 0);
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn test_summary_update_retried_as_upsert() {
    let (ledger, store) = flaky_ledger();
    let founding = ledger.append(fixtures::collection()).await.unwrap();
    store.fail_next(StoreOp::UpdateBatch, 1);

    ledger
        .append(fixtures::passing_test(&founding.batch_id))
        .await
        .unwrap();

    let row = store
        .memory()
        .get_batch(&founding.batch_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.current_status, Stage::QualityTested);
    assert_eq!(store.call_count(StoreOp::UpdateBatch), 1);
    assert_eq!(store.call_count(StoreOp::SaveBatch), 2);
}

#[tokio::test]
async fn test_partial_write_is_repaired_by_next_append() {
    let (ledger, store) = flaky_ledger();
    let founding = ledger.append(fixtures::collection()).await.unwrap();
    let id = founding.batch_id.clone();

    let mut rx = ledger.subscribe();
    store.fail_next(StoreOp::UpdateBatch, 1);
    store.fail_next(StoreOp::SaveBatch, 1);
    let tested = ledger.append(fixtures::passing_test(&id)).await.unwrap();
    assert_eq!(rx.try_recv().unwrap().event_id(), tested.event_id);

    // The event is recorded and the derived view already reflects it.
    assert_eq!(store.memory().event_count(), 2);
    let batch = ledger.get_batch(&id).await.unwrap().unwrap();
    assert_eq!(batch.current_stage, Stage::QualityTested);

    // The summary row is stale until the next write.
    let row = store.memory().get_batch(&id).await.unwrap().unwrap();
    assert_eq!(row.current_status, Stage::Collected);

    // The stage is taken: a second quality test is a duplicate.
    let err = ledger.append(fixtures::passing_test(&id)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateStage);

    ledger.append(fixtures::processing(&id)).await.unwrap();
    let row = store.memory().get_batch(&id).await.unwrap().unwrap();
    assert_eq!(row.current_status, Stage::Processed);
}

#[tokio::test]
async fn test_missing_summary_row_rebuilt() {
    let (ledger, store) = flaky_ledger();
    store.fail_next(StoreOp::SaveBatch, 2);

    let event = ledger.append(fixtures::collection()).await.unwrap();
    assert_eq!(store.memory().event_count(), 1);
    assert_eq!(store.memory().batch_count(), 0);
    assert!(ledger.list_batches().await.unwrap().is_empty());
    assert!(ledger.get_batch(&event.batch_id).await.unwrap().is_some());

    let batch = ledger.rebuild_summary(&event.batch_id).await.unwrap();
    assert_eq!(batch.current_stage, Stage::Collected);
    assert_eq!(ledger.list_batches().await.unwrap().len(), 1);

    let err = ledger.rebuild_summary("HERB-0-0").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_store_calls_time_out() {
    let store = FlakyStore::new();
    let ledger = LedgerBuilder::new(store.clone())
        .with_store_timeout(Duration::from_millis(20))
        .build();
    store.stall(StoreOp::GetEventsByBatch, Duration::from_millis(500));

    let err = ledger.get_batch("HERB-1").await.unwrap_err();
    assert!(matches!(err, LedgerError::Storage(StorageError::Timeout(_))));
    assert!(err.is_retryable());

    store.clear_faults();
    assert!(ledger.get_batch("HERB-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_read_failures_surface_as_storage() {
    let (ledger, store) = flaky_ledger();
    let founding = ledger.append(fixtures::collection()).await.unwrap();

    store.fail_next(StoreOp::GetEvent, 1);
    let err = ledger.resolve(&founding.event_id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);

    store.fail_next(StoreOp::ScanEvents, 1);
    let err = ledger.resolve("no-such-token").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);

    assert!(ledger.resolve(&founding.event_id).await.is_ok());
}
