//! Testing utilities for herbtrace.
//!
//! - [`fixtures`]: ready-made drafts for each step of the chain of custody
//! - [`FlakyStore`]: a [`MemoryStore`] wrapper that fails or stalls on demand
//! - [`memory_ledger`] / [`flaky_ledger`]: ledgers wired to those stores

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use herbtrace_core::{
    BatchPatch, BatchRecord, EventRecord, LedgerBuilder, LedgerService, LedgerStore, MemoryStore,
    StorageError,
};

pub mod fixtures;

/// A ledger over a fresh in-memory store.
pub fn memory_ledger() -> LedgerService<MemoryStore> {
    LedgerBuilder::new(MemoryStore::new()).build()
}

/// A ledger over a fresh [`FlakyStore`], plus a handle to steer it.
pub fn flaky_ledger() -> (LedgerService<FlakyStore>, FlakyStore) {
    let store = FlakyStore::new();
    let ledger = LedgerBuilder::new(store.clone()).build();
    (ledger, store)
}

/// Random token of ASCII letters, digits and `-`, for round-trip checks.
pub fn random_token(len: usize) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-";
    (0..len.max(1))
        .map(|_| ALPHABET[fastrand::usize(..ALPHABET.len())] as char)
        .collect()
}

// ============================================================================
// Failure injection
// ============================================================================

/// Store operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    SaveBatch,
    GetBatch,
    GetAllBatches,
    UpdateBatch,
    SaveEvent,
    GetEventsByBatch,
    GetEvent,
    GetEventsByParent,
    ScanEvents,
}

/// [`MemoryStore`] wrapper with scripted failures.
///
/// Clones share state, so a test can keep one handle while the ledger owns
/// another.
#[derive(Clone, Default)]
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    failures: Arc<Mutex<HashMap<StoreOp, usize>>>,
    stalls: Arc<Mutex<HashMap<StoreOp, Duration>>>,
    calls: Arc<Mutex<Vec<StoreOp>>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` calls of `op` fail with a backend error.
    pub fn fail_next(&self, op: StoreOp, times: usize) {
        self.failures.lock().unwrap().insert(op, times);
    }

    /// Delay every call of `op` by `delay`.
    pub fn stall(&self, op: StoreOp, delay: Duration) {
        self.stalls.lock().unwrap().insert(op, delay);
    }

    pub fn clear_faults(&self) {
        self.failures.lock().unwrap().clear();
        self.stalls.lock().unwrap().clear();
    }

    /// Every operation seen so far, in call order.
    pub fn calls(&self) -> Vec<StoreOp> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, op: StoreOp) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == op).count()
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.inner
    }

    async fn enter(&self, op: StoreOp) -> Result<(), StorageError> {
        self.calls.lock().unwrap().push(op);

        let stall = self.stalls.lock().unwrap().get(&op).copied();
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }

        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(&op) {
            Some(left) if *left > 0 => {
                *left -= 1;
                Err(StorageError::message(format!("injected {op:?} failure")))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl LedgerStore for FlakyStore {
    async fn save_batch(&self, record: &BatchRecord) -> Result<(), StorageError> {
        self.enter(StoreOp::SaveBatch).await?;
        self.inner.save_batch(record).await
    }

    async fn get_batch(&self, batch_id: &str) -> Result<Option<BatchRecord>, StorageError> {
        self.enter(StoreOp::GetBatch).await?;
        self.inner.get_batch(batch_id).await
    }

    async fn get_all_batches(&self) -> Result<Vec<BatchRecord>, StorageError> {
        self.enter(StoreOp::GetAllBatches).await?;
        self.inner.get_all_batches().await
    }

    async fn update_batch(&self, batch_id: &str, patch: &BatchPatch) -> Result<(), StorageError> {
        self.enter(StoreOp::UpdateBatch).await?;
        self.inner.update_batch(batch_id, patch).await
    }

    async fn save_event(&self, record: &EventRecord) -> Result<(), StorageError> {
        self.enter(StoreOp::SaveEvent).await?;
        self.inner.save_event(record).await
    }

    async fn get_events_by_batch(&self, batch_id: &str) -> Result<Vec<EventRecord>, StorageError> {
        self.enter(StoreOp::GetEventsByBatch).await?;
        self.inner.get_events_by_batch(batch_id).await
    }

    async fn get_event(&self, event_id: &str) -> Result<Option<EventRecord>, StorageError> {
        self.enter(StoreOp::GetEvent).await?;
        self.inner.get_event(event_id).await
    }

    async fn get_events_by_parent(
        &self,
        parent_event_id: &str,
    ) -> Result<Vec<EventRecord>, StorageError> {
        self.enter(StoreOp::GetEventsByParent).await?;
        self.inner.get_events_by_parent(parent_event_id).await
    }

    async fn scan_events(&self) -> Result<Vec<EventRecord>, StorageError> {
        self.enter(StoreOp::ScanEvents).await?;
        self.inner.scan_events().await
    }
}
