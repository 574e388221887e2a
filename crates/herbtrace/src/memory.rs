//! In-process [`LedgerStore`] backed by concurrent maps.
//!
//! Used by tests, demos, and single-process deployments. Append order is kept
//! with a monotonically increasing sequence number per row.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::StorageError;
use crate::store::{BatchPatch, BatchRecord, EventRecord, LedgerStore};

#[derive(Debug, Clone)]
struct Sequenced<T> {
    seq: u64,
    record: T,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    seq: AtomicU64,
    batches: DashMap<String, Sequenced<BatchRecord>>,
    events: DashMap<String, Sequenced<EventRecord>>,
    by_batch: DashMap<String, Vec<String>>,
    by_parent: DashMap<String, Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    fn collect(&self, ids: &[String]) -> Vec<EventRecord> {
        ids.iter()
            .filter_map(|id| self.events.get(id).map(|e| e.record.clone()))
            .collect()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn save_batch(&self, record: &BatchRecord) -> Result<(), StorageError> {
        let seq = match self.batches.get(&record.batch_id) {
            Some(existing) => existing.seq,
            None => self.next_seq(),
        };
        self.batches.insert(
            record.batch_id.clone(),
            Sequenced {
                seq,
                record: record.clone(),
            },
        );
        Ok(())
    }

    async fn get_batch(&self, batch_id: &str) -> Result<Option<BatchRecord>, StorageError> {
        Ok(self.batches.get(batch_id).map(|b| b.record.clone()))
    }

    async fn get_all_batches(&self) -> Result<Vec<BatchRecord>, StorageError> {
        let mut rows: Vec<Sequenced<BatchRecord>> =
            self.batches.iter().map(|b| b.value().clone()).collect();
        rows.sort_by_key(|b| b.seq);
        Ok(rows.into_iter().map(|b| b.record).collect())
    }

    async fn update_batch(&self, batch_id: &str, patch: &BatchPatch) -> Result<(), StorageError> {
        let mut row = self
            .batches
            .get_mut(batch_id)
            .ok_or_else(|| StorageError::message(format!("no batch row for {batch_id}")))?;
        row.record.current_status = patch.current_status;
        row.record.is_completed = patch.is_completed;
        row.record.data = patch.data.clone();
        row.record.updated_at = patch.updated_at;
        Ok(())
    }

    async fn save_event(&self, record: &EventRecord) -> Result<(), StorageError> {
        if let Some(mut existing) = self.events.get_mut(&record.event_id) {
            existing.record = record.clone();
            return Ok(());
        }

        let seq = self.next_seq();
        self.events.insert(
            record.event_id.clone(),
            Sequenced {
                seq,
                record: record.clone(),
            },
        );
        self.by_batch
            .entry(record.batch_id.clone())
            .or_default()
            .push(record.event_id.clone());
        if let Some(parent) = &record.parent_event_id {
            self.by_parent
                .entry(parent.clone())
                .or_default()
                .push(record.event_id.clone());
        }
        Ok(())
    }

    async fn get_events_by_batch(&self, batch_id: &str) -> Result<Vec<EventRecord>, StorageError> {
        let ids = self
            .by_batch
            .get(batch_id)
            .map(|ids| ids.value().clone())
            .unwrap_or_default();
        Ok(self.collect(&ids))
    }

    async fn get_event(&self, event_id: &str) -> Result<Option<EventRecord>, StorageError> {
        Ok(self.events.get(event_id).map(|e| e.record.clone()))
    }

    async fn get_events_by_parent(
        &self,
        parent_event_id: &str,
    ) -> Result<Vec<EventRecord>, StorageError> {
        let ids = self
            .by_parent
            .get(parent_event_id)
            .map(|ids| ids.value().clone())
            .unwrap_or_default();
        Ok(self.collect(&ids))
    }

    async fn scan_events(&self) -> Result<Vec<EventRecord>, StorageError> {
        let mut rows: Vec<Sequenced<EventRecord>> =
            self.events.iter().map(|e| e.value().clone()).collect();
        rows.sort_by_key(|e| e.seq);
        Ok(rows.into_iter().map(|e| e.record).collect())
    }
}
