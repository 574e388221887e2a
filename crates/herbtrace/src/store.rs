//! Persistence contract.
//!
//! The ledger talks to its backing store only through [`LedgerStore`], using
//! the flat record shapes below. Every call either succeeds or returns a
//! [`StorageError`]. The ledger does not assume a batch write and an event
//! write commit together; see [`crate::LedgerService::append`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::batch::Batch;
use crate::error::StorageError;
use crate::event::{Event, EventPayload, EventType};
use crate::stage::Stage;

/// Persisted batch row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub batch_id: String,
    pub herb_species: String,
    pub creator: String,
    pub current_status: Stage,
    /// Opaque summary document for outer surfaces.
    pub data: serde_json::Value,
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BatchRecord {
    pub fn from_batch(batch: &Batch) -> Self {
        BatchRecord {
            batch_id: batch.batch_id.clone(),
            herb_species: batch.species.clone(),
            creator: batch.creator.clone(),
            current_status: batch.current_stage,
            data: summary_data(batch),
            is_completed: batch.is_terminal,
            created_at: batch.created_at,
            updated_at: batch.updated_at,
        }
    }
}

/// Fields of a batch row that change after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchPatch {
    pub current_status: Stage,
    pub is_completed: bool,
    pub data: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

impl BatchPatch {
    pub fn from_batch(batch: &Batch) -> Self {
        BatchPatch {
            current_status: batch.current_stage,
            is_completed: batch.is_terminal,
            data: summary_data(batch),
            updated_at: batch.updated_at,
        }
    }
}

fn summary_data(batch: &Batch) -> serde_json::Value {
    serde_json::json!({
        "foundingEventId": batch.founding_event().map(|e| &e.event_id),
        "latestEventId": batch.latest_event().map(|e| &e.event_id),
        "eventCount": batch.events.len(),
    })
}

/// Persisted event row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: String,
    pub event_type: EventType,
    pub batch_id: String,
    pub parent_event_id: Option<String>,
    pub participant: String,
    pub organization: String,
    /// Payload fields without the type tag.
    pub data: serde_json::Value,
    pub integrity_tag: String,
    pub external_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl EventRecord {
    pub fn from_event(event: &Event) -> Result<Self, StorageError> {
        Ok(EventRecord {
            event_id: event.event_id.clone(),
            event_type: event.event_type(),
            batch_id: event.batch_id.clone(),
            parent_event_id: event.parent_event_id.clone(),
            participant: event.participant.clone(),
            organization: event.organization.clone(),
            data: event.payload.to_data()?,
            integrity_tag: event.integrity_tag.clone(),
            external_ref: event.external_ref.clone(),
            created_at: event.timestamp,
        })
    }
}

impl TryFrom<EventRecord> for Event {
    type Error = StorageError;

    fn try_from(record: EventRecord) -> Result<Self, Self::Error> {
        let payload = EventPayload::from_data(record.event_type, record.data).map_err(|e| {
            StorageError::Corrupt(format!(
                "event {} has {} data that does not decode: {e}",
                record.event_id,
                record.event_type.as_str()
            ))
        })?;

        Ok(Event {
            event_id: record.event_id,
            batch_id: record.batch_id,
            parent_event_id: record.parent_event_id,
            participant: record.participant,
            organization: record.organization,
            timestamp: record.created_at,
            payload,
            integrity_tag: record.integrity_tag,
            external_ref: record.external_ref,
        })
    }
}

/// Backing store used by the ledger.
///
/// Event listings (`get_events_by_batch`, `get_events_by_parent`,
/// `scan_events`) must come back in append order.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn save_batch(&self, record: &BatchRecord) -> Result<(), StorageError>;

    async fn get_batch(&self, batch_id: &str) -> Result<Option<BatchRecord>, StorageError>;

    async fn get_all_batches(&self) -> Result<Vec<BatchRecord>, StorageError>;

    async fn update_batch(&self, batch_id: &str, patch: &BatchPatch) -> Result<(), StorageError>;

    /// Saving an event id that already exists replaces the row in place.
    async fn save_event(&self, record: &EventRecord) -> Result<(), StorageError>;

    async fn get_events_by_batch(&self, batch_id: &str) -> Result<Vec<EventRecord>, StorageError>;

    async fn get_event(&self, event_id: &str) -> Result<Option<EventRecord>, StorageError>;

    async fn get_events_by_parent(
        &self,
        parent_event_id: &str,
    ) -> Result<Vec<EventRecord>, StorageError>;

    /// Every event in the store.
    async fn scan_events(&self) -> Result<Vec<EventRecord>, StorageError>;
}

// ============================================================================
// Timed handle
// ============================================================================

/// Shared store handle that bounds every call with a timeout and lifts rows
/// into the typed model.
pub(crate) struct StoreHandle<S> {
    store: Arc<S>,
    timeout: Duration,
}

impl<S> Clone for StoreHandle<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            timeout: self.timeout,
        }
    }
}

impl<S: LedgerStore> StoreHandle<S> {
    pub(crate) fn new(store: Arc<S>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub(crate) fn inner(&self) -> &Arc<S> {
        &self.store
    }

    /// Run one store call under the configured timeout.
    pub(crate) async fn call<T, F>(&self, op: &'static str, fut: F) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(op, timeout = ?self.timeout, "store call timed out");
                Err(StorageError::Timeout(self.timeout))
            }
        }
    }

    pub(crate) async fn event(&self, event_id: &str) -> Result<Option<Event>, StorageError> {
        let record = self.call("get_event", self.store.get_event(event_id)).await?;
        record.map(Event::try_from).transpose()
    }

    pub(crate) async fn events_of(&self, batch_id: &str) -> Result<Vec<Event>, StorageError> {
        let records = self
            .call("get_events_by_batch", self.store.get_events_by_batch(batch_id))
            .await?;
        records.into_iter().map(Event::try_from).collect()
    }

    /// Derive a batch from its stored events. `None` if it has none.
    pub(crate) async fn batch(&self, batch_id: &str) -> Result<Option<Batch>, StorageError> {
        let events = self.events_of(batch_id).await?;
        if events.is_empty() {
            return Ok(None);
        }
        Batch::from_events(events).map(Some).ok_or_else(|| {
            StorageError::Corrupt(format!(
                "batch {batch_id} has events but does not start with a collection"
            ))
        })
    }
}
