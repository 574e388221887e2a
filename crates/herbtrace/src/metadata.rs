//! Off-ledger metadata documents.
//!
//! Forms attach rich documents (photos, lab reports, weather snapshots) to an
//! event by storing them here first and passing the returned reference as the
//! draft's `external_ref`. The ledger never reads these documents.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataDocument {
    pub reference: String,
    /// Free-form label such as `collection` or `lab-report`.
    pub kind: String,
    pub document: serde_json::Value,
    pub stored_at: DateTime<Utc>,
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Store a document and return its reference.
    async fn put(&self, kind: &str, document: serde_json::Value) -> Result<String, StorageError>;

    async fn get(&self, reference: &str) -> Result<Option<MetadataDocument>, StorageError>;
}

/// `meta-<uuid>` reference.
pub fn new_reference() -> String {
    format!("meta-{}", Uuid::new_v4().simple())
}

#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    docs: DashMap<String, MetadataDocument>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn put(&self, kind: &str, document: serde_json::Value) -> Result<String, StorageError> {
        let reference = new_reference();
        self.docs.insert(
            reference.clone(),
            MetadataDocument {
                reference: reference.clone(),
                kind: kind.to_string(),
                document,
                stored_at: Utc::now(),
            },
        );
        Ok(reference)
    }

    async fn get(&self, reference: &str) -> Result<Option<MetadataDocument>, StorageError> {
        Ok(self.docs.get(reference).map(|d| d.value().clone()))
    }
}
