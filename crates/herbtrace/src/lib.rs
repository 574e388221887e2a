//! # Herbtrace
//!
//! An append-only provenance ledger for botanical batches. Each batch moves
//! through a fixed chain of custody and every step is recorded as an
//! immutable event:
//!
//! ```text
//! COLLECTION ──► QUALITY_TEST ──► PROCESSING ──► MANUFACTURING
//!  Collected      QualityTested     Processed      Manufactured (terminal)
//! ```
//!
//! ## Architecture
//!
//! ```text
//! EventDraft
//!     │
//!     ▼ append()
//! LedgerService ──► StageGate.can_transition()   (pure, no IO)
//!     │                 │
//!     │                 ├─► Err(Rejection) ─► LedgerError::Rejected
//!     │                 │
//!     │                 └─► Ok(next stage)
//!     │
//!     ├─► LedgerStore.save_event()
//!     ├─► LedgerStore.save_batch() / update_batch()   (summary row)
//!     └─► ChangeBus.emit(LedgerChange) ───────► subscribers
//!
//! scanned text
//!     │
//!     ▼ decode()
//! TrackingCodec.parse() ──► Resolver.resolve() ──► Batch + events
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Events are facts** - Never edited or deleted once stored
//! 2. **Stages only move forward** - One event per type, in chain order
//! 3. **Manufactured is terminal** - Nothing is appended after it
//! 4. **Summaries are derived** - A batch's stage is always recomputed from its events
//! 5. **The gate is pure** - No IO, no async, trivially testable
//!
//! ## Guarantees
//!
//! - **Event first**: the event row is written before the summary row, and an
//!   append succeeds once the event is recorded. A failed summary write is
//!   logged; the next append or [`LedgerService::rebuild_summary`] repairs it.
//! - **No cross-writer locking**: two writers racing on the same batch can
//!   both pass the gate.
//! - **At-most-once notifications**: slow subscribers may miss changes.
//!
//! ## Example
//!
//! ```ignore
//! use herbtrace_core::{CollectionData, EventDraft, LedgerBuilder, MemoryStore, RenderStyle};
//!
//! let ledger = LedgerBuilder::new(MemoryStore::new())
//!     .with_origin("https://trace.example")
//!     .build();
//!
//! let founding = ledger
//!     .append(EventDraft::collection("Ravi Kumar", CollectionData {
//!         herb_species: "Ashwagandha".into(),
//!         weight: 25.0,
//!         location: None,
//!         quality_grade: Some("A".into()),
//!         notes: None,
//!     }))
//!     .await?;
//!
//! let code = ledger.tracking_code(&founding, RenderStyle::Label)?;
//! let scanned = ledger.scan(&code.tracking_text).await?;
//! assert_eq!(scanned.batch.batch_id, founding.batch_id);
//! ```

mod batch;
mod bus;
mod config;
mod error;
mod event;
mod id;
mod ledger;
mod memory;
mod quality;
mod report;
mod resolver;
mod stage;
mod store;

pub mod integrity;
pub mod metadata;
pub mod tracking;

// Core model
pub use batch::Batch;
pub use event::{
    CollectionData, Event, EventDraft, EventPayload, EventType, GeoLocation, ManufacturingData,
    ProcessingData, QualityTestData,
};
pub use stage::{Rejection, Stage, StageGate};

// Errors
pub use error::{ErrorKind, LedgerError, Result, StorageError, Subject};

// Persistence
pub use memory::MemoryStore;
pub use store::{BatchPatch, BatchRecord, EventRecord, LedgerStore};

// Service
pub use bus::{ChangeBus, LedgerChange, DEFAULT_BUS_CAPACITY};
pub use config::{LedgerConfig, LegacyMatch, DEFAULT_ORIGIN};
pub use id::{IdGenerator, BATCH_PREFIX};
pub use ledger::{LedgerBuilder, LedgerService};
pub use resolver::{Resolution, ResolvedVia, Resolver};

// Consumer views
pub use metadata::{MemoryMetadataStore, MetadataDocument, MetadataStore};
pub use quality::{QualityAssessment, QualityStatus, QualityThresholds};
pub use report::{ProvenanceReport, LEDGER_CERTIFICATION, PREMIUM_CERTIFICATION};
pub use tracking::{
    PayloadFormat, RenderStyle, RenderableCode, ScanTarget, ScannedPayload, TrackingCode,
    TrackingCodec,
};

// Re-export async_trait for store implementors
pub use async_trait::async_trait;
