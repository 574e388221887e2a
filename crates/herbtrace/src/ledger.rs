//! The event ledger: system of record for batches and their events.
//!
//! [`LedgerService`] is constructed once (via [`LedgerBuilder`]) and shared by
//! clone. Every query reads through to the backing store, so two services over
//! the same store see each other's writes on their next call.
//!
//! # Consistency
//!
//! There is no lock around append. Two writers that append the same stage to
//! the same batch concurrently can both pass the gate. The store contract
//! doesn't offer compare-and-set, and the ledger does not pretend otherwise.

use std::sync::Arc;

use chrono::{SubsecRound, Utc};
use futures::future::try_join_all;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::batch::Batch;
use crate::bus::{ChangeBus, LedgerChange};
use crate::config::{normalize_origin, LedgerConfig, LegacyMatch};
use crate::error::{LedgerError, Result, StorageError};
use crate::event::{Event, EventDraft, EventType};
use crate::id::IdGenerator;
use crate::integrity::event_tag;
use crate::quality::QualityThresholds;
use crate::report::ProvenanceReport;
use crate::resolver::{Resolution, Resolver};
use crate::stage::StageGate;
use crate::store::{BatchPatch, BatchRecord, EventRecord, LedgerStore, StoreHandle};
use crate::tracking::{RenderStyle, ScanTarget, TrackingCode, TrackingCodec};

/// Builder for [`LedgerService`].
///
/// ```ignore
/// let ledger = LedgerBuilder::new(MemoryStore::new())
///     .with_origin("https://trace.example")
///     .with_legacy_match(LegacyMatch::ParentOnly)
///     .build();
/// ```
pub struct LedgerBuilder<S> {
    store: Arc<S>,
    config: LedgerConfig,
    bus: Option<ChangeBus>,
}

impl<S: LedgerStore + 'static> LedgerBuilder<S> {
    pub fn new(store: S) -> Self {
        Self::from_arc(Arc::new(store))
    }

    /// Share a store that is also used elsewhere.
    pub fn from_arc(store: Arc<S>) -> Self {
        Self {
            store,
            config: LedgerConfig::default(),
            bus: None,
        }
    }

    pub fn with_config(mut self, config: LedgerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_origin(mut self, origin: impl AsRef<str>) -> Self {
        self.config.origin = normalize_origin(origin.as_ref());
        self
    }

    pub fn with_store_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config.store_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_legacy_match(mut self, mode: LegacyMatch) -> Self {
        self.config.legacy_match = mode;
        self
    }

    pub fn with_bus_capacity(mut self, capacity: usize) -> Self {
        self.config.bus_capacity = capacity;
        self
    }

    pub fn with_quality_thresholds(mut self, thresholds: QualityThresholds) -> Self {
        self.config.quality = thresholds;
        self
    }

    /// Publish changes on an existing bus, e.g. one shared with another ledger.
    pub fn with_bus(mut self, bus: ChangeBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn build(self) -> LedgerService<S> {
        let config = self.config;
        let store = StoreHandle::new(self.store, config.store_timeout());
        let bus = self
            .bus
            .unwrap_or_else(|| ChangeBus::with_capacity(config.bus_capacity));

        LedgerService {
            resolver: Resolver::new(store.clone(), config.legacy_match),
            codec: TrackingCodec::new(&config.origin),
            store,
            gate: StageGate::new(),
            ids: IdGenerator::new(),
            bus,
            config: Arc::new(config),
        }
    }
}

pub struct LedgerService<S> {
    store: StoreHandle<S>,
    resolver: Resolver<S>,
    codec: TrackingCodec,
    gate: StageGate,
    ids: IdGenerator,
    bus: ChangeBus,
    config: Arc<LedgerConfig>,
}

impl<S> Clone for LedgerService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            resolver: self.resolver.clone(),
            codec: self.codec.clone(),
            gate: self.gate,
            ids: self.ids,
            bus: self.bus.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S: LedgerStore + 'static> LedgerService<S> {
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        self.store.inner()
    }

    pub fn resolver(&self) -> &Resolver<S> {
        &self.resolver
    }

    pub fn codec(&self) -> &TrackingCodec {
        &self.codec
    }

    pub fn bus(&self) -> &ChangeBus {
        &self.bus
    }

    /// Opt in to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerChange> {
        self.bus.subscribe()
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Append an event.
    ///
    /// A collection draft founds a new batch (generating its id when the draft
    /// has none). Any other draft must name an existing batch. The stage gate
    /// decides; on rejection nothing is written and the gate's reason is
    /// returned as [`LedgerError::Rejected`].
    ///
    /// Writes happen in two store calls: the event row, then the batch
    /// summary row. Once the event row is written the append has happened:
    /// the summary write is attempted
    /// [`LedgerConfig::summary_write_attempts`] times, and if every attempt
    /// fails the event is still returned. The stale summary row is repaired by
    /// the next append or by [`LedgerService::rebuild_summary`].
    ///
    /// Payload numbers must be finite.
    pub async fn append(&self, draft: EventDraft) -> Result<Event> {
        let event_type = draft.event_type();
        let batch_id = self.target_batch(&draft)?;

        if draft.participant.trim().is_empty() {
            return Err(LedgerError::InvalidDraft("participant is required".into()));
        }

        if let Some(field) = draft.payload.non_finite_field() {
            return Err(LedgerError::InvalidDraft(format!(
                "{field} must be a finite number"
            )));
        }

        let existing = self.store.batch(&batch_id).await?;
        if existing.is_none() && event_type != EventType::Collection {
            return Err(LedgerError::batch_not_found(batch_id));
        }

        let current = existing.as_ref().map(|b| b.current_stage);
        let next = self
            .gate
            .can_transition(current, event_type)
            .map_err(|reason| {
                warn!(batch_id = %batch_id, ?event_type, %reason, "append rejected");
                LedgerError::Rejected {
                    batch_id: batch_id.clone(),
                    reason,
                }
            })?;

        let event = self.seal(draft, batch_id, existing.as_ref());
        if self.store.event(&event.event_id).await?.is_some() {
            return Err(LedgerError::InvalidDraft(format!(
                "event id {} is already recorded",
                event.event_id
            )));
        }
        let record = EventRecord::from_event(&event)?;
        self.store
            .call("save_event", self.store.inner().save_event(&record))
            .await?;

        let created = existing.is_none();
        let mut events = existing.map(|b| b.events).unwrap_or_default();
        events.push(event.clone());
        let batch = Batch::from_events(events).ok_or_else(|| {
            StorageError::Corrupt(format!("batch {} lost its founding event", event.batch_id))
        })?;
        debug_assert_eq!(batch.current_stage, next);

        if let Err(e) = self.write_summary(&batch, created).await {
            warn!(batch_id = %batch.batch_id, event_id = %event.event_id, error = %e, "event recorded with a stale batch summary");
        }

        if created {
            info!(batch_id = %batch.batch_id, event_id = %event.event_id, species = %batch.species, "batch created");
            self.bus.emit(LedgerChange::BatchCreated {
                batch_id: batch.batch_id.clone(),
                event_id: event.event_id.clone(),
                species: batch.species.clone(),
            });
        } else {
            info!(batch_id = %batch.batch_id, event_id = %event.event_id, ?event_type, stage = %next, "event appended");
            self.bus.emit(LedgerChange::EventAppended {
                batch_id: batch.batch_id.clone(),
                event_id: event.event_id.clone(),
                event_type,
                stage: next,
            });
        }

        Ok(event)
    }

    /// Would an event of `event_type` be accepted for `batch_id` right now?
    ///
    /// Pass `None` to ask whether a new batch can be founded.
    pub async fn can_append(&self, batch_id: Option<&str>, event_type: EventType) -> Result<()> {
        let current = match batch_id {
            Some(id) => match self.store.batch(id).await? {
                Some(batch) => Some(batch.current_stage),
                None if event_type == EventType::Collection => None,
                None => return Err(LedgerError::batch_not_found(id)),
            },
            None => None,
        };

        self.gate
            .can_transition(current, event_type)
            .map(|_| ())
            .map_err(|reason| LedgerError::Rejected {
                batch_id: batch_id.unwrap_or_default().to_string(),
                reason,
            })
    }

    /// Re-derive a batch from its events and upsert its summary row.
    pub async fn rebuild_summary(&self, batch_id: &str) -> Result<Batch> {
        let batch = self
            .store
            .batch(batch_id)
            .await?
            .ok_or_else(|| LedgerError::batch_not_found(batch_id))?;
        self.store
            .call(
                "save_batch",
                self.store.inner().save_batch(&BatchRecord::from_batch(&batch)),
            )
            .await?;
        info!(batch_id, stage = %batch.current_stage, "batch summary rebuilt");
        Ok(batch)
    }

    fn target_batch(&self, draft: &EventDraft) -> Result<String> {
        match draft.batch_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => Ok(id.to_string()),
            _ if draft.event_type() == EventType::Collection => Ok(self.ids.new_batch_id()),
            _ => Err(LedgerError::InvalidDraft(format!(
                "{} events must name a batch",
                draft.event_type()
            ))),
        }
    }

    /// Turn an accepted draft into the event that gets stored.
    fn seal(&self, draft: EventDraft, batch_id: String, batch: Option<&Batch>) -> Event {
        let event_type = draft.event_type();

        // Keep timestamps non-decreasing within a batch even if the clock steps back.
        // Microseconds are the finest precision every store keeps.
        let now = Utc::now().trunc_subsecs(6);
        let timestamp = batch.map_or(now, |b| now.max(b.updated_at.trunc_subsecs(6)));

        let mut event = Event {
            event_id: draft
                .event_id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| self.ids.new_event_id(event_type)),
            batch_id,
            parent_event_id: draft.parent_event_id,
            participant: draft.participant.trim().to_string(),
            organization: draft
                .organization
                .unwrap_or_else(|| event_type.default_organization().to_string()),
            timestamp,
            payload: draft.payload,
            integrity_tag: String::new(),
            external_ref: draft.external_ref,
        };
        event.integrity_tag = event_tag(&event);
        event
    }

    async fn write_summary(&self, batch: &Batch, created: bool) -> Result<()> {
        let attempts = self.config.summary_write_attempts.max(1);
        let store = self.store.inner();
        let mut last_err = None;

        for attempt in 1..=attempts {
            // Retries upsert the whole row, which also repairs a row lost to
            // an earlier partial write.
            let result = if created || attempt > 1 {
                self.store
                    .call("save_batch", store.save_batch(&BatchRecord::from_batch(batch)))
                    .await
            } else {
                self.store
                    .call(
                        "update_batch",
                        store.update_batch(&batch.batch_id, &BatchPatch::from_batch(batch)),
                    )
                    .await
            };

            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(batch_id = %batch.batch_id, attempt, error = %e, "batch summary write failed");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| StorageError::message("batch summary write failed"))
            .into())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn get_batch(&self, batch_id: &str) -> Result<Option<Batch>> {
        Ok(self.store.batch(batch_id).await?)
    }

    pub async fn get_event(&self, event_id: &str) -> Result<Option<Event>> {
        Ok(self.store.event(event_id).await?)
    }

    /// All batches with a summary row, in store order. Callers wanting
    /// latest-first sort by `updated_at` themselves.
    pub async fn list_batches(&self) -> Result<Vec<Batch>> {
        let rows = self
            .store
            .call("get_all_batches", self.store.inner().get_all_batches())
            .await?;

        let loaded = try_join_all(rows.iter().map(|row| self.store.batch(&row.batch_id))).await?;

        Ok(rows
            .iter()
            .zip(loaded)
            .filter_map(|(row, batch)| {
                if batch.is_none() {
                    warn!(batch_id = %row.batch_id, "summary row without events");
                }
                batch
            })
            .collect())
    }

    /// Every event across all batches, most recent first.
    pub async fn audit_trail(&self, limit: Option<usize>) -> Result<Vec<Event>> {
        let records = self
            .store
            .call("scan_events", self.store.inner().scan_events())
            .await?;
        let limit = limit.unwrap_or(usize::MAX);

        records
            .into_iter()
            .rev()
            .take(limit)
            .map(|r| Event::try_from(r).map_err(LedgerError::from))
            .collect()
    }

    pub async fn resolve(&self, token: &str) -> Result<Resolution> {
        self.resolver.resolve(token).await
    }

    pub async fn report(&self, token: &str) -> Result<ProvenanceReport> {
        let resolution = self.resolve(token).await?;
        ProvenanceReport::from_batch(&resolution.batch, &self.config.quality).ok_or_else(|| {
            StorageError::Corrupt(format!("batch {} has no events", resolution.batch.batch_id))
                .into()
        })
    }

    // ========================================================================
    // Tracking codes
    // ========================================================================

    pub fn tracking_code(&self, event: &Event, style: RenderStyle) -> Result<TrackingCode> {
        self.codec.encode_event(event, style)
    }

    pub async fn decode(&self, scanned: &str) -> Result<ScanTarget> {
        let target = self.codec.decode(scanned, &self.resolver).await?;
        debug!(event_id = %target.event_id, batch_id = ?target.batch_id, "scan decoded");
        Ok(target)
    }

    /// Decode scanned text and return the batch it leads to.
    pub async fn scan(&self, scanned: &str) -> Result<Resolution> {
        let target = self.decode(scanned).await?;
        match target.batch_id {
            Some(batch_id) => self.resolve(&batch_id).await,
            None => Err(LedgerError::token_not_found(target.event_id)),
        }
    }
}
