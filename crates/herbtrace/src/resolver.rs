//! Token → batch resolution.
//!
//! A token may be a batch id, an event id, or a fragment carried by an old
//! single-id tracking code. Steps run in order and the first hit wins:
//!
//! 1. batch id lookup
//! 2. event id lookup, answering with the owning batch
//! 3. legacy fallback, governed by [`LegacyMatch`]
//!
//! Resolution never writes.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::batch::Batch;
use crate::config::LegacyMatch;
use crate::error::{LedgerError, Result};
use crate::event::Event;
use crate::store::{LedgerStore, StoreHandle};

/// Which step produced a [`Resolution`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "via", rename_all = "snake_case")]
pub enum ResolvedVia {
    BatchId,
    EventId,
    /// Legacy fallback: `event_id` names the token as its parent.
    ParentEvent { event_id: String },
    /// Legacy fallback: `event_id` contains the token.
    IdFragment { event_id: String },
}

impl ResolvedVia {
    pub fn is_legacy(&self) -> bool {
        matches!(
            self,
            ResolvedVia::ParentEvent { .. } | ResolvedVia::IdFragment { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub batch: Batch,
    pub via: ResolvedVia,
}

impl Resolution {
    /// The batch's full chain of custody, in append order.
    pub fn events(&self) -> &[Event] {
        &self.batch.events
    }

    pub fn into_parts(self) -> (Batch, Vec<Event>) {
        let events = self.batch.events.clone();
        (self.batch, events)
    }
}

pub struct Resolver<S> {
    store: StoreHandle<S>,
    legacy_match: LegacyMatch,
}

impl<S> Clone for Resolver<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            legacy_match: self.legacy_match,
        }
    }
}

impl<S: LedgerStore> Resolver<S> {
    pub(crate) fn new(store: StoreHandle<S>, legacy_match: LegacyMatch) -> Self {
        Self {
            store,
            legacy_match,
        }
    }

    pub fn legacy_match(&self) -> LegacyMatch {
        self.legacy_match
    }

    pub async fn resolve(&self, token: &str) -> Result<Resolution> {
        let token = token.trim();
        if token.is_empty() {
            return Err(LedgerError::token_not_found(token));
        }

        if let Some(batch) = self.store.batch(token).await? {
            debug!(token, "resolved as batch id");
            return Ok(Resolution {
                batch,
                via: ResolvedVia::BatchId,
            });
        }

        if let Some(event) = self.store.event(token).await? {
            match self.store.batch(&event.batch_id).await? {
                Some(batch) => {
                    debug!(token, batch_id = %batch.batch_id, "resolved as event id");
                    return Ok(Resolution {
                        batch,
                        via: ResolvedVia::EventId,
                    });
                }
                None => {
                    warn!(token, batch_id = %event.batch_id, "event points at a batch with no events");
                }
            }
        }

        match self.legacy(token).await? {
            Some(resolution) => {
                warn!(token, via = ?resolution.via, batch_id = %resolution.batch.batch_id, "resolved through legacy fallback");
                Ok(resolution)
            }
            None => Err(LedgerError::token_not_found(token)),
        }
    }

    /// Resolve an exact event id to its owning batch. No batch-id lookup and
    /// no legacy fallback.
    pub async fn resolve_event(&self, event_id: &str) -> Result<Resolution> {
        let event_id = event_id.trim();
        let event = match self.store.event(event_id).await? {
            Some(event) if !event_id.is_empty() => event,
            _ => return Err(LedgerError::event_not_found(event_id)),
        };

        match self.store.batch(&event.batch_id).await? {
            Some(batch) => Ok(Resolution {
                batch,
                via: ResolvedVia::EventId,
            }),
            None => {
                warn!(event_id, batch_id = %event.batch_id, "event points at a batch with no events");
                Err(LedgerError::event_not_found(event_id))
            }
        }
    }

    async fn legacy(&self, token: &str) -> Result<Option<Resolution>> {
        let store = self.store.inner();
        let candidates = match self.legacy_match {
            LegacyMatch::ParentOnly => {
                self.store
                    .call("get_events_by_parent", store.get_events_by_parent(token))
                    .await?
            }
            LegacyMatch::ParentOrSubstring => {
                self.store
                    .call("scan_events", store.scan_events())
                    .await?
                    .into_iter()
                    .filter(|e| {
                        e.parent_event_id.as_deref() == Some(token) || e.event_id.contains(token)
                    })
                    .collect()
            }
        };

        let mut tried = HashSet::new();
        for record in candidates {
            if !tried.insert(record.batch_id.clone()) {
                continue;
            }
            if let Some(batch) = self.store.batch(&record.batch_id).await? {
                let via = if record.parent_event_id.as_deref() == Some(token) {
                    ResolvedVia::ParentEvent {
                        event_id: record.event_id,
                    }
                } else {
                    ResolvedVia::IdFragment {
                        event_id: record.event_id,
                    }
                };
                return Ok(Some(Resolution { batch, via }));
            }
        }

        Ok(None)
    }
}
