//! Batch summaries.
//!
//! A [`Batch`] is never written directly. It is derived from its events: the
//! founding collection supplies species, creator and creation time; the set of
//! recorded event types supplies the stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{Event, EventType};
use crate::stage::Stage;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub batch_id: String,
    pub species: String,
    /// Participant of the founding collection event.
    pub creator: String,
    pub current_stage: Stage,
    pub is_terminal: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Append order. Never re-sorted.
    pub events: Vec<Event>,
}

impl Batch {
    /// Derive the summary from a batch's events in append order.
    ///
    /// Returns `None` unless the first event is the founding collection.
    pub fn from_events(events: Vec<Event>) -> Option<Self> {
        let founding = events.first()?;
        let collection = founding.payload.as_collection()?;

        let current_stage = Stage::from_event_types(events.iter().map(Event::event_type))?;
        let updated_at = events
            .iter()
            .map(|e| e.timestamp)
            .max()
            .unwrap_or(founding.timestamp);

        Some(Batch {
            batch_id: founding.batch_id.clone(),
            species: collection.herb_species.clone(),
            creator: founding.participant.clone(),
            current_stage,
            is_terminal: current_stage.is_terminal(),
            created_at: founding.timestamp,
            updated_at,
            events,
        })
    }

    /// The first recorded event. `None` only for a hand-built batch with no events.
    pub fn founding_event(&self) -> Option<&Event> {
        self.events.first()
    }

    /// The recorded event of the given type, if any. At most one exists.
    pub fn event_of(&self, event_type: EventType) -> Option<&Event> {
        self.events.iter().find(|e| e.event_type() == event_type)
    }

    pub fn has_event(&self, event_type: EventType) -> bool {
        self.event_of(event_type).is_some()
    }

    pub fn contains_event(&self, event_id: &str) -> bool {
        self.events.iter().any(|e| e.event_id == event_id)
    }

    pub fn latest_event(&self) -> Option<&Event> {
        self.events.last()
    }
}
