//! Batch stages and the gate that decides which event may extend a batch.
//!
//! The pipeline is strictly linear:
//!
//! ```text
//! (none) ──COLLECTION──► COLLECTED ──QUALITY_TEST──► QUALITY_TESTED
//!        ──PROCESSING──► PROCESSED ──MANUFACTURING──► MANUFACTURED (terminal)
//! ```
//!
//! [`StageGate`] is pure: no IO, no state, same answer for the same input.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::EventType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Collected,
    QualityTested,
    Processed,
    Manufactured,
}

impl Stage {
    /// Persisted status label (`current_status` column).
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Collected => "COLLECTED",
            Stage::QualityTested => "QUALITY_TESTED",
            Stage::Processed => "PROCESSED",
            Stage::Manufactured => "MANUFACTURED",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        [
            Stage::Collected,
            Stage::QualityTested,
            Stage::Processed,
            Stage::Manufactured,
        ]
        .into_iter()
        .find(|s| s.as_str() == label)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Manufactured)
    }

    /// The single event type that may follow this stage.
    pub fn next_event(&self) -> Option<EventType> {
        match self {
            Stage::Collected => Some(EventType::QualityTest),
            Stage::QualityTested => Some(EventType::Processing),
            Stage::Processed => Some(EventType::Manufacturing),
            Stage::Manufactured => None,
        }
    }

    /// Stage implied by a set of recorded event types.
    ///
    /// Depends only on which types are present, never on order or timestamps.
    /// `None` means no event has been recorded.
    pub fn from_event_types<I>(types: I) -> Option<Stage>
    where
        I: IntoIterator<Item = EventType>,
    {
        types.into_iter().map(|t| t.resulting_stage()).max()
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the gate refused an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("a {event_type} event is already recorded")]
    DuplicateStage { event_type: EventType },

    #[error("batch is complete after manufacturing; no further events can be added")]
    TerminalBatch,

    #[error("{attempted} cannot be recorded yet (expected {})", expected_label(.expected))]
    OutOfOrder {
        /// The one legal next event type, if any.
        expected: Option<EventType>,
        attempted: EventType,
    },
}

fn expected_label(expected: &Option<EventType>) -> String {
    match expected {
        Some(t) => t.to_string(),
        None => "nothing".to_string(),
    }
}

/// The stage state machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageGate;

impl StageGate {
    pub fn new() -> Self {
        Self
    }

    /// Decide whether `event_type` may be appended to a batch at `current`.
    ///
    /// `current == None` means the batch does not exist yet. On acceptance the
    /// returned stage is the one the batch moves to.
    pub fn can_transition(
        &self,
        current: Option<Stage>,
        event_type: EventType,
    ) -> Result<Stage, Rejection> {
        let target = event_type.resulting_stage();

        let Some(current) = current else {
            return match event_type {
                EventType::Collection => Ok(target),
                attempted => Err(Rejection::OutOfOrder {
                    expected: Some(EventType::Collection),
                    attempted,
                }),
            };
        };

        if current.is_terminal() {
            return Err(Rejection::TerminalBatch);
        }

        // Stages are reached strictly in order, so every type at or below the
        // current stage is already on the batch.
        if target <= current {
            return Err(Rejection::DuplicateStage { event_type });
        }

        match current.next_event() {
            Some(next) if next == event_type => Ok(target),
            expected => Err(Rejection::OutOfOrder {
                expected,
                attempted: event_type,
            }),
        }
    }
}
