//! Change notifications.
//!
//! Every accepted append is announced on a [`ChangeBus`]. Other holders of a
//! ledger over the same store subscribe to learn when their view is stale.
//!
//! Delivery is at-most-once and in-memory only: a receiver that falls more
//! than the bus capacity behind gets `RecvError::Lagged` and should reload
//! everything it cares about.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::event::EventType;
use crate::stage::Stage;

pub const DEFAULT_BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum LedgerChange {
    /// A collection event founded a new batch.
    BatchCreated {
        batch_id: String,
        event_id: String,
        species: String,
    },
    /// An event extended an existing batch.
    EventAppended {
        batch_id: String,
        event_id: String,
        event_type: EventType,
        stage: Stage,
    },
}

impl LedgerChange {
    pub fn batch_id(&self) -> &str {
        match self {
            LedgerChange::BatchCreated { batch_id, .. }
            | LedgerChange::EventAppended { batch_id, .. } => batch_id,
        }
    }

    pub fn event_id(&self) -> &str {
        match self {
            LedgerChange::BatchCreated { event_id, .. }
            | LedgerChange::EventAppended { event_id, .. } => event_id,
        }
    }
}

/// Cloneable handle to a broadcast channel of [`LedgerChange`]s.
#[derive(Debug, Clone)]
pub struct ChangeBus {
    tx: broadcast::Sender<LedgerChange>,
}

impl ChangeBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish a change. Having no subscribers is not an error.
    pub fn emit(&self, change: LedgerChange) {
        let _ = self.tx.send(change);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerChange> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}
