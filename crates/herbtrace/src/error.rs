//! Error types for the ledger core.
//!
//! Every error carries a stable machine-readable [`ErrorKind`] and a
//! human-readable `Display` derived from it. Only [`LedgerError::Storage`] is
//! worth retrying; everything else is a caller bug or a business-rule
//! violation and will fail the same way again.

use std::time::Duration;

use thiserror::Error;

use crate::stage::Rejection;

/// What a [`LedgerError::NotFound`] was looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject {
    Batch,
    Event,
    /// A resolver token that matched neither a batch, an event, nor a legacy fallback.
    Token,
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Subject::Batch => f.write_str("batch"),
            Subject::Event => f.write_str("event"),
            Subject::Token => f.write_str("batch or event"),
        }
    }
}

/// Stable, machine-readable error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    DuplicateStage,
    TerminalBatch,
    OutOfOrder,
    InvalidFormat,
    InvalidDraft,
    Storage,
}

impl ErrorKind {
    /// Wire name of the kind, safe to expose to clients.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::DuplicateStage => "duplicate_stage",
            ErrorKind::TerminalBatch => "terminal_batch",
            ErrorKind::OutOfOrder => "out_of_order",
            ErrorKind::InvalidFormat => "invalid_format",
            ErrorKind::InvalidDraft => "invalid_draft",
            ErrorKind::Storage => "storage",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by the persistence collaborator.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend failed: {source}")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("storage call timed out after {0:?}")]
    Timeout(Duration),

    /// A persisted row could not be mapped back into the typed model.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// Wrap any backend error (driver, pool, IO).
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StorageError::Backend {
            source: Box::new(err),
        }
    }

    /// Backend failure described only by a message.
    pub fn message(msg: impl Into<String>) -> Self {
        let msg: String = msg.into();
        StorageError::Backend { source: msg.into() }
    }
}

/// Errors surfaced by the ledger, resolver and tracking codec.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{subject} not found: {id}")]
    NotFound { subject: Subject, id: String },

    /// The stage gate refused the append. `reason` is the gate's verdict, unmodified.
    #[error("batch {batch_id}: {reason}")]
    Rejected {
        batch_id: String,
        #[source]
        reason: Rejection,
    },

    #[error("invalid tracking payload: {0}")]
    InvalidFormat(String),

    #[error("invalid event draft: {0}")]
    InvalidDraft(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl LedgerError {
    pub(crate) fn batch_not_found(id: impl Into<String>) -> Self {
        LedgerError::NotFound {
            subject: Subject::Batch,
            id: id.into(),
        }
    }

    pub(crate) fn event_not_found(id: impl Into<String>) -> Self {
        LedgerError::NotFound {
            subject: Subject::Event,
            id: id.into(),
        }
    }

    pub(crate) fn token_not_found(id: impl Into<String>) -> Self {
        LedgerError::NotFound {
            subject: Subject::Token,
            id: id.into(),
        }
    }

    /// Stable category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::NotFound { .. } => ErrorKind::NotFound,
            LedgerError::Rejected { reason, .. } => match reason {
                Rejection::DuplicateStage { .. } => ErrorKind::DuplicateStage,
                Rejection::TerminalBatch => ErrorKind::TerminalBatch,
                Rejection::OutOfOrder { .. } => ErrorKind::OutOfOrder,
            },
            LedgerError::InvalidFormat(_) => ErrorKind::InvalidFormat,
            LedgerError::InvalidDraft(_) => ErrorKind::InvalidDraft,
            LedgerError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Whether retrying the same call with backoff could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Storage(_))
    }

    /// The gate's rejection, if this error is one.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            LedgerError::Rejected { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

pub type Result<T, E = LedgerError> = std::result::Result<T, E>;
