//! Advisory integrity tags.
//!
//! Tags are SHA-256 over a JSON envelope, rendered as lowercase hex. They are
//! metadata only: nothing on the read or decode path recomputes or checks
//! them, so a tag says nothing about tampering unless a caller verifies it
//! with [`event_tag_matches`].

use chrono::SecondsFormat;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::event::Event;

/// Hex SHA-256 of an arbitrary JSON document.
///
/// `serde_json` keeps object keys sorted, so equal documents hash equally
/// regardless of construction order.
pub fn tag_document(doc: &serde_json::Value) -> String {
    let bytes = serde_json::to_vec(doc).unwrap_or_default();
    format!("{:x}", Sha256::digest(&bytes))
}

/// Tag covering an event's envelope and payload (not the tag itself, nor the external ref).
///
/// The timestamp is hashed at microsecond precision, so a tag survives stores
/// that drop nanoseconds.
pub fn event_tag(event: &Event) -> String {
    let data = event.payload.to_data().unwrap_or(serde_json::Value::Null);
    tag_document(&json!({
        "eventId": event.event_id,
        "batchId": event.batch_id,
        "eventType": event.event_type(),
        "parentEventId": event.parent_event_id,
        "participant": event.participant,
        "organization": event.organization,
        "timestamp": event.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
        "data": data,
    }))
}

/// Recompute an event's tag and compare with the stored one.
pub fn event_tag_matches(event: &Event) -> bool {
    event_tag(event) == event.integrity_tag
}
