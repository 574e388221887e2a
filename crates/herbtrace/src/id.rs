//! Batch and event identifiers.
//!
//! Shape: `<TAG>-<epoch millis>-<0..=9999>`. Uniqueness is probabilistic;
//! nothing checks a generated id against the ledger.

use chrono::Utc;

use crate::event::EventType;

pub const BATCH_PREFIX: &str = "HERB";

#[derive(Debug, Clone, Copy, Default)]
pub struct IdGenerator;

impl IdGenerator {
    pub fn new() -> Self {
        Self
    }

    /// `HERB-<millis>-<rand4>`
    pub fn new_batch_id(&self) -> String {
        tagged(BATCH_PREFIX)
    }

    /// `<TYPE>-<millis>-<rand4>`, e.g. `QUALITY_TEST-1718000000000-42`.
    pub fn new_event_id(&self, event_type: EventType) -> String {
        tagged(event_type.as_str())
    }
}

fn tagged(tag: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix = fastrand::u32(0..10_000);
    format!("{tag}-{millis}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(id: &str) -> (String, i64, u32) {
        let mut parts = id.rsplitn(3, '-');
        let suffix = parts.next().unwrap().parse().unwrap();
        let millis = parts.next().unwrap().parse().unwrap();
        let tag = parts.next().unwrap().to_string();
        (tag, millis, suffix)
    }

    #[test]
    fn test_batch_id_shape() {
        let before = Utc::now().timestamp_millis();
        let (tag, millis, suffix) = split(&IdGenerator.new_batch_id());
        assert_eq!(tag, "HERB");
        assert!(millis >= before);
        assert!(suffix < 10_000);
    }

    #[test]
    fn test_event_id_uses_type_tag() {
        let (tag, _, _) = split(&IdGenerator.new_event_id(EventType::QualityTest));
        assert_eq!(tag, "QUALITY_TEST");
        let (tag, _, _) = split(&IdGenerator.new_event_id(EventType::Manufacturing));
        assert_eq!(tag, "MANUFACTURING");
    }
}
