//! Supply-chain events.
//!
//! An [`Event`] is a fact: once the ledger accepts it, it is never edited or
//! deleted. The shared envelope (ids, participant, timestamp) is the same for
//! every step; the stage-specific fields live in a strongly typed
//! [`EventPayload`] variant selected by the event type.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::stage::Stage;

/// The four supply-chain steps, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Collection,
    QualityTest,
    Processing,
    Manufacturing,
}

impl EventType {
    pub const ALL: [EventType; 4] = [
        EventType::Collection,
        EventType::QualityTest,
        EventType::Processing,
        EventType::Manufacturing,
    ];

    /// Tag used in identifiers and persisted rows (`QUALITY_TEST`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Collection => "COLLECTION",
            EventType::QualityTest => "QUALITY_TEST",
            EventType::Processing => "PROCESSING",
            EventType::Manufacturing => "MANUFACTURING",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        EventType::ALL.into_iter().find(|t| t.as_str() == tag)
    }

    /// Stage a batch reaches once this event is recorded.
    pub fn resulting_stage(&self) -> Stage {
        match self {
            EventType::Collection => Stage::Collected,
            EventType::QualityTest => Stage::QualityTested,
            EventType::Processing => Stage::Processed,
            EventType::Manufacturing => Stage::Manufactured,
        }
    }

    /// Organization label recorded when the draft doesn't name one.
    pub fn default_organization(&self) -> &'static str {
        match self {
            EventType::Collection => "Collector Group",
            EventType::QualityTest => "Testing Laboratory",
            EventType::Processing => "Processing Unit",
            EventType::Manufacturing => "Manufacturing Plant",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            EventType::Collection => "collection",
            EventType::QualityTest => "quality test",
            EventType::Processing => "processing",
            EventType::Manufacturing => "manufacturing",
        };
        f.write_str(label)
    }
}

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionData {
    pub herb_species: String,
    /// Harvested weight in kilograms.
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_grade: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityTestData {
    /// Percent.
    pub purity: f64,
    /// Percent.
    pub moisture_content: f64,
    /// Parts per million.
    pub pesticide_level: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_method: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingData {
    pub method: String,
    /// Output weight in kilograms.
    pub yield_amount: f64,
    /// Degrees Celsius.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yield_percentage: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManufacturingData {
    pub product_name: String,
    pub quantity: f64,
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certification_id: Option<String>,
}

/// Stage-specific event data. The variant *is* the event type.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Collection(CollectionData),
    QualityTest(QualityTestData),
    Processing(ProcessingData),
    Manufacturing(ManufacturingData),
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::Collection(_) => EventType::Collection,
            EventPayload::QualityTest(_) => EventType::QualityTest,
            EventPayload::Processing(_) => EventType::Processing,
            EventPayload::Manufacturing(_) => EventType::Manufacturing,
        }
    }

    /// Payload fields as the untagged document persisted in the `data` column.
    pub fn to_data(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            EventPayload::Collection(d) => serde_json::to_value(d),
            EventPayload::QualityTest(d) => serde_json::to_value(d),
            EventPayload::Processing(d) => serde_json::to_value(d),
            EventPayload::Manufacturing(d) => serde_json::to_value(d),
        }
    }

    /// Rebuild a payload from the persisted type tag and data document.
    pub fn from_data(event_type: EventType, data: serde_json::Value) -> serde_json::Result<Self> {
        Ok(match event_type {
            EventType::Collection => EventPayload::Collection(serde_json::from_value(data)?),
            EventType::QualityTest => EventPayload::QualityTest(serde_json::from_value(data)?),
            EventType::Processing => EventPayload::Processing(serde_json::from_value(data)?),
            EventType::Manufacturing => {
                EventPayload::Manufacturing(serde_json::from_value(data)?)
            }
        })
    }

    /// Name of the first numeric field that is NaN or infinite. Such values
    /// have no JSON representation and could not be read back once stored.
    pub fn non_finite_field(&self) -> Option<&'static str> {
        let fields: Vec<(&'static str, Option<f64>)> = match self {
            EventPayload::Collection(d) => vec![
                ("weight", Some(d.weight)),
                ("location.latitude", d.location.as_ref().map(|l| l.latitude)),
                ("location.longitude", d.location.as_ref().map(|l| l.longitude)),
            ],
            EventPayload::QualityTest(d) => vec![
                ("purity", Some(d.purity)),
                ("moistureContent", Some(d.moisture_content)),
                ("pesticideLevel", Some(d.pesticide_level)),
            ],
            EventPayload::Processing(d) => vec![
                ("yieldAmount", Some(d.yield_amount)),
                ("temperature", d.temperature),
                ("yieldPercentage", d.yield_percentage),
            ],
            EventPayload::Manufacturing(d) => vec![("quantity", Some(d.quantity))],
        };

        fields
            .into_iter()
            .find(|(_, value)| value.is_some_and(|v| !v.is_finite()))
            .map(|(name, _)| name)
    }

    pub fn as_collection(&self) -> Option<&CollectionData> {
        match self {
            EventPayload::Collection(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_quality_test(&self) -> Option<&QualityTestData> {
        match self {
            EventPayload::QualityTest(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_processing(&self) -> Option<&ProcessingData> {
        match self {
            EventPayload::Processing(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_manufacturing(&self) -> Option<&ManufacturingData> {
        match self {
            EventPayload::Manufacturing(d) => Some(d),
            _ => None,
        }
    }
}

// The payload travels adjacently tagged (`{"eventType": .., "data": ..}`) so
// that a serialized event keeps the same tag/data split as the persisted row.
impl Serialize for EventPayload {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::{Error, SerializeStruct};

        let data = self.to_data().map_err(S::Error::custom)?;
        let mut st = serializer.serialize_struct("EventPayload", 2)?;
        st.serialize_field("eventType", &self.event_type())?;
        st.serialize_field("data", &data)?;
        st.end()
    }
}

impl<'de> Deserialize<'de> for EventPayload {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Tagged {
            event_type: EventType,
            data: serde_json::Value,
        }

        let tagged = Tagged::deserialize(deserializer)?;
        EventPayload::from_data(tagged.event_type, tagged.data).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Event
// ============================================================================

/// An accepted, immutable supply-chain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_id: String,
    pub batch_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_event_id: Option<String>,
    pub participant: String,
    pub organization: String,
    /// Assigned by the ledger at append time.
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
    /// Advisory content hash. Never verified on read; see [`crate::integrity`].
    pub integrity_tag: String,
    /// Reference to an off-ledger metadata document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,
}

impl Event {
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }
}

/// Caller-supplied input to [`crate::LedgerService::append`].
///
/// The ledger fills in the timestamp and integrity tag, and generates the
/// event id (and, for a collection without one, the batch id).
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub batch_id: Option<String>,
    pub event_id: Option<String>,
    pub parent_event_id: Option<String>,
    pub participant: String,
    pub organization: Option<String>,
    pub payload: EventPayload,
    pub external_ref: Option<String>,
}

impl EventDraft {
    pub fn new(participant: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            batch_id: None,
            event_id: None,
            parent_event_id: None,
            participant: participant.into(),
            organization: None,
            payload,
            external_ref: None,
        }
    }

    pub fn collection(participant: impl Into<String>, data: CollectionData) -> Self {
        Self::new(participant, EventPayload::Collection(data))
    }

    pub fn quality_test(
        batch_id: impl Into<String>,
        participant: impl Into<String>,
        data: QualityTestData,
    ) -> Self {
        Self::new(participant, EventPayload::QualityTest(data)).for_batch(batch_id)
    }

    pub fn processing(
        batch_id: impl Into<String>,
        participant: impl Into<String>,
        data: ProcessingData,
    ) -> Self {
        Self::new(participant, EventPayload::Processing(data)).for_batch(batch_id)
    }

    pub fn manufacturing(
        batch_id: impl Into<String>,
        participant: impl Into<String>,
        data: ManufacturingData,
    ) -> Self {
        Self::new(participant, EventPayload::Manufacturing(data)).for_batch(batch_id)
    }

    pub fn for_batch(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    /// Use a caller-chosen event id instead of a generated one.
    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    pub fn with_parent(mut self, parent_event_id: impl Into<String>) -> Self {
        self.parent_event_id = Some(parent_event_id.into());
        self
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn with_external_ref(mut self, reference: impl Into<String>) -> Self {
        self.external_ref = Some(reference.into());
        self
    }

    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }
}
