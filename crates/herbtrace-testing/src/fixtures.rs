//! Drafts for a typical Ashwagandha batch.

use chrono::NaiveDate;
use herbtrace_core::{
    CollectionData, EventDraft, GeoLocation, ManufacturingData, ProcessingData, QualityTestData,
};

pub const SPECIES: &str = "Ashwagandha";
pub const COLLECTOR: &str = "Ravi Kumar";
pub const LAB_ANALYST: &str = "Dr. Anita Mehta";
pub const PROCESSOR: &str = "Suresh Patel";
pub const MANUFACTURER: &str = "Kavya Nair";

pub fn collection_data() -> CollectionData {
    CollectionData {
        herb_species: SPECIES.to_string(),
        weight: 25.5,
        location: Some(GeoLocation {
            latitude: 26.9124,
            longitude: 75.7873,
            zone: Some("Rajasthan".to_string()),
        }),
        quality_grade: Some("A".to_string()),
        notes: Some("Harvested after morning dew".to_string()),
    }
}

pub fn collection() -> EventDraft {
    EventDraft::collection(COLLECTOR, collection_data())
}

/// Purity 98.5%, pesticides 0.02 ppm.
pub fn passing_test(batch_id: &str) -> EventDraft {
    EventDraft::quality_test(
        batch_id,
        LAB_ANALYST,
        QualityTestData {
            purity: 98.5,
            moisture_content: 8.2,
            pesticide_level: 0.02,
            test_method: Some("HPLC".to_string()),
        },
    )
}

/// Purity 91%, pesticides 0.4 ppm.
pub fn failing_test(batch_id: &str) -> EventDraft {
    EventDraft::quality_test(
        batch_id,
        LAB_ANALYST,
        QualityTestData {
            purity: 91.0,
            moisture_content: 12.5,
            pesticide_level: 0.4,
            test_method: None,
        },
    )
}

pub fn processing(batch_id: &str) -> EventDraft {
    EventDraft::processing(
        batch_id,
        PROCESSOR,
        ProcessingData {
            method: "Steam Distillation".to_string(),
            yield_amount: 21.0,
            temperature: Some(60.0),
            duration: Some("4 hours".to_string()),
            yield_percentage: Some(82.4),
        },
    )
}

pub fn manufacturing(batch_id: &str) -> EventDraft {
    EventDraft::manufacturing(
        batch_id,
        MANUFACTURER,
        ManufacturingData {
            product_name: "Ashwagandha Root Capsules".to_string(),
            quantity: 500.0,
            unit: "capsules".to_string(),
            expiry_date: NaiveDate::from_ymd_opt(2028, 6, 30),
            product_type: Some("Capsules".to_string()),
            brand_name: Some("HerbalCorp".to_string()),
            certification_id: Some("AYUSH-2024-117".to_string()),
        },
    )
}

/// The QR payload format older mobile clients emit.
pub fn structured_payload(batch_id: Option<&str>, event_id: &str) -> String {
    let mut doc = serde_json::json!({
        "type": "herb_batch",
        "eventId": event_id,
        "version": "1.0",
    });
    if let Some(batch_id) = batch_id {
        doc["batchId"] = serde_json::Value::from(batch_id);
    }
    doc.to_string()
}
