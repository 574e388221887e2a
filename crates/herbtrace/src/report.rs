//! Consumer-facing provenance summary of a batch.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::batch::Batch;
use crate::event::{EventType, GeoLocation};
use crate::quality::{QualityAssessment, QualityThresholds};
use crate::stage::Stage;

pub const LEDGER_CERTIFICATION: &str = "Supply Chain Ledger Recorded";
pub const PREMIUM_CERTIFICATION: &str = "Premium Quality Certified";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginSummary {
    pub collector: String,
    pub harvested_at: DateTime<Utc>,
    pub weight: f64,
    pub location: Option<GeoLocation>,
    pub quality_grade: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualitySummary {
    pub lab: String,
    pub tested_at: DateTime<Utc>,
    pub purity: f64,
    pub moisture_content: f64,
    pub pesticide_level: f64,
    pub test_method: Option<String>,
    pub assessment: QualityAssessment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingSummary {
    pub processor: String,
    pub processed_at: DateTime<Utc>,
    pub method: String,
    pub yield_amount: f64,
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSummary {
    pub product_name: String,
    pub brand: String,
    pub manufacturer: String,
    pub manufactured_on: NaiveDate,
    pub expiry_date: Option<NaiveDate>,
    pub quantity: f64,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceReport {
    pub batch_id: String,
    pub species: String,
    pub stage: Stage,
    pub complete: bool,
    pub chain_length: usize,
    pub origin: OriginSummary,
    pub quality: Option<QualitySummary>,
    pub processing: Option<ProcessingSummary>,
    pub product: Option<ProductSummary>,
    pub certifications: Vec<String>,
}

impl ProvenanceReport {
    /// `None` when the batch has no events to report on.
    pub fn from_batch(batch: &Batch, thresholds: &QualityThresholds) -> Option<Self> {
        let founding = batch.founding_event()?;
        let origin = founding
            .payload
            .as_collection()
            .map(|c| OriginSummary {
                collector: founding.participant.clone(),
                harvested_at: founding.timestamp,
                weight: c.weight,
                location: c.location.clone(),
                quality_grade: c.quality_grade.clone(),
            })
            .unwrap_or_else(|| OriginSummary {
                collector: founding.participant.clone(),
                harvested_at: founding.timestamp,
                weight: 0.0,
                location: None,
                quality_grade: None,
            });

        let quality = batch.event_of(EventType::QualityTest).and_then(|e| {
            let t = e.payload.as_quality_test()?;
            Some(QualitySummary {
                lab: e.organization.clone(),
                tested_at: e.timestamp,
                purity: t.purity,
                moisture_content: t.moisture_content,
                pesticide_level: t.pesticide_level,
                test_method: t.test_method.clone(),
                assessment: thresholds.assess(t),
            })
        });

        let processing = batch.event_of(EventType::Processing).and_then(|e| {
            let p = e.payload.as_processing()?;
            Some(ProcessingSummary {
                processor: e.participant.clone(),
                processed_at: e.timestamp,
                method: p.method.clone(),
                yield_amount: p.yield_amount,
                temperature: p.temperature,
            })
        });

        let mfg = batch
            .event_of(EventType::Manufacturing)
            .and_then(|e| e.payload.as_manufacturing().map(|m| (e, m)));

        let product = mfg.map(|(e, m)| ProductSummary {
            product_name: m.product_name.clone(),
            brand: m
                .brand_name
                .clone()
                .unwrap_or_else(|| e.organization.clone()),
            manufacturer: e.participant.clone(),
            manufactured_on: e.timestamp.date_naive(),
            expiry_date: m.expiry_date,
            quantity: m.quantity,
            unit: m.unit.clone(),
        });

        let mut certifications = vec![LEDGER_CERTIFICATION.to_string()];
        if let Some(cert) = mfg.and_then(|(_, m)| m.certification_id.as_ref()) {
            certifications.push(format!("Certified: {cert}"));
        }
        if quality.as_ref().is_some_and(|q| q.assessment.premium_certified) {
            certifications.push(PREMIUM_CERTIFICATION.to_string());
        }

        Some(ProvenanceReport {
            batch_id: batch.batch_id.clone(),
            species: batch.species.clone(),
            stage: batch.current_stage,
            complete: batch.is_terminal,
            chain_length: batch.events.len(),
            origin,
            quality,
            processing,
            product,
            certifications,
        })
    }
}
