//! # Supply Chain Example
//!
//! Walks one Ashwagandha batch from harvest to a packaged product, issues a
//! tracking code, and scans it back the way a consumer app would.
//!
//! Uses an in-memory store unless `DATABASE_URL` is set. Logging is
//! controlled with `RUST_LOG` (e.g. `RUST_LOG=herbtrace_core=debug`).

use anyhow::Result;
use herbtrace_core::{
    CollectionData, EventDraft, GeoLocation, LedgerBuilder, LedgerConfig, LedgerService,
    LedgerStore, ManufacturingData, MemoryStore, ProcessingData, QualityTestData, RenderStyle,
};
use herbtrace_postgres::PgLedgerStore;
use sqlx::PgPool;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = LedgerConfig::from_env();

    match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let store = PgLedgerStore::new(PgPool::connect(&url).await?);
            store.migrate().await?;
            tracing::info!("using postgres store");
            run(LedgerBuilder::new(store).with_config(config).build()).await
        }
        Err(_) => {
            tracing::info!("DATABASE_URL not set, using in-memory store");
            run(LedgerBuilder::new(MemoryStore::new()).with_config(config).build()).await
        }
    }
}

async fn run<S: LedgerStore + 'static>(ledger: LedgerService<S>) -> Result<()> {
    // Watch changes the way another open session would.
    let mut changes = ledger.subscribe();
    let watcher = tokio::spawn(async move {
        while let Ok(change) = changes.recv().await {
            println!("  [change] {}", serde_json::to_string(&change).unwrap_or_default());
        }
    });

    // ========================================================================
    // Chain of custody
    // ========================================================================

    let harvest = ledger
        .append(EventDraft::collection(
            "Ravi Kumar",
            CollectionData {
                herb_species: "Ashwagandha".into(),
                weight: 25.5,
                location: Some(GeoLocation {
                    latitude: 26.9124,
                    longitude: 75.7873,
                    zone: Some("Rajasthan".into()),
                }),
                quality_grade: Some("A".into()),
                notes: None,
            },
        ))
        .await?;
    let batch_id = harvest.batch_id.clone();
    println!("Collected batch {batch_id} ({})", harvest.event_id);

    let test = ledger
        .append(
            EventDraft::quality_test(
                &batch_id,
                "Dr. Anita Mehta",
                QualityTestData {
                    purity: 98.5,
                    moisture_content: 8.2,
                    pesticide_level: 0.02,
                    test_method: Some("HPLC".into()),
                },
            )
            .with_parent(harvest.event_id.clone()),
        )
        .await?;
    println!("Quality tested ({})", test.event_id);

    // Skipping ahead is refused by the stage gate.
    let product = ManufacturingData {
        product_name: "Ashwagandha Root Capsules".into(),
        quantity: 500.0,
        unit: "capsules".into(),
        expiry_date: chrono::NaiveDate::from_ymd_opt(2028, 6, 30),
        product_type: Some("Capsules".into()),
        brand_name: Some("HerbalCorp".into()),
        certification_id: Some("AYUSH-2024-117".into()),
    };
    if let Err(e) = ledger
        .append(EventDraft::manufacturing(&batch_id, "Kavya Nair", product.clone()))
        .await
    {
        println!("Rejected as expected: [{}] {e}", e.kind());
    }

    let processed = ledger
        .append(
            EventDraft::processing(
                &batch_id,
                "Suresh Patel",
                ProcessingData {
                    method: "Steam Distillation".into(),
                    yield_amount: 21.0,
                    temperature: Some(60.0),
                    duration: Some("4 hours".into()),
                    yield_percentage: Some(82.4),
                },
            )
            .with_parent(test.event_id.clone()),
        )
        .await?;
    println!("Processed ({})", processed.event_id);

    let packaged = ledger
        .append(
            EventDraft::manufacturing(&batch_id, "Kavya Nair", product)
                .with_parent(processed.event_id.clone()),
        )
        .await?;
    println!("Manufactured ({})", packaged.event_id);

    // ========================================================================
    // Tracking code
    // ========================================================================

    let code = ledger.tracking_code(&packaged, RenderStyle::Label)?;
    println!("\nTracking URL: {}", code.tracking_text);
    println!(
        "QR: {} modules, {} bytes of SVG, tag {}",
        code.code.modules,
        code.code.svg.len(),
        &code.integrity_tag[..12]
    );

    let scanned = ledger.scan(&code.tracking_text).await?;
    println!(
        "Scan resolved {} with {} events",
        scanned.batch.batch_id,
        scanned.events().len()
    );

    let legacy = format!("{}/track/{}", ledger.codec().origin(), harvest.event_id);
    let target = ledger.decode(&legacy).await?;
    println!("Legacy code {legacy} -> batch {:?}", target.batch_id);

    let report = ledger.report(&batch_id).await?;
    println!("\n{}", serde_json::to_string_pretty(&report)?);

    watcher.abort();
    Ok(())
}
