//! End-to-end behavior of the ledger over the in-memory store.

use herbtrace_core::{
    ErrorKind, EventType, LedgerBuilder, LedgerChange, LedgerStore, LegacyMatch, MemoryStore,
    MemoryMetadataStore, MetadataStore, QualityStatus, Rejection, ResolvedVia, Stage,
    LEDGER_CERTIFICATION, PREMIUM_CERTIFICATION,
};
use herbtrace_testing::{fixtures, memory_ledger};
use tokio::sync::broadcast::error::TryRecvError;

// ============================================================================
// Chain of custody
// ============================================================================

#[tokio::test]
async fn test_collection_creates_batch() {
    let ledger = memory_ledger();

    let event = ledger
        .append(fixtures::collection().for_batch("HERB-1"))
        .await
        .unwrap();
    assert_eq!(event.batch_id, "HERB-1");
    assert_eq!(event.event_type(), EventType::Collection);

    let batch = ledger.get_batch("HERB-1").await.unwrap().unwrap();
    assert_eq!(batch.species, fixtures::SPECIES);
    assert_eq!(batch.creator, fixtures::COLLECTOR);
    assert_eq!(batch.current_stage, Stage::Collected);
    assert!(!batch.is_terminal);
    assert_eq!(batch.events.len(), 1);
}

#[tokio::test]
async fn test_duplicate_quality_test_rejected() {
    let ledger = memory_ledger();
    ledger
        .append(fixtures::collection().for_batch("HERB-1"))
        .await
        .unwrap();

    ledger.append(fixtures::passing_test("HERB-1")).await.unwrap();
    let batch = ledger.get_batch("HERB-1").await.unwrap().unwrap();
    assert_eq!(batch.current_stage, Stage::QualityTested);

    let err = ledger
        .append(fixtures::failing_test("HERB-1"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateStage);
    assert_eq!(
        err.rejection(),
        Some(&Rejection::DuplicateStage {
            event_type: EventType::QualityTest
        })
    );
    assert!(err.to_string().contains("quality test"));

    let batch = ledger.get_batch("HERB-1").await.unwrap().unwrap();
    assert_eq!(batch.events.len(), 2);
}

#[tokio::test]
async fn test_manufactured_batch_is_terminal() {
    let ledger = memory_ledger();
    ledger
        .append(fixtures::collection().for_batch("HERB-1"))
        .await
        .unwrap();
    ledger.append(fixtures::passing_test("HERB-1")).await.unwrap();
    ledger.append(fixtures::processing("HERB-1")).await.unwrap();
    ledger.append(fixtures::manufacturing("HERB-1")).await.unwrap();

    let batch = ledger.get_batch("HERB-1").await.unwrap().unwrap();
    assert_eq!(batch.current_stage, Stage::Manufactured);
    assert!(batch.is_terminal);

    let attempts = vec![
        fixtures::collection().for_batch("HERB-1"),
        fixtures::passing_test("HERB-1"),
        fixtures::processing("HERB-1"),
        fixtures::manufacturing("HERB-1"),
    ];
    for draft in attempts {
        let err = ledger.append(draft).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TerminalBatch);
        assert!(!err.is_retryable());
    }

    let batch = ledger.get_batch("HERB-1").await.unwrap().unwrap();
    assert_eq!(batch.events.len(), 4);

    let row = ledger.store().get_batch("HERB-1").await.unwrap().unwrap();
    assert_eq!(row.current_status, Stage::Manufactured);
    assert!(row.is_completed);
}

#[tokio::test]
async fn test_out_of_order_rejected() {
    let ledger = memory_ledger();
    let founding = ledger.append(fixtures::collection()).await.unwrap();

    let err = ledger
        .append(fixtures::processing(&founding.batch_id))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OutOfOrder);
    assert_eq!(
        err.rejection(),
        Some(&Rejection::OutOfOrder {
            expected: Some(EventType::QualityTest),
            attempted: EventType::Processing,
        })
    );
    assert_eq!(ledger.store().event_count(), 1);
}

#[tokio::test]
async fn test_stage_counts_hold_under_random_appends() {
    let ledger = memory_ledger();
    let mut batch_ids = Vec::new();
    for _ in 0..4 {
        batch_ids.push(ledger.append(fixtures::collection()).await.unwrap().batch_id);
    }

    for _ in 0..60 {
        let id = &batch_ids[fastrand::usize(..batch_ids.len())];
        let draft = match fastrand::u8(..4) {
            0 => fixtures::collection().for_batch(id.clone()),
            1 => fixtures::passing_test(id),
            2 => fixtures::processing(id),
            _ => fixtures::manufacturing(id),
        };
        // Rejections are expected; only the invariants matter here.
        let _ = ledger.append(draft).await;
    }

    for batch in ledger.list_batches().await.unwrap() {
        for ty in EventType::ALL {
            let count = batch.events.iter().filter(|e| e.event_type() == ty).count();
            if ty == EventType::Collection {
                assert_eq!(count, 1, "{} {:?}", batch.batch_id, ty);
            } else {
                assert!(count <= 1, "{} {:?}", batch.batch_id, ty);
            }
        }
        let stages: Vec<_> = batch
            .events
            .iter()
            .map(|e| e.event_type().resulting_stage())
            .collect();
        assert!(stages.windows(2).all(|w| w[0] < w[1]));
    }
}

// ============================================================================
// Resolution
// ============================================================================

#[tokio::test]
async fn test_resolve_unknown_batch() {
    let ledger = memory_ledger();
    ledger.append(fixtures::collection()).await.unwrap();

    let err = ledger.resolve("HERB-999").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_resolve_every_event_id() {
    let ledger = memory_ledger();
    let mut events = Vec::new();
    for _ in 0..3 {
        let founding = ledger.append(fixtures::collection()).await.unwrap();
        let id = founding.batch_id.clone();
        events.push(founding);
        events.push(ledger.append(fixtures::passing_test(&id)).await.unwrap());
        events.push(ledger.append(fixtures::processing(&id)).await.unwrap());
    }

    for event in &events {
        let resolution = ledger.resolve(&event.event_id).await.unwrap();
        assert_eq!(resolution.via, ResolvedVia::EventId);
        assert_eq!(resolution.batch.batch_id, event.batch_id);
        assert!(resolution.batch.contains_event(&event.event_id));
    }
}

#[tokio::test]
async fn test_resolve_by_batch_id_returns_ordered_chain() {
    let ledger = memory_ledger();
    let founding = ledger.append(fixtures::collection()).await.unwrap();
    let test = ledger
        .append(fixtures::passing_test(&founding.batch_id))
        .await
        .unwrap();

    let resolution = ledger.resolve(&founding.batch_id).await.unwrap();
    assert_eq!(resolution.via, ResolvedVia::BatchId);
    let ids: Vec<_> = resolution.events().iter().map(|e| e.event_id.clone()).collect();
    assert_eq!(ids, vec![founding.event_id, test.event_id]);
}

#[tokio::test]
async fn test_legacy_parent_reference() {
    for mode in [LegacyMatch::ParentOrSubstring, LegacyMatch::ParentOnly] {
        let ledger = LedgerBuilder::new(MemoryStore::new())
            .with_legacy_match(mode)
            .build();
        let founding = ledger.append(fixtures::collection()).await.unwrap();
        let test = ledger
            .append(fixtures::passing_test(&founding.batch_id).with_parent("QR-LEGACY-7"))
            .await
            .unwrap();

        let resolution = ledger.resolve("QR-LEGACY-7").await.unwrap();
        assert_eq!(resolution.batch.batch_id, founding.batch_id);
        assert_eq!(
            resolution.via,
            ResolvedVia::ParentEvent {
                event_id: test.event_id.clone()
            }
        );
        assert!(resolution.via.is_legacy());
    }
}

#[tokio::test]
async fn test_id_fragment_depends_on_legacy_mode() {
    let loose = memory_ledger();
    loose
        .append(
            fixtures::collection()
                .for_batch("HERB-7")
                .with_event_id("COLLECTION-1700000000000-4242"),
        )
        .await
        .unwrap();

    let resolution = loose.resolve("1700000000000-4242").await.unwrap();
    assert_eq!(resolution.batch.batch_id, "HERB-7");
    assert!(matches!(resolution.via, ResolvedVia::IdFragment { .. }));

    let strict = LedgerBuilder::from_arc(loose.store().clone())
        .with_legacy_match(LegacyMatch::ParentOnly)
        .build();
    let err = strict.resolve("1700000000000-4242").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_resolve_blank_token() {
    let ledger = memory_ledger();
    assert_eq!(
        ledger.resolve("   ").await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

// ============================================================================
// Listing and audit
// ============================================================================

#[tokio::test]
async fn test_list_batches_and_audit_trail() {
    let ledger = memory_ledger();
    let a = ledger.append(fixtures::collection()).await.unwrap();
    let b = ledger.append(fixtures::collection()).await.unwrap();
    ledger.append(fixtures::passing_test(&a.batch_id)).await.unwrap();

    let mut ids: Vec<_> = ledger
        .list_batches()
        .await
        .unwrap()
        .into_iter()
        .map(|batch| batch.batch_id)
        .collect();
    ids.sort();
    let mut expected = vec![a.batch_id.clone(), b.batch_id.clone()];
    expected.sort();
    assert_eq!(ids, expected);

    let trail = ledger.audit_trail(Some(2)).await.unwrap();
    assert_eq!(trail.len(), 2);
    assert_eq!(trail[0].event_type(), EventType::QualityTest);
    assert_eq!(trail[1].event_id, b.event_id);
}

// ============================================================================
// Notifications
// ============================================================================

#[tokio::test]
async fn test_subscribers_see_each_accepted_append() {
    let ledger = memory_ledger();
    let mut rx = ledger.subscribe();

    let founding = ledger.append(fixtures::collection()).await.unwrap();
    let id = founding.batch_id.clone();
    ledger.append(fixtures::passing_test(&id)).await.unwrap();
    ledger.append(fixtures::passing_test(&id)).await.unwrap_err();

    match rx.recv().await.unwrap() {
        LedgerChange::BatchCreated {
            batch_id, species, ..
        } => {
            assert_eq!(batch_id, id);
            assert_eq!(species, fixtures::SPECIES);
        }
        other => panic!("unexpected change: {other:?}"),
    }
    match rx.recv().await.unwrap() {
        LedgerChange::EventAppended {
            event_type, stage, ..
        } => {
            assert_eq!(event_type, EventType::QualityTest);
            assert_eq!(stage, Stage::QualityTested);
        }
        other => panic!("unexpected change: {other:?}"),
    }
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn test_two_services_over_one_store() {
    let first = memory_ledger();
    let second = LedgerBuilder::from_arc(first.store().clone()).build();

    let founding = first.append(fixtures::collection()).await.unwrap();
    second
        .append(fixtures::passing_test(&founding.batch_id))
        .await
        .unwrap();

    let batch = first.get_batch(&founding.batch_id).await.unwrap().unwrap();
    assert_eq!(batch.current_stage, Stage::QualityTested);
}

// ============================================================================
// Reports and metadata
// ============================================================================

#[tokio::test]
async fn test_report_for_complete_batch() {
    let ledger = memory_ledger();
    let founding = ledger.append(fixtures::collection()).await.unwrap();
    let id = founding.batch_id.clone();
    ledger.append(fixtures::passing_test(&id)).await.unwrap();
    ledger.append(fixtures::processing(&id)).await.unwrap();
    let product = ledger.append(fixtures::manufacturing(&id)).await.unwrap();

    let report = ledger.report(&product.event_id).await.unwrap();
    assert_eq!(report.batch_id, id);
    assert!(report.complete);
    assert_eq!(report.chain_length, 4);
    assert_eq!(report.origin.collector, fixtures::COLLECTOR);

    let quality = report.quality.unwrap();
    assert_eq!(quality.assessment.status, QualityStatus::Passed);
    assert_eq!(quality.lab, "Testing Laboratory");

    let product = report.product.unwrap();
    assert_eq!(product.brand, "HerbalCorp");
    assert_eq!(
        report.certifications,
        vec![
            LEDGER_CERTIFICATION.to_string(),
            "Certified: AYUSH-2024-117".to_string(),
            PREMIUM_CERTIFICATION.to_string(),
        ]
    );
}

#[tokio::test]
async fn test_report_for_failed_quality_test() {
    let ledger = memory_ledger();
    let founding = ledger.append(fixtures::collection()).await.unwrap();
    ledger
        .append(fixtures::failing_test(&founding.batch_id))
        .await
        .unwrap();

    let report = ledger.report(&founding.batch_id).await.unwrap();
    assert!(!report.complete);
    assert!(report.product.is_none());
    let quality = report.quality.unwrap();
    assert_eq!(quality.assessment.status, QualityStatus::AttentionRequired);
    assert!(!quality.assessment.premium_certified);
    assert_eq!(report.certifications, vec![LEDGER_CERTIFICATION.to_string()]);
}

#[tokio::test]
async fn test_external_ref_is_forwarded_untouched() {
    let ledger = memory_ledger();
    let docs = MemoryMetadataStore::new();
    let reference = docs
        .put("collection", serde_json::json!({ "photo": "field-12.jpg" }))
        .await
        .unwrap();

    let event = ledger
        .append(fixtures::collection().with_external_ref(reference.clone()))
        .await
        .unwrap();

    let stored = ledger.get_event(&event.event_id).await.unwrap().unwrap();
    assert_eq!(stored.external_ref.as_deref(), Some(reference.as_str()));
    assert_eq!(
        docs.get(&reference).await.unwrap().unwrap().document["photo"],
        "field-12.jpg"
    );
}
