//! Tracking code issue and scan paths.

use herbtrace_core::{
    ErrorKind, LedgerBuilder, LedgerError, MemoryStore, PayloadFormat, RenderStyle, Subject,
    TrackingCodec,
};
use herbtrace_testing::{fixtures, memory_ledger, random_token};

#[tokio::test]
async fn test_legacy_url_resolves_batch() {
    let ledger = memory_ledger();
    ledger
        .append(
            fixtures::collection()
                .for_batch("HERB-1")
                .with_event_id("EVT-42"),
        )
        .await
        .unwrap();

    let target = ledger.decode("https://x/track/EVT-42").await.unwrap();
    assert_eq!(target.batch_id.as_deref(), Some("HERB-1"));
    assert_eq!(target.event_id, "EVT-42");
    assert_eq!(target.format, PayloadFormat::LegacyTrackingUrl);
}

#[tokio::test]
async fn test_legacy_url_for_unknown_event() {
    let ledger = memory_ledger();
    let err = ledger.decode("https://x/track/EVT-404").await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::NotFound {
            subject: Subject::Event,
            ..
        }
    ));
}

#[tokio::test]
async fn test_legacy_url_requires_exact_event_id() {
    let ledger = memory_ledger();
    ledger
        .append(
            fixtures::collection()
                .for_batch("HERB-1")
                .with_event_id("EVT-42"),
        )
        .await
        .unwrap();

    // A batch id and a fragment of a real event id both resolve as tokens,
    // but neither names a recorded event.
    assert!(ledger.resolve("EVT-4").await.is_ok());
    for scanned in ["https://x/track/HERB-1", "https://x/track/EVT-4"] {
        let err = ledger.decode(scanned).await.unwrap_err();
        assert!(
            matches!(
                err,
                LedgerError::NotFound {
                    subject: Subject::Event,
                    ..
                }
            ),
            "{scanned}: {err:?}"
        );
    }
}

#[tokio::test]
async fn test_round_trip_random_identifiers() {
    let codec = TrackingCodec::new("https://trace.example");
    let ledger = memory_ledger();

    for _ in 0..200 {
        let batch_id = random_token(fastrand::usize(1..24));
        let event_id = random_token(fastrand::usize(1..24));
        let code = codec.encode(&batch_id, &event_id).unwrap();

        let target = codec
            .decode(&code.tracking_text, ledger.resolver())
            .await
            .unwrap();
        assert_eq!(target.batch_id.as_deref(), Some(batch_id.as_str()));
        assert_eq!(target.event_id, event_id);
        assert_eq!(target.format, PayloadFormat::TrackingUrl);
    }
}

#[tokio::test]
async fn test_round_trip_reserved_characters() {
    let codec = TrackingCodec::new("https://trace.example/");
    let ledger = memory_ledger();
    let pairs = [
        ("HERB 1/2", "EVT?a=b#c"),
        ("Tulsí-ß", "事件-1"),
        ("a%20b", "100%"),
    ];

    for (batch_id, event_id) in pairs {
        let code = codec.encode(batch_id, event_id).unwrap();
        assert!(code.tracking_text.starts_with("https://trace.example/track/"));

        let target = codec
            .decode(&code.tracking_text, ledger.resolver())
            .await
            .unwrap();
        assert_eq!(target.batch_id.as_deref(), Some(batch_id));
        assert_eq!(target.event_id, event_id);
    }
}

#[tokio::test]
async fn test_issued_code_scans_back_to_batch() {
    let ledger = LedgerBuilder::new(MemoryStore::new())
        .with_origin("https://trace.example")
        .build();
    let founding = ledger.append(fixtures::collection()).await.unwrap();
    let test = ledger
        .append(fixtures::passing_test(&founding.batch_id))
        .await
        .unwrap();

    let code = ledger.tracking_code(&test, RenderStyle::Print).unwrap();
    assert_eq!(
        code.tracking_text,
        format!(
            "https://trace.example/track/{}/{}",
            founding.batch_id, test.event_id
        )
    );
    assert_eq!(code.integrity_tag.len(), 64);
    assert!(code.code.svg.contains("<svg"));
    assert_eq!(code.code.style, RenderStyle::Print);

    let resolution = ledger.scan(&code.tracking_text).await.unwrap();
    assert_eq!(resolution.batch.batch_id, founding.batch_id);
    assert_eq!(resolution.events().len(), 2);
}

#[tokio::test]
async fn test_structured_payloads() {
    let ledger = memory_ledger();
    let founding = ledger.append(fixtures::collection()).await.unwrap();

    let with_batch = fixtures::structured_payload(Some("HERB-anything"), "EVT-1");
    let target = ledger.decode(&with_batch).await.unwrap();
    assert_eq!(target.batch_id.as_deref(), Some("HERB-anything"));
    assert_eq!(target.format, PayloadFormat::Structured);

    let without_batch = fixtures::structured_payload(None, &founding.event_id);
    let target = ledger.decode(&without_batch).await.unwrap();
    assert_eq!(target.batch_id.as_deref(), Some(founding.batch_id.as_str()));

    let err = ledger.decode(r#"{"batchId":"HERB-1"}"#).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidFormat);
}

#[tokio::test]
async fn test_direct_ids() {
    let ledger = memory_ledger();
    let founding = ledger.append(fixtures::collection()).await.unwrap();

    let target = ledger.decode(&founding.event_id).await.unwrap();
    assert_eq!(target.batch_id.as_deref(), Some(founding.batch_id.as_str()));
    assert_eq!(target.format, PayloadFormat::DirectId);

    let target = ledger.decode("  EVT-unknown  ").await.unwrap();
    assert_eq!(target.batch_id, None);
    assert_eq!(target.event_id, "EVT-unknown");

    let err = ledger.scan("EVT-unknown").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_unparseable_payloads() {
    let ledger = memory_ledger();
    for scanned in [
        "",
        "   ",
        "https://x/track/",
        "https://x/track//EVT-1",
        "https://x/track/HERB-1/EVT-1/extra",
    ] {
        let err = ledger.decode(scanned).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidFormat, "{scanned:?}");
    }
}
