//! Scannable tracking codes.
//!
//! # Formats
//!
//! Current: `<origin>/track/<batchId>/<eventId>`, each segment
//! percent-encoded like a URI component.
//!
//! Legacy: `<origin>/track/<eventId>`. Still decodable; the batch comes from
//! the [`Resolver`].
//!
//! Decoding also accepts a JSON object carrying `eventId` (and usually
//! `batchId`), and finally bare text taken as an event id.
//!
//! The integrity tag produced on encode is advisory. Decode never checks it.

use chrono::{DateTime, Utc};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use qrcode::render::svg;
use qrcode::{EcLevel, QrCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::config::normalize_origin;
use crate::error::{LedgerError, Result};
use crate::event::{Event, EventType};
use crate::integrity::tag_document;
use crate::resolver::Resolver;
use crate::store::LedgerStore;

const TRACK_SEGMENT: &str = "/track/";
const ENVELOPE_VERSION: &str = "1.0";

/// Characters `encodeURIComponent` leaves alone.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Visual style of the rendered code. Both use error-correction level H.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderStyle {
    /// Product label: brand green on white, 400 px.
    #[default]
    Label,
    /// High-contrast print: black on white, 600 px.
    Print,
}

impl RenderStyle {
    fn dark(&self) -> &'static str {
        match self {
            RenderStyle::Label => "#2D5A27",
            RenderStyle::Print => "#000000",
        }
    }

    fn light(&self) -> &'static str {
        "#FFFFFF"
    }

    fn min_size(&self) -> u32 {
        match self {
            RenderStyle::Label => 400,
            RenderStyle::Print => 600,
        }
    }
}

/// A rendered 2D code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderableCode {
    /// Standalone SVG document.
    pub svg: String,
    /// Modules per side, excluding the quiet zone.
    pub modules: usize,
    pub style: RenderStyle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingCode {
    pub tracking_text: String,
    /// SHA-256 over `{url, batchId, eventId, type, timestamp, version}`.
    pub integrity_tag: String,
    pub code: RenderableCode,
    pub issued_at: DateTime<Utc>,
}

/// Shape of a scanned payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadFormat {
    TrackingUrl,
    LegacyTrackingUrl,
    Structured,
    DirectId,
}

/// Identifiers pulled out of scanned text, before any resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScannedPayload {
    Tracking { batch_id: String, event_id: String },
    LegacyTracking { event_id: String },
    Structured { batch_id: Option<String>, event_id: String },
    Direct { event_id: String },
}

impl ScannedPayload {
    pub fn format(&self) -> PayloadFormat {
        match self {
            ScannedPayload::Tracking { .. } => PayloadFormat::TrackingUrl,
            ScannedPayload::LegacyTracking { .. } => PayloadFormat::LegacyTrackingUrl,
            ScannedPayload::Structured { .. } => PayloadFormat::Structured,
            ScannedPayload::Direct { .. } => PayloadFormat::DirectId,
        }
    }
}

/// Result of [`TrackingCodec::decode`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanTarget {
    /// Absent only for structured or bare-id payloads that nothing resolves.
    pub batch_id: Option<String>,
    pub event_id: String,
    pub format: PayloadFormat,
}

#[derive(Debug, Clone)]
pub struct TrackingCodec {
    origin: String,
}

impl TrackingCodec {
    pub fn new(origin: impl AsRef<str>) -> Self {
        Self {
            origin: normalize_origin(origin.as_ref()),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// `<origin>/track/<batchId>/<eventId>`
    pub fn tracking_text(&self, batch_id: &str, event_id: &str) -> String {
        format!(
            "{}{TRACK_SEGMENT}{}/{}",
            self.origin,
            utf8_percent_encode(batch_id, COMPONENT),
            utf8_percent_encode(event_id, COMPONENT)
        )
    }

    pub fn encode(&self, batch_id: &str, event_id: &str) -> Result<TrackingCode> {
        self.encode_with(batch_id, event_id, None, RenderStyle::Label)
    }

    /// Encode an accepted event; the envelope also records its type.
    pub fn encode_event(&self, event: &Event, style: RenderStyle) -> Result<TrackingCode> {
        self.encode_with(&event.batch_id, &event.event_id, Some(event.event_type()), style)
    }

    fn encode_with(
        &self,
        batch_id: &str,
        event_id: &str,
        event_type: Option<EventType>,
        style: RenderStyle,
    ) -> Result<TrackingCode> {
        if batch_id.is_empty() || event_id.is_empty() {
            return Err(LedgerError::InvalidDraft(
                "tracking codes need both a batch id and an event id".into(),
            ));
        }

        let tracking_text = self.tracking_text(batch_id, event_id);
        let issued_at = Utc::now();
        let integrity_tag = tag_document(&json!({
            "url": tracking_text,
            "batchId": batch_id,
            "eventId": event_id,
            "type": event_type.map(|t| t.as_str()),
            "timestamp": issued_at.timestamp_millis(),
            "version": ENVELOPE_VERSION,
        }));
        let code = render(&tracking_text, style)?;

        Ok(TrackingCode {
            tracking_text,
            integrity_tag,
            code,
            issued_at,
        })
    }

    /// Render a printable code for an existing pair without a new envelope.
    pub fn printable(&self, batch_id: &str, event_id: &str) -> Result<RenderableCode> {
        render(&self.tracking_text(batch_id, event_id), RenderStyle::Print)
    }

    /// Extract identifiers from scanned text without touching the ledger.
    pub fn parse(&self, scanned: &str) -> Result<ScannedPayload> {
        let text = scanned.trim();
        if text.is_empty() {
            return Err(LedgerError::InvalidFormat("empty payload".into()));
        }

        // A JSON envelope may itself carry a tracking URL, so objects are
        // recognised before the URL shapes.
        if let Some(map) = json_object(text) {
            let field = |key: &str| {
                map.get(key)
                    .and_then(|v| v.as_str())
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            };

            return match (field("eventId"), field("url")) {
                (Some(event_id), _) => Ok(ScannedPayload::Structured {
                    batch_id: field("batchId"),
                    event_id,
                }),
                (None, Some(url)) if url.contains(TRACK_SEGMENT) => parse_tracking_url(&url),
                _ => Err(LedgerError::InvalidFormat(
                    "structured payload has no eventId".into(),
                )),
            };
        }

        if text.contains(TRACK_SEGMENT) {
            return parse_tracking_url(text);
        }

        Ok(ScannedPayload::Direct {
            event_id: text.to_string(),
        })
    }

    /// Decode scanned text into identifiers, resolving the batch where the
    /// payload doesn't carry one.
    ///
    /// A legacy tracking URL whose event is unknown fails with `NotFound`.
    /// Structured and bare-id payloads resolve best-effort and leave
    /// `batch_id` empty if nothing matches.
    pub async fn decode<S: LedgerStore>(
        &self,
        scanned: &str,
        resolver: &Resolver<S>,
    ) -> Result<ScanTarget> {
        let payload = self.parse(scanned)?;
        let format = payload.format();
        debug!(?format, "decoded tracking payload");

        let (batch_id, event_id) = match payload {
            ScannedPayload::Tracking { batch_id, event_id } => (Some(batch_id), event_id),
            ScannedPayload::Structured {
                batch_id: Some(batch_id),
                event_id,
            } => (Some(batch_id), event_id),
            // Only an exact, recorded event id is accepted here.
            ScannedPayload::LegacyTracking { event_id } => {
                let resolution = resolver.resolve_event(&event_id).await?;
                (Some(resolution.batch.batch_id), event_id)
            }
            ScannedPayload::Structured {
                batch_id: None,
                event_id,
            }
            | ScannedPayload::Direct { event_id } => match resolver.resolve(&event_id).await {
                Ok(resolution) => (Some(resolution.batch.batch_id), event_id),
                Err(LedgerError::NotFound { .. }) => (None, event_id),
                Err(e) => return Err(e),
            },
        };

        Ok(ScanTarget {
            batch_id,
            event_id,
            format,
        })
    }
}

fn json_object(text: &str) -> Option<serde_json::Map<String, serde_json::Value>> {
    if !text.starts_with('{') {
        return None;
    }
    match serde_json::from_str(text) {
        Ok(serde_json::Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn parse_tracking_url(text: &str) -> Result<ScannedPayload> {
    let path = text
        .split_once(TRACK_SEGMENT)
        .map(|(_, rest)| rest)
        .unwrap_or_default();
    let path = path.split(|c| c == '?' || c == '#').next().unwrap_or_default();
    let path = path.strip_suffix('/').unwrap_or(path);
    let segments: Vec<&str> = path.split('/').collect();

    match segments.as_slice() {
        [event_id] => {
            let event_id = decode_segment(event_id)?;
            if event_id.is_empty() {
                return Err(LedgerError::InvalidFormat("tracking URL has no event id".into()));
            }
            Ok(ScannedPayload::LegacyTracking { event_id })
        }
        [batch_id, event_id] => {
            let batch_id = decode_segment(batch_id)?;
            let event_id = decode_segment(event_id)?;
            if batch_id.is_empty() || event_id.is_empty() {
                return Err(LedgerError::InvalidFormat(
                    "tracking URL is missing its batch id or event id".into(),
                ));
            }
            Ok(ScannedPayload::Tracking { batch_id, event_id })
        }
        [] => Err(LedgerError::InvalidFormat("tracking URL has no path".into())),
        _ => Err(LedgerError::InvalidFormat(format!(
            "tracking URL has {} path segments, expected at most 2",
            segments.len()
        ))),
    }
}

fn decode_segment(segment: &str) -> Result<String> {
    percent_decode_str(segment)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|e| LedgerError::InvalidFormat(format!("segment is not valid UTF-8: {e}")))
}

fn render(text: &str, style: RenderStyle) -> Result<RenderableCode> {
    let code = QrCode::with_error_correction_level(text.as_bytes(), EcLevel::H)
        .map_err(|e| LedgerError::InvalidDraft(format!("cannot render tracking code: {e}")))?;

    let size = style.min_size();
    let svg = code
        .render::<svg::Color>()
        .min_dimensions(size, size)
        .quiet_zone(true)
        .dark_color(svg::Color(style.dark()))
        .light_color(svg::Color(style.light()))
        .build();

    Ok(RenderableCode {
        svg,
        modules: code.width(),
        style,
    })
}
