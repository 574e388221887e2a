//! Ledger configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bus::DEFAULT_BUS_CAPACITY;
use crate::quality::QualityThresholds;

pub const DEFAULT_ORIGIN: &str = "http://localhost:5173";

/// How the resolver's legacy fallback matches a token that is neither a
/// batch id nor an event id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegacyMatch {
    /// Scan all events; match a `parent_event_id` equal to the token, or an
    /// event id that contains the token. Compatible with single-id codes, but
    /// can pick an unintended batch when ids overlap textually.
    #[default]
    ParentOrSubstring,
    /// Indexed `parent_event_id` lookup only.
    ParentOnly,
}

impl LegacyMatch {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "parent_or_substring" => Some(LegacyMatch::ParentOrSubstring),
            "parent_only" => Some(LegacyMatch::ParentOnly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Origin of tracking URLs, without a trailing slash.
    pub origin: String,
    /// Timeout applied to every backing-store call.
    pub store_timeout_ms: u64,
    /// Attempts at the batch-summary write that follows an event save.
    pub summary_write_attempts: u32,
    pub legacy_match: LegacyMatch,
    pub bus_capacity: usize,
    pub quality: QualityThresholds,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            origin: DEFAULT_ORIGIN.to_string(),
            store_timeout_ms: 5_000,
            summary_write_attempts: 2,
            legacy_match: LegacyMatch::default(),
            bus_capacity: DEFAULT_BUS_CAPACITY,
            quality: QualityThresholds::default(),
        }
    }
}

impl LedgerConfig {
    /// Defaults overridden by `HERBTRACE_ORIGIN`, `HERBTRACE_STORE_TIMEOUT_MS`
    /// and `HERBTRACE_LEGACY_MATCH`. Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(origin) = std::env::var("HERBTRACE_ORIGIN") {
            config.origin = normalize_origin(&origin);
        }

        if let Ok(raw) = std::env::var("HERBTRACE_STORE_TIMEOUT_MS") {
            match raw.parse() {
                Ok(ms) => config.store_timeout_ms = ms,
                Err(_) => tracing::warn!(value = %raw, "ignoring HERBTRACE_STORE_TIMEOUT_MS"),
            }
        }

        if let Ok(raw) = std::env::var("HERBTRACE_LEGACY_MATCH") {
            match LegacyMatch::parse(&raw) {
                Some(mode) => config.legacy_match = mode,
                None => tracing::warn!(value = %raw, "ignoring HERBTRACE_LEGACY_MATCH"),
            }
        }

        config
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

pub(crate) fn normalize_origin(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_string()
}
