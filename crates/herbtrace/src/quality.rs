//! The one definition of a passing quality test.
//!
//! A test passes when purity is at least [`QualityThresholds::min_purity`]
//! *and* pesticide residue is at most [`QualityThresholds::max_pesticide_ppm`].
//! Premium certification is granted exactly when the test passes; there is no
//! second, looser threshold.

use serde::{Deserialize, Serialize};

use crate::event::QualityTestData;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    /// Percent, inclusive.
    pub min_purity: f64,
    /// Parts per million, inclusive.
    pub max_pesticide_ppm: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_purity: 95.0,
            max_pesticide_ppm: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityStatus {
    Passed,
    AttentionRequired,
}

impl QualityStatus {
    pub fn label(&self) -> &'static str {
        match self {
            QualityStatus::Passed => "PASSED",
            QualityStatus::AttentionRequired => "ATTENTION REQUIRED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityAssessment {
    pub status: QualityStatus,
    pub premium_certified: bool,
    pub purity_ok: bool,
    pub pesticide_ok: bool,
}

impl QualityThresholds {
    pub fn assess(&self, test: &QualityTestData) -> QualityAssessment {
        let purity_ok = test.purity >= self.min_purity;
        let pesticide_ok = test.pesticide_level <= self.max_pesticide_ppm;
        let passed = purity_ok && pesticide_ok;

        QualityAssessment {
            status: if passed {
                QualityStatus::Passed
            } else {
                QualityStatus::AttentionRequired
            },
            premium_certified: passed,
            purity_ok,
            pesticide_ok,
        }
    }
}
