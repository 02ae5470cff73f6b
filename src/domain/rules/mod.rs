// Domain rules - Decide which classifier verdicts count as positive

use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainError;
use crate::domain::model::Verdict;

/// Maps a raw classifier verdict onto the binary signal the aggregator debounces.
///
/// Labels below `positive_label_bound` are event classes; everything else
/// (including confident event labels below the confidence floor) is negative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositiveRule {
    pub positive_label_bound: u32,
    pub min_confidence: f32,
}

impl PositiveRule {
    pub fn new(positive_label_bound: u32, min_confidence: f32) -> Result<Self, DomainError> {
        if positive_label_bound == 0 {
            return Err(DomainError::config(
                "positive_label_bound must be at least 1 or no label can ever be positive",
            ));
        }
        if !min_confidence.is_finite() || !(0.0..1.0).contains(&min_confidence) {
            return Err(DomainError::config(format!(
                "min_confidence must be in [0, 1) (got {})",
                min_confidence
            )));
        }
        Ok(Self {
            positive_label_bound,
            min_confidence,
        })
    }

    pub fn is_positive(&self, verdict: &Verdict) -> bool {
        verdict.label < self.positive_label_bound && verdict.confidence > self.min_confidence
    }
}

impl Default for PositiveRule {
    fn default() -> Self {
        Self {
            positive_label_bound: 4,
            min_confidence: 0.6,
        }
    }
}
