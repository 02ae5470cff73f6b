// Classifier adapters - Reference frame classifiers
//
// Real deployments plug a trained model in behind the `Classifier` port.
// These adapters cover the built-in brightness trigger and scripted verdicts.

use std::collections::HashSet;
use std::time::Duration;

use crate::domain::model::{Frame, Verdict};
use crate::error::{EventCamError, EventCamResult};
use crate::ports::Classifier;

/// Label reported for frames that look like an event
pub const EVENT_LABEL: u32 = 0;
/// Label reported for background frames; outside the default positive labels
pub const BACKGROUND_LABEL: u32 = 7;

/// Flags frames whose mean brightness reaches a threshold.
///
/// Confidence is the distance of the mean from the threshold, scaled so a
/// frame at full black or full white is reported with confidence 1.
#[derive(Debug, Clone, Copy)]
pub struct LumaClassifier {
    threshold: f32,
}

impl LumaClassifier {
    /// `threshold` is the mean pixel level in `(0, 1)` at which frames count
    pub fn new(threshold: f32) -> EventCamResult<Self> {
        if !(threshold > 0.0 && threshold < 1.0) {
            return Err(crate::domain::errors::DomainError::config(format!(
                "luma threshold must be in (0, 1) (got {})",
                threshold
            ))
            .into());
        }
        Ok(Self { threshold })
    }
}

impl Default for LumaClassifier {
    fn default() -> Self {
        Self { threshold: 0.5 }
    }
}

impl Classifier for LumaClassifier {
    fn classify(&self, frame: &Frame) -> EventCamResult<Verdict> {
        let pixels = frame.pixels();
        if pixels.is_empty() {
            return Err(EventCamError::ClassifierFailed {
                index: frame.index(),
                message: "frame has no pixels".to_string(),
            });
        }
        let sum: u64 = pixels.iter().map(|&p| p as u64).sum();
        let mean = sum as f32 / (pixels.len() as f32 * 255.0);

        let (label, confidence) = if mean >= self.threshold {
            (EVENT_LABEL, 0.5 + 0.5 * (mean - self.threshold) / (1.0 - self.threshold))
        } else {
            (BACKGROUND_LABEL, 0.5 + 0.5 * (self.threshold - mean) / self.threshold)
        };
        Ok(Verdict::new(label, confidence.clamp(0.0, 1.0))?)
    }
}

/// Replays a fixed verdict per frame index, for tests and dry runs
#[derive(Debug, Clone)]
pub struct ScriptedClassifier {
    verdicts: Vec<Verdict>,
    fallback: Verdict,
    failures: HashSet<u64>,
    delays: Vec<Duration>,
}

impl ScriptedClassifier {
    /// Frame `i` gets `verdicts[i]`; frames past the script get a confident negative
    pub fn new(verdicts: Vec<Verdict>) -> Self {
        Self {
            verdicts,
            fallback: Verdict {
                label: BACKGROUND_LABEL,
                confidence: 1.0,
            },
            failures: HashSet::new(),
            delays: Vec::new(),
        }
    }

    /// Script from positive/negative flags
    pub fn from_flags(flags: &[bool]) -> Self {
        let verdicts = flags
            .iter()
            .map(|&positive| Verdict {
                label: if positive { EVENT_LABEL } else { BACKGROUND_LABEL },
                confidence: 0.95,
            })
            .collect();
        Self::new(verdicts)
    }

    /// Classification of frame `index` fails
    pub fn failing_at(mut self, index: u64) -> Self {
        self.failures.insert(index);
        self
    }

    /// Frame `i` takes `delays[i % len]` to classify
    pub fn with_delays(mut self, delays: Vec<Duration>) -> Self {
        self.delays = delays;
        self
    }
}

impl Classifier for ScriptedClassifier {
    fn classify(&self, frame: &Frame) -> EventCamResult<Verdict> {
        let index = frame.index();
        if !self.delays.is_empty() {
            std::thread::sleep(self.delays[(index % self.delays.len() as u64) as usize]);
        }
        if self.failures.contains(&index) {
            return Err(EventCamError::ClassifierFailed {
                index,
                message: "scripted failure".to_string(),
            });
        }
        Ok(self
            .verdicts
            .get(index as usize)
            .copied()
            .unwrap_or(self.fallback))
    }
}
