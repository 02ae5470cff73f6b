// Domain models - Core types and data structures

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainError;

/// Bytes per pixel of every frame flowing through the pipeline (packed RGB24)
pub const BYTES_PER_PIXEL: usize = 3;

/// One captured video frame.
///
/// Pixels are shared behind an `Arc` so the scheduler, the aggregator's live
/// buffer and classifier workers can all hold the same frame without copying.
/// Nothing in the crate mutates a frame after construction.
#[derive(Clone)]
pub struct Frame {
    index: u64,
    timestamp: DateTime<Utc>,
    width: u32,
    height: u32,
    pixels: Arc<[u8]>,
}

impl Frame {
    /// Create a frame from packed RGB24 pixels
    pub fn new(index: u64, timestamp: DateTime<Utc>, width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            index,
            timestamp,
            width,
            height,
            pixels: pixels.into(),
        }
    }

    /// Monotonic sequence index assigned by the source
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Capture timestamp
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Read-only pixel data
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }

    /// Same pixels and timestamp under a different sequence index
    pub fn with_index(&self, index: u64) -> Self {
        Self {
            index,
            ..self.clone()
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("timestamp", &self.timestamp)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Stream metadata a source exposes before its first frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
}

impl StreamInfo {
    /// Create new stream info with validation
    pub fn new(fps: u32, width: u32, height: u32) -> Result<Self, DomainError> {
        if fps == 0 {
            return Err(DomainError::config("fps must be positive"));
        }
        if width == 0 || height == 0 {
            return Err(DomainError::BadArgs("Frame dimensions cannot be zero".to_string()));
        }
        Ok(Self { fps, width, height })
    }

    /// Size in bytes of one packed frame
    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }

    /// Duration of a single frame
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps as f64)
    }
}

/// Convert a wall-clock duration into a whole number of frames
pub fn duration_to_frames(duration: Duration, fps: u32) -> u64 {
    (duration.as_secs_f64() * fps as f64).round() as u64
}

fn seconds_to_duration(label: &str, seconds: f64) -> Result<Duration, DomainError> {
    Duration::try_from_secs_f64(seconds)
        .map_err(|_| DomainError::config(format!("{} must be a finite, non-negative number of seconds (got {})", label, seconds)))
}

/// Longest segment accepted, in frames (a day at 240 fps fits comfortably)
pub const MAX_SEGMENT_FRAMES: u64 = 1 << 32;

/// Segment windowing parameters.
///
/// `step = duration - overlap` must be positive once expressed in frames;
/// anything else is rejected here rather than at runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentConfig {
    duration: Duration,
    overlap: Duration,
    fps: u32,
    duration_frames: u64,
    step_frames: u64,
}

impl SegmentConfig {
    pub fn new(duration: Duration, overlap: Duration, fps: u32) -> Result<Self, DomainError> {
        if fps == 0 {
            return Err(DomainError::config("fps must be positive"));
        }
        if duration.is_zero() {
            return Err(DomainError::config("segment duration must be positive"));
        }
        if overlap >= duration {
            return Err(DomainError::config(format!(
                "overlap ({:.3}s) must be shorter than duration ({:.3}s)",
                overlap.as_secs_f64(),
                duration.as_secs_f64()
            )));
        }

        let duration_frames = duration_to_frames(duration, fps);
        if duration_frames > MAX_SEGMENT_FRAMES {
            return Err(DomainError::config(format!(
                "segment duration ({:.3}s) exceeds {} frames at {} fps",
                duration.as_secs_f64(),
                MAX_SEGMENT_FRAMES,
                fps
            )));
        }
        let overlap_frames = duration_to_frames(overlap, fps);
        if duration_frames == 0 {
            return Err(DomainError::config("segment duration is shorter than one frame"));
        }
        if overlap_frames >= duration_frames {
            return Err(DomainError::config(
                "step interval rounds to zero frames at this fps",
            ));
        }

        Ok(Self {
            duration,
            overlap,
            fps,
            duration_frames,
            step_frames: duration_frames - overlap_frames,
        })
    }

    /// Build from the seconds-based configuration surface
    pub fn from_seconds(duration_seconds: f64, overlap_seconds: f64, fps: u32) -> Result<Self, DomainError> {
        let duration = seconds_to_duration("duration", duration_seconds)?;
        let overlap = seconds_to_duration("overlap", overlap_seconds)?;
        Self::new(duration, overlap, fps)
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn overlap(&self) -> Duration {
        self.overlap
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Wall-clock cadence at which new writer slots open
    pub fn step_interval(&self) -> Duration {
        self.duration - self.overlap
    }

    /// Frames in one full segment
    pub fn duration_frames(&self) -> u64 {
        self.duration_frames
    }

    /// Frames between two slot openings
    pub fn step_frames(&self) -> u64 {
        self.step_frames
    }

    /// Peak number of simultaneously open slots: `ceil(duration / step)`
    pub fn max_live_slots(&self) -> usize {
        self.duration_frames.div_ceil(self.step_frames) as usize
    }
}

/// Classifier output for a single frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub label: u32,
    pub confidence: f32,
}

impl Verdict {
    /// Create a verdict, rejecting confidences outside `[0, 1]`
    pub fn new(label: u32, confidence: f32) -> Result<Self, DomainError> {
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(DomainError::InvalidVerdict(format!(
                "confidence {} is outside [0, 1]",
                confidence
            )));
        }
        Ok(Self { label, confidence })
    }
}

/// Debounce parameters for turning per-frame verdicts into events
#[derive(Debug, Clone, PartialEq)]
pub struct EventPolicy {
    /// Longest positive run an event needs before it counts as confirmed
    pub min_consecutive_positive_to_confirm: u32,
    /// Consecutive negatives that end an active event
    pub end_negative_run: u32,
    /// Shortest emitted event, in frames
    pub min_event_frames: u64,
    /// Active events are cut and emitted once they reach this many frames
    pub max_event_frames: Option<u64>,
}

impl EventPolicy {
    pub fn new(
        min_consecutive_positive_to_confirm: u32,
        end_negative_run: u32,
        min_event_frames: u64,
        max_event_frames: Option<u64>,
    ) -> Result<Self, DomainError> {
        if min_consecutive_positive_to_confirm == 0 {
            return Err(DomainError::config(
                "min_consecutive_positive_to_confirm must be at least 1",
            ));
        }
        if end_negative_run == 0 {
            return Err(DomainError::config("end_negative_run must be at least 1"));
        }
        if let Some(max) = max_event_frames {
            if max == 0 || max < min_event_frames {
                return Err(DomainError::config(format!(
                    "max event length ({} frames) must be positive and not below the minimum ({} frames)",
                    max, min_event_frames
                )));
            }
        }
        Ok(Self {
            min_consecutive_positive_to_confirm,
            end_negative_run,
            min_event_frames,
            max_event_frames,
        })
    }

    /// Build from the seconds-based configuration surface
    pub fn from_seconds(
        min_consecutive_positive_to_confirm: u32,
        end_negative_run: u32,
        min_event_seconds: f64,
        max_event_seconds: Option<f64>,
        fps: u32,
    ) -> Result<Self, DomainError> {
        if fps == 0 {
            return Err(DomainError::config("fps must be positive"));
        }
        let min = duration_to_frames(seconds_to_duration("min event duration", min_event_seconds)?, fps);
        let max = match max_event_seconds {
            Some(seconds) => Some(duration_to_frames(
                seconds_to_duration("max event duration", seconds)?,
                fps,
            )),
            None => None,
        };
        Self::new(min_consecutive_positive_to_confirm, end_negative_run, min, max)
    }
}

/// Half-open frame range `[start_index, end_index)` of a finalized event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRange {
    pub start_index: u64,
    pub end_index: u64,
    pub start_timestamp: DateTime<Utc>,
    pub end_timestamp: DateTime<Utc>,
}

impl EventRange {
    pub fn len(&self) -> u64 {
        self.end_index.saturating_sub(self.start_index)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether two ranges share at least one frame index
    pub fn overlaps(&self, other: &EventRange) -> bool {
        self.start_index < other.end_index && other.start_index < self.end_index
    }
}

/// A finished event clip, handed to the artifact sink exactly once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub id: u64,
    pub stream: String,
    pub path: PathBuf,
    pub start_timestamp: DateTime<Utc>,
    pub end_timestamp: DateTime<Utc>,
    pub start_index: u64,
    pub end_index: u64,
    pub frame_count: u64,
}

/// A finalized, closed segment file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentRecord {
    pub id: u64,
    pub stream: String,
    pub path: PathBuf,
    pub window_start: u64,
    pub window_end: u64,
    pub frames_written: u64,
    /// True when every tick in the written span carried a frame
    pub contiguous: bool,
    pub start_timestamp: DateTime<Utc>,
    pub end_timestamp: DateTime<Utc>,
}

impl SegmentRecord {
    /// Whether `index` falls inside this segment's window
    pub fn covers(&self, index: u64) -> bool {
        self.window_start <= index && index < self.window_end
    }
}

/// How event clips are materialized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureMode {
    /// Buffer event frames in memory and write them out on close
    #[default]
    LiveBuffer,
    /// Cut events back out of the finalized segment files
    ReCut,
}

impl CaptureMode {
    /// Parse capture mode from string
    pub fn parse(mode_str: &str) -> Result<Self, DomainError> {
        match mode_str.trim().to_lowercase().as_str() {
            "live-buffer" | "live" | "buffer" => Ok(CaptureMode::LiveBuffer),
            "re-cut" | "recut" => Ok(CaptureMode::ReCut),
            _ => Err(DomainError::BadArgs(format!(
                "Invalid capture mode: {}. Valid modes: live-buffer, re-cut",
                mode_str
            ))),
        }
    }
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureMode::LiveBuffer => write!(f, "live-buffer"),
            CaptureMode::ReCut => write!(f, "re-cut"),
        }
    }
}

/// Maps frame indices to wall-clock time for ticks that carried no frame.
///
/// Anchored on the most recent real frame and extrapolated at the nominal fps.
#[derive(Debug, Clone)]
pub struct StreamClock {
    fps: u32,
    anchor: Option<(u64, DateTime<Utc>)>,
}

impl StreamClock {
    pub fn new(fps: u32) -> Self {
        Self { fps, anchor: None }
    }

    /// Re-anchor on an observed frame
    pub fn observe(&mut self, frame: &Frame) {
        self.anchor = Some((frame.index(), frame.timestamp()));
    }

    /// Best estimate of the capture time of `index`
    pub fn timestamp_for(&self, index: u64) -> DateTime<Utc> {
        match self.anchor {
            Some((anchor_index, anchor_ts)) => {
                let delta_frames = index as i64 - anchor_index as i64;
                let micros = delta_frames * 1_000_000 / self.fps.max(1) as i64;
                anchor_ts + chrono::Duration::microseconds(micros)
            }
            None => Utc::now(),
        }
    }
}
