// Synthetic source - Deterministic test pattern stream with scripted bright
// windows and injected read failures

use std::ops::Range;
use std::time::Instant;

use chrono::{DateTime, TimeZone, Utc};
use tracing::debug;

use crate::domain::model::{Frame, StreamInfo};
use crate::ports::{FrameSource, SourceEvent};

/// Pixel value of frames inside a bright window
pub const BRIGHT_LEVEL: u8 = 220;
/// Base pixel value of every other frame
pub const DARK_LEVEL: u8 = 20;

/// Generates frames without any device
pub struct SyntheticSource {
    name: String,
    info: StreamInfo,
    length: Option<u64>,
    bright: Vec<Range<u64>>,
    failures: Vec<u64>,
    origin: DateTime<Utc>,
    paced: bool,
    started: Option<Instant>,
    next: u64,
}

impl SyntheticSource {
    pub fn new(name: &str, info: StreamInfo) -> Self {
        Self {
            name: name.to_string(),
            info,
            length: None,
            bright: Vec::new(),
            failures: Vec::new(),
            origin: Utc::now(),
            paced: false,
            started: None,
            next: 0,
        }
    }

    /// Stop after `frames` frames; unbounded otherwise
    pub fn with_length(mut self, frames: u64) -> Self {
        self.length = Some(frames);
        self
    }

    /// Frames in `range` are bright (what `LumaClassifier` reports as positive)
    pub fn with_bright(mut self, range: Range<u64>) -> Self {
        self.bright.push(range);
        self
    }

    /// Reading frame `index` fails
    pub fn with_read_failure(mut self, index: u64) -> Self {
        self.failures.push(index);
        self
    }

    /// Timestamp of frame 0
    pub fn starting_at(mut self, origin: DateTime<Utc>) -> Self {
        self.origin = origin;
        self
    }

    /// Deliver frames in real time instead of as fast as possible
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    /// Fixed origin for reproducible file names
    pub fn fixed_origin() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    fn is_bright(&self, index: u64) -> bool {
        self.bright.iter().any(|r| r.contains(&index))
    }

    fn render(&self, index: u64) -> Frame {
        let level = if self.is_bright(index) {
            BRIGHT_LEVEL
        } else {
            DARK_LEVEL + (index % 16) as u8
        };
        let micros = index as i64 * 1_000_000 / self.info.fps as i64;
        Frame::new(
            index,
            self.origin + chrono::Duration::microseconds(micros),
            self.info.width,
            self.info.height,
            vec![level; self.info.frame_bytes()],
        )
    }

    fn wait_for(&mut self, index: u64) {
        let started = *self.started.get_or_insert_with(Instant::now);
        let due = started + self.info.frame_duration().mul_f64(index as f64);
        let now = Instant::now();
        if due > now {
            std::thread::sleep(due - now);
        }
    }
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn info(&self) -> StreamInfo {
        self.info
    }

    fn next_event(&mut self) -> SourceEvent {
        let index = self.next;
        if self.length.is_some_and(|len| index >= len) {
            debug!(stream = %self.name, frames = index, "Synthetic source exhausted");
            return SourceEvent::EndOfStream;
        }
        if self.paced {
            self.wait_for(index);
        }
        self.next += 1;

        if self.failures.contains(&index) {
            return SourceEvent::ReadFailure {
                index,
                message: "injected read failure".to_string(),
            };
        }
        SourceEvent::Frame(self.render(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_source_scripts_frames_and_failures() {
        let info = StreamInfo::new(10, 2, 2).unwrap();
        let mut source = SyntheticSource::new("cam", info)
            .with_length(5)
            .with_bright(1..3)
            .with_read_failure(3)
            .starting_at(SyntheticSource::fixed_origin());

        let mut events = Vec::new();
        loop {
            match source.next_event() {
                SourceEvent::EndOfStream => break,
                event => events.push(event),
            }
        }
        assert_eq!(events.len(), 5);
        match &events[1] {
            SourceEvent::Frame(frame) => {
                assert_eq!(frame.pixels()[0], BRIGHT_LEVEL);
                assert_eq!(frame.byte_len(), info.frame_bytes());
                assert_eq!(
                    frame.timestamp(),
                    SyntheticSource::fixed_origin() + chrono::Duration::milliseconds(100)
                );
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(events[3], SourceEvent::ReadFailure { index: 3, .. }));
        assert!(matches!(source.next_event(), SourceEvent::EndOfStream));
    }
}
