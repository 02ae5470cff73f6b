//! Overlapping segment scheduler
//!
//! Keeps `ceil(duration / step)` writer slots alive, each covering a window of
//! `duration` frames, with a new window opening every `step` frames. Every
//! tick runs open, close, write, advance in that order; closing before
//! writing guarantees a slot never receives the frame that ends its window.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::domain::model::{Frame, SegmentConfig, SegmentRecord, StreamClock, StreamInfo};
use crate::error::EventCamError;
use crate::output::ClipNamer;
use crate::ports::{FrameWriter, OutputRequest, WriterFactory};

/// One open segment writer
struct WriterSlot {
    id: u64,
    window_start: u64,
    window_end: u64,
    start_timestamp: DateTime<Utc>,
    end_timestamp: DateTime<Utc>,
    writer: Box<dyn FrameWriter>,
    next_expected: u64,
    contiguous: bool,
}

impl WriterSlot {
    fn accepts(&self, index: u64) -> bool {
        self.window_start <= index && index < self.window_end
    }

    fn write(&mut self, frame: &Frame) -> Result<(), EventCamError> {
        if frame.index() != self.next_expected {
            self.contiguous = false;
        }
        self.writer.write_frame(frame)?;
        self.next_expected = frame.index() + 1;
        Ok(())
    }
}

/// What a single tick did
#[derive(Debug, Default)]
pub struct TickOutcome {
    /// Id of the slot opened on this tick
    pub opened: Option<u64>,
    /// Segments finalized on this tick
    pub closed: Vec<SegmentRecord>,
    /// Slot-local failures; the affected slot was skipped or dropped
    pub failures: Vec<EventCamError>,
    /// Number of slots the frame was written to
    pub written_to: usize,
}

/// Rotates overlapping segment writers over one stream
pub struct SegmentScheduler {
    config: SegmentConfig,
    info: StreamInfo,
    factory: Arc<dyn WriterFactory>,
    namer: ClipNamer,
    slots: VecDeque<WriterSlot>,
    frame_index: u64,
    clock: StreamClock,
}

impl SegmentScheduler {
    pub fn new(
        config: SegmentConfig,
        info: StreamInfo,
        factory: Arc<dyn WriterFactory>,
        namer: ClipNamer,
    ) -> Self {
        let clock = StreamClock::new(info.fps);
        Self {
            config,
            info,
            factory,
            namer,
            slots: VecDeque::new(),
            frame_index: 0,
            clock,
        }
    }

    pub fn config(&self) -> &SegmentConfig {
        &self.config
    }

    /// Index the next tick will process
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn live_slots(&self) -> usize {
        self.slots.len()
    }

    /// `[start, end)` windows of the live slots, oldest first
    pub fn live_windows(&self) -> Vec<(u64, u64)> {
        self.slots.iter().map(|s| (s.window_start, s.window_end)).collect()
    }

    /// Process one frame index. `None` means the tick carried no frame (the
    /// source failed to read it); slots still open and close on schedule.
    pub fn tick(&mut self, frame: Option<&Frame>) -> TickOutcome {
        let index = self.frame_index;
        let mut outcome = TickOutcome::default();

        if let Some(frame) = frame {
            debug_assert_eq!(frame.index(), index, "scheduler fed out of order");
            self.clock.observe(frame);
        }

        if index % self.config.step_frames() == 0 {
            let start_timestamp = frame.map(Frame::timestamp).unwrap_or_else(|| self.clock.timestamp_for(index));
            match self.open_slot(index, start_timestamp) {
                Ok(slot) => {
                    outcome.opened = Some(slot.id);
                    self.slots.push_back(slot);
                }
                Err(e) => {
                    warn!(stream = %self.namer.stream(), window_start = index, "{}", e);
                    outcome.failures.push(e);
                }
            }
        }

        // Windows share one length, so expired slots are always at the front.
        while self.slots.front().is_some_and(|s| s.window_end <= index) {
            if let Some(slot) = self.slots.pop_front() {
                self.finish_slot(slot, &mut outcome);
            }
        }

        if let Some(frame) = frame {
            let mut i = 0;
            while i < self.slots.len() {
                let slot = &mut self.slots[i];
                if !slot.accepts(index) {
                    i += 1;
                    continue;
                }
                match slot.write(frame) {
                    Ok(()) => {
                        outcome.written_to += 1;
                        i += 1;
                    }
                    Err(e) => {
                        let failed = self.slots.remove(i);
                        let slot_id = failed.as_ref().map(|s| s.id).unwrap_or_default();
                        let error = EventCamError::WriterWriteFailed {
                            slot: slot_id,
                            message: e.to_string(),
                        };
                        warn!(stream = %self.namer.stream(), slot = slot_id, "{}", error);
                        outcome.failures.push(error);
                    }
                }
            }
        }

        self.frame_index += 1;
        outcome
    }

    /// Close and publish every live slot, truncating their windows
    pub fn close_all(&mut self) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        while let Some(mut slot) = self.slots.pop_front() {
            if slot.next_expected < slot.window_end {
                slot.end_timestamp = self.clock.timestamp_for(slot.next_expected);
            }
            self.finish_slot(slot, &mut outcome);
        }
        outcome
    }

    fn open_slot(&self, index: u64, start_timestamp: DateTime<Utc>) -> Result<WriterSlot, EventCamError> {
        let window_end = index.saturating_add(self.config.duration_frames());
        let end_timestamp = start_timestamp
            + chrono::Duration::from_std(self.config.duration()).unwrap_or_else(|_| chrono::Duration::zero());
        let name = self.namer.allocate(&start_timestamp, &end_timestamp, index);
        let request = OutputRequest {
            path: name.path.clone(),
            info: self.info,
        };
        let writer = self
            .factory
            .open(&request)
            .map_err(|e| EventCamError::WriterOpenFailed {
                slot: name.id,
                path: name.path.display().to_string(),
                message: e.to_string(),
            })?;

        debug!(
            stream = %self.namer.stream(),
            slot = name.id,
            window_start = index,
            window_end,
            path = %name.path.display(),
            "Opened segment slot"
        );
        Ok(WriterSlot {
            id: name.id,
            window_start: index,
            window_end,
            start_timestamp,
            end_timestamp,
            writer,
            next_expected: index,
            contiguous: true,
        })
    }

    fn finish_slot(&self, slot: WriterSlot, outcome: &mut TickOutcome) {
        let frames_written = slot.writer.frames_written();
        let id = slot.id;
        match slot.writer.finish() {
            Ok(path) => {
                info!(
                    stream = %self.namer.stream(),
                    slot = id,
                    window_start = slot.window_start,
                    window_end = slot.window_end,
                    frames = frames_written,
                    "Segment closed: {}",
                    path.display()
                );
                outcome.closed.push(SegmentRecord {
                    id,
                    stream: self.namer.stream().to_string(),
                    path,
                    window_start: slot.window_start,
                    window_end: slot.window_end,
                    frames_written,
                    contiguous: slot.contiguous,
                    start_timestamp: slot.start_timestamp,
                    end_timestamp: slot.end_timestamp,
                });
            }
            Err(e) => {
                let error = EventCamError::WriterWriteFailed {
                    slot: id,
                    message: e.to_string(),
                };
                warn!(stream = %self.namer.stream(), slot = id, "{}", error);
                outcome.failures.push(error);
            }
        }
    }
}

impl Drop for SegmentScheduler {
    fn drop(&mut self) {
        if !self.slots.is_empty() {
            debug!(
                stream = %self.namer.stream(),
                slots = self.slots.len(),
                "Scheduler dropped with live slots, closing them"
            );
            self.close_all();
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_output::MemoryWriterFactory;
    use crate::output::{NamingScheme, SequenceGenerator};
    use chrono::TimeZone;
    use std::collections::HashSet;

    fn frame(index: u64, fps: u32) -> Frame {
        let origin = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let micros = index as i64 * 1_000_000 / fps as i64;
        Frame::new(index, origin + chrono::Duration::microseconds(micros), 1, 1, vec![0; 3])
    }

    fn scheduler(duration: f64, overlap: f64, fps: u32, factory: &MemoryWriterFactory) -> SegmentScheduler {
        let config = SegmentConfig::from_seconds(duration, overlap, fps).unwrap();
        let info = StreamInfo::new(fps, 1, 1).unwrap();
        let namer = ClipNamer::new("segments", "cam", "frames", NamingScheme::Indexed, SequenceGenerator::shared());
        SegmentScheduler::new(config, info, Arc::new(factory.clone()), namer)
    }

    #[test]
    fn test_ten_seven_ten_keeps_four_slots_before_first_close() {
        let factory = MemoryWriterFactory::default();
        let mut scheduler = scheduler(10.0, 7.0, 10, &factory);

        for i in 0..100 {
            let outcome = scheduler.tick(Some(&frame(i, 10)));
            assert!(outcome.closed.is_empty(), "nothing closes before frame 100");
            if (90..100).contains(&i) {
                assert_eq!(scheduler.live_slots(), 4, "frame {}", i);
            }
            if [0, 30, 60, 90].contains(&i) {
                assert!(outcome.opened.is_some(), "frame {} opens a slot", i);
            }
        }
        assert_eq!(scheduler.live_windows(), vec![(0, 100), (30, 130), (60, 160), (90, 190)]);

        let outcome = scheduler.tick(Some(&frame(100, 10)));
        assert_eq!(outcome.closed.len(), 1);
        assert_eq!(outcome.closed[0].window_start, 0);
        assert_eq!(outcome.closed[0].frames_written, 100);
        assert!(outcome.opened.is_none());
        assert_eq!(outcome.written_to, 3);
        assert_eq!(scheduler.live_slots(), 3);

        for i in 101..=120 {
            scheduler.tick(Some(&frame(i, 10)));
        }
        assert_eq!(scheduler.live_windows(), vec![(30, 130), (60, 160), (90, 190), (120, 220)]);
    }

    #[test]
    fn test_slot_count_coverage_and_segment_lengths_hold_across_configs() {
        let configs = [
            (10.0, 7.0, 10),
            (10.0, 0.0, 5),
            (4.0, 3.5, 4),
            (6.0, 2.0, 3),
            (3.0, 1.0, 25),
            (7.0, 3.0, 2),
            (9.0, 6.0, 10),
            (10.0, 5.0, 10),
            (6.0, 4.0, 5),
        ];
        for &(duration, overlap, fps) in &configs {
            let factory = MemoryWriterFactory::default();
            let mut scheduler = scheduler(duration, overlap, fps, &factory);
            let config = scheduler.config().clone();
            let peak = config.max_live_slots();
            let step_divides = config.duration_frames() % config.step_frames() == 0;
            let length = config.duration_frames() * 4 + 3;

            let mut writes = vec![0u32; length as usize];
            let mut closed = Vec::new();
            let mut saw_peak = false;
            for i in 0..length {
                let outcome = scheduler.tick(Some(&frame(i, fps)));
                assert!(scheduler.live_slots() <= peak);
                if i >= config.duration_frames() {
                    if step_divides {
                        assert_eq!(scheduler.live_slots(), peak, "slot count drifted at {}", i);
                    } else {
                        assert!(scheduler.live_slots() >= peak - 1, "coverage gap at {}", i);
                    }
                }
                saw_peak |= scheduler.live_slots() == peak;
                writes[i as usize] += outcome.written_to as u32;
                closed.extend(outcome.closed);
            }
            assert!(saw_peak);
            assert!(writes.iter().all(|&w| w >= 1), "every frame lands in a segment");

            for record in &closed {
                assert_eq!(record.frames_written, config.duration_frames());
                assert!(record.contiguous);
            }
            let tail = scheduler.close_all().closed;
            assert!(tail.iter().all(|r| r.frames_written <= config.duration_frames()));
            assert_eq!(factory.live_writers(), 0);
        }
    }

    #[test]
    fn test_open_failure_skips_only_that_slot() {
        let factory = MemoryWriterFactory::default().fail_open(1);
        let mut scheduler = scheduler(10.0, 7.0, 10, &factory);

        let mut failures = Vec::new();
        for i in 0..40 {
            failures.extend(scheduler.tick(Some(&frame(i, 10))).failures);
        }
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0], EventCamError::WriterOpenFailed { .. }));
        assert_eq!(scheduler.live_windows(), vec![(0, 100)]);
    }

    #[test]
    fn test_write_failure_drops_slot_once_and_keeps_others() {
        let factory = MemoryWriterFactory::default().fail_write(0, 5);
        let mut scheduler = scheduler(10.0, 7.0, 10, &factory);

        let mut failures = Vec::new();
        for i in 0..35 {
            failures.extend(scheduler.tick(Some(&frame(i, 10))).failures);
        }
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0], EventCamError::WriterWriteFailed { .. }));
        assert_eq!(scheduler.live_windows(), vec![(30, 130)]);
        // the dropped writer published nothing
        assert_eq!(factory.live_writers(), 1);
        assert!(factory.published().is_empty());
    }

    #[test]
    fn test_missing_frames_keep_schedule_and_mark_segments_gapped() {
        let factory = MemoryWriterFactory::default();
        let mut scheduler = scheduler(2.0, 1.0, 5, &factory);

        let mut closed = Vec::new();
        for i in 0..16 {
            let frame = frame(i, 5);
            closed.extend(scheduler.tick(if i == 7 { None } else { Some(&frame) }).closed);
        }
        let windows: Vec<_> = closed.iter().map(|r| (r.window_start, r.contiguous, r.frames_written)).collect();
        assert_eq!(windows, vec![(0, false, 9), (5, false, 9)]);
        assert_eq!(factory.indices(&closed[1].path).unwrap(), vec![5, 6, 8, 9, 10, 11, 12, 13, 14]);
    }

    #[test]
    fn test_close_all_flushes_every_live_slot() {
        let factory = MemoryWriterFactory::default();
        let mut scheduler = scheduler(10.0, 7.0, 10, &factory);
        for i in 0..45 {
            scheduler.tick(Some(&frame(i, 10)));
        }
        assert_eq!(scheduler.live_slots(), 2);

        let outcome = scheduler.close_all();
        assert_eq!(outcome.closed.len(), 2);
        assert_eq!(outcome.closed[0].frames_written, 45);
        assert_eq!(outcome.closed[1].frames_written, 15);
        assert_eq!(scheduler.live_slots(), 0);
        assert_eq!(factory.live_writers(), 0);

        let paths: HashSet<_> = factory.published().into_iter().collect();
        assert_eq!(paths.len(), 2);
    }

    #[test]
    fn test_dropping_scheduler_publishes_open_slots() {
        let factory = MemoryWriterFactory::default();
        {
            let mut scheduler = scheduler(10.0, 7.0, 10, &factory);
            for i in 0..5 {
                scheduler.tick(Some(&frame(i, 10)));
            }
        }
        assert_eq!(factory.published().len(), 1);
        assert_eq!(factory.live_writers(), 0);
    }
}
