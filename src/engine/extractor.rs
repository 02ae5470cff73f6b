//! Clip extraction
//!
//! Materializes one event range as one output file, either from frames the
//! aggregator buffered in memory or by copying them back out of finalized
//! segments.

use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::model::{Clip, EventRange, Frame, SegmentRecord, StreamInfo};
use crate::engine::aggregator::ConfirmedEvent;
use crate::error::{EventCamError, EventCamResult};
use crate::output::ClipNamer;
use crate::ports::{FrameWriter, OutputRequest, SegmentReader, WriterFactory};

pub struct ClipExtractor {
    info: StreamInfo,
    factory: Arc<dyn WriterFactory>,
    reader: Option<Arc<dyn SegmentReader>>,
    namer: ClipNamer,
}

impl ClipExtractor {
    pub fn new(
        info: StreamInfo,
        factory: Arc<dyn WriterFactory>,
        reader: Option<Arc<dyn SegmentReader>>,
        namer: ClipNamer,
    ) -> Self {
        Self {
            info,
            factory,
            reader,
            namer,
        }
    }

    /// Whether re-cut extraction is available
    pub fn can_recut(&self) -> bool {
        self.reader.is_some()
    }

    /// Write a buffered event in one open/close pair
    pub fn extract_buffered(&self, event: &ConfirmedEvent) -> EventCamResult<Clip> {
        let (id, mut writer) = self.open(&event.range)?;
        for frame in &event.frames {
            writer.write_frame(frame)?;
        }
        let end_index = event.frames.last().map(|f| f.index() + 1).unwrap_or(event.range.start_index);
        self.publish(id, writer, &event.range, end_index)
    }

    /// Cut `range` out of closed segments, concatenating across segment
    /// boundaries. Frames no segment covers are skipped; coverage ending
    /// early truncates the clip.
    pub fn extract_recut(&self, range: &EventRange, segments: &[SegmentRecord]) -> EventCamResult<Clip> {
        let reader = self
            .reader
            .as_ref()
            .ok_or_else(|| EventCamError::Domain(crate::domain::errors::DomainError::config(
                "re-cut extraction needs a segment reader",
            )))?;

        let (id, mut writer) = self.open(range)?;
        let mut cursor = range.start_index;
        let mut end_index = range.start_index;

        while cursor < range.end_index {
            // Among segments covering the cursor, the one reaching furthest
            // needs the fewest file switches.
            let covering = segments
                .iter()
                .filter(|s| s.covers(cursor))
                .max_by_key(|s| s.window_end);

            let Some(segment) = covering else {
                let next_start = segments
                    .iter()
                    .map(|s| s.window_start)
                    .filter(|&start| start > cursor && start < range.end_index)
                    .min();
                match next_start {
                    Some(start) => {
                        warn!(stream = %self.namer.stream(), from = cursor, to = start, "No segment covers frames, skipping");
                        cursor = start;
                        continue;
                    }
                    None => {
                        warn!(
                            stream = %self.namer.stream(),
                            event_start = range.start_index,
                            event_end = range.end_index,
                            truncated_at = cursor,
                            "Segments end before event, truncating clip"
                        );
                        break;
                    }
                }
            };

            let upto = segment.window_end.min(range.end_index);
            // A truncated segment keeps its nominal window; trust what was copied.
            if let Some(last) = reader.copy_range(segment, cursor..upto, writer.as_mut())? {
                end_index = last + 1;
            }
            cursor = upto;
        }

        self.publish(id, writer, range, end_index)
    }

    /// Write an arbitrary frame sequence as a clip of `range`
    pub fn extract_frames<'a>(
        &self,
        range: &EventRange,
        frames: impl IntoIterator<Item = &'a Frame>,
    ) -> EventCamResult<Clip> {
        let (id, mut writer) = self.open(range)?;
        let mut end_index = range.start_index;
        for frame in frames {
            writer.write_frame(frame)?;
            end_index = frame.index() + 1;
        }
        self.publish(id, writer, range, end_index)
    }

    fn open(&self, range: &EventRange) -> EventCamResult<(u64, Box<dyn FrameWriter>)> {
        let name = self
            .namer
            .allocate(&range.start_timestamp, &range.end_timestamp, range.start_index);
        let writer = self.factory.open(&OutputRequest {
            path: name.path,
            info: self.info,
        })?;
        Ok((name.id, writer))
    }

    fn publish(
        &self,
        id: u64,
        writer: Box<dyn FrameWriter>,
        range: &EventRange,
        end_index: u64,
    ) -> EventCamResult<Clip> {
        let frame_count = writer.frames_written();
        if frame_count == 0 {
            // Dropping the unfinished writer discards its output.
            return Err(EventCamError::EmptyClip {
                start: range.start_index,
                end: range.end_index,
            });
        }

        let path = writer.finish()?;
        info!(
            stream = %self.namer.stream(),
            clip = id,
            event_start = range.start_index,
            event_end = end_index,
            frames = frame_count,
            "Clip written: {}",
            path.display()
        );
        Ok(Clip {
            id,
            stream: self.namer.stream().to_string(),
            path,
            start_timestamp: range.start_timestamp,
            end_timestamp: range.end_timestamp,
            start_index: range.start_index,
            end_index,
            frame_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_output::MemoryWriterFactory;
    use crate::output::{ContainerReader, ContainerSegmentReader, ContainerWriterFactory, NamingScheme, SequenceGenerator};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn info() -> StreamInfo {
        StreamInfo::new(10, 2, 1).unwrap()
    }

    fn frame(index: u64) -> Frame {
        let origin = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        Frame::new(index, origin + chrono::Duration::milliseconds(index as i64 * 100), 2, 1, vec![index as u8; 6])
    }

    fn range(start: u64, end: u64) -> EventRange {
        EventRange {
            start_index: start,
            end_index: end,
            start_timestamp: frame(start).timestamp(),
            end_timestamp: frame(end - 1).timestamp(),
        }
    }

    fn namer(dir: &std::path::Path, kind: &str) -> ClipNamer {
        ClipNamer::new(dir.join(kind), "cam", "frames", NamingScheme::Indexed, SequenceGenerator::shared())
    }

    fn write_segment(factory: &dyn WriterFactory, namer: &ClipNamer, start: u64, end: u64) -> SegmentRecord {
        let name = namer.allocate(&frame(start).timestamp(), &frame(end).timestamp(), start);
        let mut writer = factory.open(&OutputRequest { path: name.path, info: info() }).unwrap();
        for i in start..end {
            writer.write_frame(&frame(i)).unwrap();
        }
        let frames_written = writer.frames_written();
        let path = writer.finish().unwrap();
        SegmentRecord {
            id: name.id,
            stream: "cam".to_string(),
            path,
            window_start: start,
            window_end: start + 10,
            frames_written,
            contiguous: true,
            start_timestamp: frame(start).timestamp(),
            end_timestamp: frame(start + 10).timestamp(),
        }
    }

    fn read_indices(path: &std::path::Path) -> Vec<u64> {
        let mut reader = ContainerReader::open(path).unwrap();
        let mut indices = Vec::new();
        while let Some(frame) = reader.next_frame().unwrap() {
            indices.push(frame.index());
        }
        indices
    }

    #[test]
    fn test_recut_concatenates_across_segment_boundary() {
        let dir = TempDir::new().unwrap();
        let factory: Arc<dyn WriterFactory> = Arc::new(ContainerWriterFactory::new());
        let segments_namer = namer(dir.path(), "segments");
        let segments = vec![
            write_segment(factory.as_ref(), &segments_namer, 0, 10),
            write_segment(factory.as_ref(), &segments_namer, 6, 16),
            write_segment(factory.as_ref(), &segments_namer, 12, 22),
        ];

        let extractor = ClipExtractor::new(
            info(),
            Arc::clone(&factory),
            Some(Arc::new(ContainerSegmentReader::new())),
            namer(dir.path(), "events"),
        );
        let clip = extractor.extract_recut(&range(4, 19), &segments).unwrap();

        assert_eq!(clip.frame_count, 15);
        assert_eq!((clip.start_index, clip.end_index), (4, 19));
        assert_eq!(read_indices(&clip.path), (4..19).collect::<Vec<_>>());
    }

    #[test]
    fn test_recut_truncates_when_segments_end_early() {
        let dir = TempDir::new().unwrap();
        let factory: Arc<dyn WriterFactory> = Arc::new(ContainerWriterFactory::new());
        let segments_namer = namer(dir.path(), "segments");
        // the stream stopped at frame 13
        let segments = vec![
            write_segment(factory.as_ref(), &segments_namer, 0, 10),
            write_segment(factory.as_ref(), &segments_namer, 6, 13),
        ];

        let extractor = ClipExtractor::new(
            info(),
            Arc::clone(&factory),
            Some(Arc::new(ContainerSegmentReader::new())),
            namer(dir.path(), "events"),
        );
        let clip = extractor.extract_recut(&range(8, 30), &segments).unwrap();

        assert_eq!(clip.frame_count, 5);
        assert_eq!((clip.start_index, clip.end_index), (8, 13));
        assert_eq!(read_indices(&clip.path), vec![8, 9, 10, 11, 12]);
    }

    #[test]
    fn test_recut_without_coverage_is_empty_and_leaves_no_file() {
        let memory = MemoryWriterFactory::default();
        let extractor = ClipExtractor::new(
            info(),
            Arc::new(memory.clone()),
            Some(Arc::new(memory.reader())),
            namer(std::path::Path::new("out"), "events"),
        );

        let result = extractor.extract_recut(&range(50, 60), &[]);
        assert!(matches!(result, Err(EventCamError::EmptyClip { start: 50, end: 60 })));
        assert!(memory.published().is_empty());
        assert_eq!(memory.live_writers(), 0);
    }

    #[test]
    fn test_buffered_extraction_writes_frames_in_order() {
        let memory = MemoryWriterFactory::default();
        let extractor = ClipExtractor::new(info(), Arc::new(memory.clone()), None, namer(std::path::Path::new("out"), "events"));
        let event = ConfirmedEvent {
            range: range(3, 9),
            frames: (3..9).map(frame).collect(),
        };

        let clip = extractor.extract_buffered(&event).unwrap();
        assert_eq!(clip.frame_count, 6);
        assert_eq!(memory.indices(&clip.path).unwrap(), vec![3, 4, 5, 6, 7, 8]);
        assert!(!extractor.can_recut());
        assert!(extractor.extract_recut(&range(3, 9), &[]).is_err());
    }
}
