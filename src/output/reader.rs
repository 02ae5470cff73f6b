//! Frame container reader and the re-cut segment reader built on it

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::domain::model::Frame;
use crate::domain::model::SegmentRecord;
use crate::error::{EventCamError, EventCamResult};
use crate::output::{ContainerHeader, HEADER_LEN};
use crate::ports::{FrameWriter, SegmentReader};

/// Sequential, seekable reader over a container file
pub struct ContainerReader {
    path: PathBuf,
    header: ContainerHeader,
    file: BufReader<File>,
    frame_count: u64,
    position: u64,
}

impl ContainerReader {
    pub fn open(path: &Path) -> EventCamResult<Self> {
        let invalid = |message: &str| EventCamError::InvalidContainer {
            path: path.display().to_string(),
            message: message.to_string(),
        };

        let file = File::open(path)?;
        let len = file.metadata()?.len();
        if len < HEADER_LEN {
            return Err(invalid("file is shorter than the container header"));
        }
        let mut file = BufReader::new(file);
        let header = ContainerHeader::read_from(&mut file)?
            .ok_or_else(|| invalid("missing container magic"))?;
        if header.bytes_per_frame == 0 || header.fps == 0 {
            return Err(invalid("header declares empty frames or zero fps"));
        }

        // A trailing partial record (writer cut off mid-frame) is ignored.
        let frame_count = (len - HEADER_LEN) / header.record_len();

        Ok(Self {
            path: path.to_path_buf(),
            header,
            file,
            frame_count,
            position: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    /// Number of complete frame records
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Position the cursor on record `offset`, clamped to the end of file
    pub fn seek_frame(&mut self, offset: u64) -> EventCamResult<()> {
        let offset = offset.min(self.frame_count);
        self.file
            .seek(SeekFrom::Start(self.header.record_offset(offset)))?;
        self.position = offset;
        Ok(())
    }

    /// Read the record under the cursor, `None` past the last complete record
    pub fn next_frame(&mut self) -> EventCamResult<Option<Frame>> {
        if self.position >= self.frame_count {
            return Ok(None);
        }

        let mut word = [0u8; 8];
        self.file.read_exact(&mut word)?;
        let index = u64::from_le_bytes(word);
        self.file.read_exact(&mut word)?;
        let micros = i64::from_le_bytes(word);
        let mut pixels = vec![0u8; self.header.bytes_per_frame as usize];
        self.file.read_exact(&mut pixels)?;
        self.position += 1;

        let timestamp = DateTime::<Utc>::from_timestamp_micros(micros).ok_or_else(|| {
            EventCamError::InvalidContainer {
                path: self.path.display().to_string(),
                message: format!("record {} has an out-of-range timestamp", index),
            }
        })?;

        Ok(Some(Frame::new(
            index,
            timestamp,
            self.header.width,
            self.header.height,
            pixels,
        )))
    }
}

/// Reads event ranges back out of finalized container segments
#[derive(Debug, Default, Clone)]
pub struct ContainerSegmentReader;

impl ContainerSegmentReader {
    pub fn new() -> Self {
        Self
    }
}

impl SegmentReader for ContainerSegmentReader {
    fn copy_range(
        &self,
        segment: &SegmentRecord,
        range: Range<u64>,
        out: &mut dyn FrameWriter,
    ) -> EventCamResult<Option<u64>> {
        let mut reader = ContainerReader::open(&segment.path).map_err(|e| EventCamError::SegmentReadFailed {
            path: segment.path.display().to_string(),
            message: e.to_string(),
        })?;

        // Without gaps, record n holds frame window_start + n; otherwise scan.
        if segment.contiguous {
            reader.seek_frame(range.start.saturating_sub(segment.window_start))?;
        }

        let mut copied = 0;
        let mut last = None;
        while let Some(frame) = reader.next_frame()? {
            if frame.index() < range.start {
                continue;
            }
            if frame.index() >= range.end {
                break;
            }
            out.write_frame(&frame)?;
            copied += 1;
            last = Some(frame.index());
        }

        debug!(
            segment = %segment.path.display(),
            start = range.start,
            end = range.end,
            copied,
            "Copied frames out of segment"
        );
        Ok(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::StreamInfo;
    use crate::output::ContainerWriter;
    use crate::ports::OutputRequest;
    use chrono::TimeZone;
    use std::io::Write;
    use tempfile::TempDir;

    fn info() -> StreamInfo {
        StreamInfo::new(10, 2, 2).unwrap()
    }

    fn frame(index: u64) -> Frame {
        let origin = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        Frame::new(
            index,
            origin + chrono::Duration::milliseconds(index as i64 * 100),
            2,
            2,
            vec![index as u8; 12],
        )
    }

    fn write_container(path: &Path, indices: impl IntoIterator<Item = u64>) {
        let request = OutputRequest { path: path.to_path_buf(), info: info() };
        let mut writer: Box<dyn FrameWriter> = Box::new(ContainerWriter::create(&request).unwrap());
        for index in indices {
            writer.write_frame(&frame(index)).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_reader_roundtrips_frames_and_seeks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seg.frames");
        write_container(&path, 40..50);

        let mut reader = ContainerReader::open(&path).unwrap();
        assert_eq!(reader.frame_count(), 10);
        assert_eq!(reader.header().stream_info(), info());

        reader.seek_frame(3).unwrap();
        let frame = reader.next_frame().unwrap().unwrap();
        assert_eq!(frame.index(), 43);
        assert_eq!(frame.pixels(), &[43u8; 12][..]);
        assert_eq!(frame.timestamp(), self::frame(43).timestamp());

        reader.seek_frame(100).unwrap();
        assert!(reader.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_reader_ignores_truncated_tail_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seg.frames");
        write_container(&path, 0..5);
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[1, 2, 3]).unwrap();
        drop(file);

        let reader = ContainerReader::open(&path).unwrap();
        assert_eq!(reader.frame_count(), 5);
    }

    #[test]
    fn test_reader_rejects_foreign_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"definitely not a frame container").unwrap();
        assert!(matches!(
            ContainerReader::open(&path),
            Err(EventCamError::InvalidContainer { .. })
        ));
    }

    #[test]
    fn test_dropped_writer_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seg.frames");
        let request = OutputRequest { path: path.clone(), info: info() };
        let mut writer = ContainerWriter::create(&request).unwrap();
        writer.write_frame(&frame(0)).unwrap();
        drop(writer);

        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_writer_rejects_wrong_frame_size() {
        let dir = TempDir::new().unwrap();
        let request = OutputRequest { path: dir.path().join("seg.frames"), info: info() };
        let mut writer = ContainerWriter::create(&request).unwrap();
        let odd = Frame::new(0, Utc::now(), 2, 2, vec![0; 5]);
        assert!(writer.write_frame(&odd).is_err());
    }

    #[test]
    fn test_copy_range_scans_segments_with_gaps() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seg.frames");
        // frames 13 and 14 were never recorded
        write_container(&path, (10..13).chain(15..20));

        let segment = SegmentRecord {
            id: 0,
            stream: "cam".to_string(),
            path: path.clone(),
            window_start: 10,
            window_end: 20,
            frames_written: 8,
            contiguous: false,
            start_timestamp: frame(10).timestamp(),
            end_timestamp: frame(20).timestamp(),
        };

        let out_path = dir.path().join("clip.frames");
        let request = OutputRequest { path: out_path.clone(), info: info() };
        let mut out: Box<dyn FrameWriter> = Box::new(ContainerWriter::create(&request).unwrap());
        let last = ContainerSegmentReader::new()
            .copy_range(&segment, 12..17, out.as_mut())
            .unwrap();
        out.finish().unwrap();

        assert_eq!(last, Some(16));
        let mut reader = ContainerReader::open(&out_path).unwrap();
        let mut indices = Vec::new();
        while let Some(frame) = reader.next_frame().unwrap() {
            indices.push(frame.index());
        }
        assert_eq!(indices, vec![12, 15, 16]);
    }
}
