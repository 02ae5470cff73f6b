// Container source - Replays a recorded frame container as a live stream

use std::path::Path;

use tracing::{info, warn};

use crate::domain::model::StreamInfo;
use crate::error::EventCamResult;
use crate::output::ContainerReader;
use crate::ports::{FrameSource, SourceEvent};

/// Replays a `.frames` file. Indices are rebased so the first recorded frame
/// becomes 0; gaps in the recording stay gaps.
pub struct ContainerSource {
    name: String,
    reader: ContainerReader,
    base: Option<u64>,
    next: u64,
    failed: bool,
}

impl ContainerSource {
    pub fn open(path: &Path) -> EventCamResult<Self> {
        let reader = ContainerReader::open(path)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "replay".to_string());
        info!(
            stream = %name,
            frames = reader.frame_count(),
            "Replaying {}",
            path.display()
        );
        Ok(Self {
            name,
            reader,
            base: None,
            next: 0,
            failed: false,
        })
    }

    /// Replace the stream name derived from the file name
    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }
}

impl FrameSource for ContainerSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn info(&self) -> StreamInfo {
        self.reader.header().stream_info()
    }

    fn next_event(&mut self) -> SourceEvent {
        if self.failed {
            return SourceEvent::EndOfStream;
        }
        match self.reader.next_frame() {
            Ok(Some(frame)) => {
                let base = *self.base.get_or_insert(frame.index());
                let index = frame.index().saturating_sub(base);
                self.next = index + 1;
                SourceEvent::Frame(frame.with_index(index))
            }
            Ok(None) => SourceEvent::EndOfStream,
            Err(e) => {
                // A damaged record leaves the read position unknown; stop here.
                warn!(stream = %self.name, "Replay stopped: {}", e);
                self.failed = true;
                SourceEvent::ReadFailure {
                    index: self.next,
                    message: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::Frame;
    use crate::output::ContainerWriter;
    use crate::ports::{FrameWriter, OutputRequest};
    use chrono::Utc;
    use tempfile::TempDir;

    #[test]
    fn test_replay_rebases_indices_and_keeps_gaps() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cam.frames");
        let info = StreamInfo::new(5, 1, 1).unwrap();
        let mut writer: Box<dyn FrameWriter> =
            Box::new(ContainerWriter::create(&OutputRequest { path: path.clone(), info }).unwrap());
        for index in [300, 301, 303] {
            writer.write_frame(&Frame::new(index, Utc::now(), 1, 1, vec![9; 3])).unwrap();
        }
        writer.finish().unwrap();

        let mut source = ContainerSource::open(&path).unwrap();
        assert_eq!(source.name(), "cam");
        assert_eq!(source.info(), info);

        let mut indices = Vec::new();
        while let SourceEvent::Frame(frame) = source.next_event() {
            indices.push(frame.index());
        }
        assert_eq!(indices, vec![0, 1, 3]);
    }
}
