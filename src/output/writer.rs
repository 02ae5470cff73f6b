//! Frame container writer

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::domain::model::Frame;
use crate::error::{EventCamError, EventCamResult};
use crate::output::{ContainerHeader, CONTAINER_EXTENSION};
use crate::ports::{FrameWriter, OutputRequest, WriterFactory};
use crate::utils::path::{ensure_directory, parent_or_current};

/// Writes frames into a container file.
///
/// Data goes to a hidden temporary file next to the target and is renamed
/// into place by `finish`. Dropping an unfinished writer deletes the
/// temporary file, so readers never observe a half-written container.
pub struct ContainerWriter {
    path: PathBuf,
    header: ContainerHeader,
    file: Option<BufWriter<NamedTempFile>>,
    frames_written: u64,
}

impl ContainerWriter {
    /// Create a writer publishing to `request.path`
    pub fn create(request: &OutputRequest) -> EventCamResult<Self> {
        let dir = parent_or_current(&request.path);
        ensure_directory(&dir)?;

        let temp = tempfile::Builder::new()
            .prefix(".partial_")
            .suffix(&format!(".{}", CONTAINER_EXTENSION))
            .tempfile_in(&dir)?;
        let header = ContainerHeader::from_info(&request.info);
        let mut file = BufWriter::new(temp);
        header.write_to(&mut file)?;

        debug!(path = %request.path.display(), "Opened container writer");
        Ok(Self {
            path: request.path.clone(),
            header,
            file: Some(file),
            frames_written: 0,
        })
    }
}

fn closed_error(path: &Path) -> EventCamError {
    EventCamError::InvalidContainer {
        path: path.display().to_string(),
        message: "writer already closed".to_string(),
    }
}

impl FrameWriter for ContainerWriter {
    fn path(&self) -> &Path {
        &self.path
    }

    fn write_frame(&mut self, frame: &Frame) -> EventCamResult<()> {
        if frame.byte_len() != self.header.bytes_per_frame as usize {
            return Err(EventCamError::InvalidContainer {
                path: self.path.display().to_string(),
                message: format!(
                    "frame {} has {} bytes, container expects {}",
                    frame.index(),
                    frame.byte_len(),
                    self.header.bytes_per_frame
                ),
            });
        }
        let file = self.file.as_mut().ok_or_else(|| closed_error(&self.path))?;
        file.write_all(&frame.index().to_le_bytes())?;
        file.write_all(&frame.timestamp().timestamp_micros().to_le_bytes())?;
        file.write_all(frame.pixels())?;
        self.frames_written += 1;
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames_written
    }

    fn finish(mut self: Box<Self>) -> EventCamResult<PathBuf> {
        let file = self.file.take().ok_or_else(|| closed_error(&self.path))?;
        let temp = file.into_inner().map_err(|e| e.into_error())?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| e.error)?;
        debug!(path = %self.path.display(), frames = self.frames_written, "Published container");
        Ok(self.path.clone())
    }
}

/// Factory for container writers
#[derive(Debug, Default, Clone)]
pub struct ContainerWriterFactory;

impl ContainerWriterFactory {
    pub fn new() -> Self {
        Self
    }
}

impl WriterFactory for ContainerWriterFactory {
    fn extension(&self) -> &str {
        CONTAINER_EXTENSION
    }

    fn open(&self, request: &OutputRequest) -> EventCamResult<Box<dyn FrameWriter>> {
        Ok(Box::new(ContainerWriter::create(request)?))
    }
}
