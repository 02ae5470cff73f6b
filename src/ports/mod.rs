// Ports - Interface definitions (contracts) for every external collaborator

use std::ops::Range;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::domain::model::*;
use crate::error::EventCamResult;

/// One pull from a frame source
#[derive(Debug, Clone)]
pub enum SourceEvent {
    /// A decoded frame
    Frame(Frame),
    /// The frame at `index` could not be read; the index is consumed anyway
    ReadFailure { index: u64, message: String },
    /// No more frames will arrive
    EndOfStream,
}

/// Port for live or recorded frame acquisition.
///
/// `next_event` may block while waiting on the device; callers run it on a
/// blocking thread.
pub trait FrameSource: Send {
    /// Human readable stream name, used for logging and file naming
    fn name(&self) -> &str;

    /// Stream metadata, available before the first frame
    fn info(&self) -> StreamInfo;

    /// Pull the next frame, failure or end-of-stream marker
    fn next_event(&mut self) -> SourceEvent;
}

/// Port for per-frame inference.
///
/// Implementations must be pure with respect to the pipeline: one frame in,
/// one verdict out, no state carried between calls.
pub trait Classifier: Send + Sync {
    fn classify(&self, frame: &Frame) -> EventCamResult<Verdict>;
}

/// Parameters for opening one output file
#[derive(Debug, Clone)]
pub struct OutputRequest {
    pub path: PathBuf,
    pub info: StreamInfo,
}

/// An open output handle (segment or clip).
///
/// `finish` flushes and publishes the file; dropping an unfinished writer
/// must release its resources without leaving a corrupt file behind.
pub trait FrameWriter: Send {
    /// Final path the writer publishes to
    fn path(&self) -> &Path;

    fn write_frame(&mut self, frame: &Frame) -> EventCamResult<()>;

    fn frames_written(&self) -> u64;

    /// Flush, close and publish the output
    fn finish(self: Box<Self>) -> EventCamResult<PathBuf>;
}

/// Port for creating output handles
pub trait WriterFactory: Send + Sync {
    /// File extension (without dot) of produced files
    fn extension(&self) -> &str;

    fn open(&self, request: &OutputRequest) -> EventCamResult<Box<dyn FrameWriter>>;
}

/// Port for reading frames back out of finalized segments
pub trait SegmentReader: Send + Sync {
    /// Copy every recorded frame of `segment` whose index lies in `range`
    /// into `out`, in order. Returns the index of the last frame copied, or
    /// `None` when nothing was; a segment shorter than its window yields fewer
    /// frames rather than an error.
    fn copy_range(
        &self,
        segment: &SegmentRecord,
        range: Range<u64>,
        out: &mut dyn FrameWriter,
    ) -> EventCamResult<Option<u64>>;
}

/// Acknowledgement from an artifact sink
#[derive(Debug, Clone, PartialEq)]
pub struct SinkAck {
    /// Where the clip ended up, if it still exists
    pub location: Option<PathBuf>,
}

/// Port for downstream clip handling (classification folders, upload, discard)
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    fn name(&self) -> &str;

    /// Take ownership of a finished clip
    async fn accept(&self, clip: &Clip) -> EventCamResult<SinkAck>;
}
