//! Error handling module for EventCam

use thiserror::Error;

use crate::domain::errors::DomainError;

/// Main error type for EventCam operations
#[derive(Error, Debug)]
pub enum EventCamError {
    /// Frame source has no more frames; a clean end, not a failure
    #[error("Frame source exhausted")]
    SourceExhausted,

    /// One frame could not be read or decoded
    #[error("Failed to read frame {index}: {message}")]
    SourceReadFailure { index: u64, message: String },

    /// A writer slot's output could not be opened
    #[error("Failed to open writer for slot {slot} ({path}): {message}")]
    WriterOpenFailed {
        slot: u64,
        path: String,
        message: String,
    },

    /// A writer slot failed mid-segment and was dropped
    #[error("Writer for slot {slot} failed: {message}")]
    WriterWriteFailed { slot: u64, message: String },

    /// The artifact sink refused a clip; the clip file is kept on disk
    #[error("Sink rejected clip {path}: {message}")]
    SinkRejected { path: String, message: String },

    /// Classifier inference failed for one frame
    #[error("Classifier failed on frame {index}: {message}")]
    ClassifierFailed { index: u64, message: String },

    /// A finalized segment could not be read back
    #[error("Failed to read segment {path}: {message}")]
    SegmentReadFailed { path: String, message: String },

    /// A file is not a valid frame container
    #[error("Invalid frame container {path}: {message}")]
    InvalidContainer { path: String, message: String },

    /// An event range mapped onto zero recorded frames
    #[error("Clip for frames {start}..{end} has no recorded frames")]
    EmptyClip { start: u64, end: u64 },

    /// Validation failure from the domain layer
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// FFmpeg error
    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg error: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),
}

impl EventCamError {
    /// Whether the pipeline must not start (or must stop) because of this error
    pub fn is_fatal(&self) -> bool {
        match self {
            EventCamError::Domain(e) => e.is_config_invalid(),
            _ => false,
        }
    }
}

/// Result type alias for EventCam operations
pub type EventCamResult<T> = std::result::Result<T, EventCamError>;
