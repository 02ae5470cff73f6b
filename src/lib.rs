//! EventCam Library
//!
//! Records frame streams as overlapping fixed-length segments while a
//! classifier labels every frame, debounces the labels into events and
//! extracts each confirmed event as its own clip.

pub mod adapters;
pub mod app;
pub mod cli;
pub mod config_initialization;
pub mod domain;
pub mod engine;
pub mod error;
pub mod output;
pub mod ports;
pub mod utils;

// Re-export commonly used types
pub use domain::errors::DomainError;
pub use domain::model::{CaptureMode, Clip, EventPolicy, EventRange, Frame, SegmentConfig, SegmentRecord, StreamInfo, Verdict};
pub use engine::{ClipExtractor, EventAggregator, SegmentScheduler, StreamPipeline};
pub use error::{EventCamError, EventCamResult};
pub use output::SequenceGenerator;

/// Initialize the EventCam library; needed only by the FFmpeg backend
pub fn init() -> EventCamResult<()> {
    #[cfg(feature = "ffmpeg")]
    adapters::ffmpeg_video::init()?;
    Ok(())
}
