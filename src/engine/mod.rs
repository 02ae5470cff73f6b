//! Segmentation and event engine

pub mod aggregator;
pub mod extractor;
pub mod pipeline;
pub mod scheduler;

pub use aggregator::{AggregatorOutput, ConfirmedEvent, EventAggregator};
pub use extractor::ClipExtractor;
pub use pipeline::{PipelineOutputs, PipelineSettings, StepReport, StreamPipeline};
pub use scheduler::{SegmentScheduler, TickOutcome};
