// Adapters - External system implementations

pub mod classifier;
pub mod container_source;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_video;
pub mod fs_sink;
pub mod memory_output;
pub mod synthetic_source;
pub mod toml_config;
pub mod tracing_log;

// Re-export adapters
pub use classifier::{LumaClassifier, ScriptedClassifier};
pub use container_source::ContainerSource;
#[cfg(feature = "ffmpeg")]
pub use ffmpeg_video::{FfmpegSource, Mp4WriterFactory};
pub use fs_sink::{DiscardSink, FolderSink, KeepSink};
pub use memory_output::{MemorySegmentReader, MemoryWriterFactory};
pub use synthetic_source::SyntheticSource;
pub use toml_config::AppConfig;
pub use tracing_log::init_logging;
