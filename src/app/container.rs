use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::adapters::toml_config::{OutputFormat, SinkKind, DEFAULT_FPS};
use crate::adapters::{
    AppConfig, ContainerSource, DiscardSink, FolderSink, KeepSink, LumaClassifier, MemoryWriterFactory,
    SyntheticSource,
};
use crate::app::multi_stream::{MultiStreamRecorder, StreamJob};
use crate::app::scan_interactor::ScanInteractor;
use crate::app::stream_runner::StreamRunner;
use crate::domain::errors::DomainError;
use crate::domain::model::StreamInfo;
use crate::engine::{PipelineOutputs, PipelineSettings, StreamPipeline};
use crate::error::EventCamResult;
use crate::output::{ClipNamer, ContainerSegmentReader, ContainerWriterFactory, SequenceGenerator};
use crate::ports::{ArtifactSink, Classifier, FrameSource, SegmentReader, WriterFactory};

/// Frame size of synthetic streams
pub const SYNTHETIC_WIDTH: u32 = 32;
pub const SYNTHETIC_HEIGHT: u32 = 24;

/// Where one stream's frames come from
#[derive(Debug, Clone, PartialEq)]
pub enum SourceLocator {
    /// Generated test pattern
    Synthetic { name: String },
    /// Replay of a recorded `.frames` container
    File(PathBuf),
    /// File or camera URL decoded by FFmpeg
    Ffmpeg(String),
}

impl SourceLocator {
    /// Parse `synthetic[:NAME]`, `file:PATH` or `ffmpeg:URL`
    pub fn parse(text: &str) -> Result<Self, DomainError> {
        let (kind, rest) = match text.split_once(':') {
            Some((kind, rest)) => (kind, Some(rest)),
            None => (text, None),
        };
        match (kind.trim().to_lowercase().as_str(), rest) {
            ("synthetic", None) => Ok(SourceLocator::Synthetic {
                name: "synthetic".to_string(),
            }),
            ("synthetic", Some(name)) if !name.is_empty() => Ok(SourceLocator::Synthetic {
                name: name.to_string(),
            }),
            ("file", Some(path)) if !path.is_empty() => Ok(SourceLocator::File(PathBuf::from(path))),
            ("ffmpeg", Some(url)) if !url.is_empty() => Ok(SourceLocator::Ffmpeg(url.to_string())),
            _ => Err(DomainError::BadArgs(format!(
                "Invalid source: {}. Expected synthetic[:NAME], file:PATH or ffmpeg:URL",
                text
            ))),
        }
    }
}

/// Options for synthetic sources
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyntheticOptions {
    /// Frames before end of stream; unbounded when `None`
    pub frames: Option<u64>,
    /// Frame ranges rendered bright
    pub bright: Vec<std::ops::Range<u64>>,
    /// Deliver frames in real time
    pub paced: bool,
}

pub trait AppContainer: Send + Sync {
    fn config(&self) -> &AppConfig;
    fn settings(&self) -> &PipelineSettings;
    fn recorder(&self) -> MultiStreamRecorder;
    fn stream_jobs(&self, sources: &[SourceLocator], synthetic: &SyntheticOptions) -> EventCamResult<Vec<StreamJob>>;
    fn scan_interactor(&self, stream: &str) -> Arc<ScanInteractor>;
}

pub struct DefaultAppContainer {
    config: AppConfig,
    settings: PipelineSettings,
    factory: Arc<dyn WriterFactory>,
    reader: Option<Arc<dyn SegmentReader>>,
    sink: Arc<dyn ArtifactSink>,
    classifier: Arc<dyn Classifier>,
    sequence: Arc<SequenceGenerator>,
}

impl DefaultAppContainer {
    /// Wire the configured file outputs and sink
    pub fn new(config: AppConfig) -> EventCamResult<Self> {
        let (factory, reader) = file_outputs(config.output.format)?;
        let sink: Arc<dyn ArtifactSink> = match config.output.sink {
            SinkKind::Folder => Arc::new(FolderSink::new(&config.output.classified_dir)),
            SinkKind::Discard => Arc::new(DiscardSink),
            SinkKind::Keep => Arc::new(KeepSink),
        };
        Self::with_parts(config, factory, reader, sink)
    }

    /// Wire in-memory outputs; nothing touches the filesystem
    pub fn dry_run(config: AppConfig) -> EventCamResult<Self> {
        let memory = MemoryWriterFactory::default();
        let reader: Arc<dyn SegmentReader> = Arc::new(memory.reader());
        Self::with_parts(config, Arc::new(memory), Some(reader), Arc::new(KeepSink))
    }

    pub fn with_parts(
        config: AppConfig,
        factory: Arc<dyn WriterFactory>,
        reader: Option<Arc<dyn SegmentReader>>,
        sink: Arc<dyn ArtifactSink>,
    ) -> EventCamResult<Self> {
        let settings = config.validate()?;
        let classifier = Arc::new(LumaClassifier::new(config.classifier.luma_threshold)?);

        info!(
            format = ?config.output.format,
            sink = sink.name(),
            mode = %settings.mode,
            workers = config.classifier.workers,
            "Application wired"
        );
        Ok(Self {
            config,
            settings,
            factory,
            reader,
            sink,
            classifier,
            sequence: SequenceGenerator::shared(),
        })
    }

    fn namer(&self, dir: &std::path::Path, stream: &str) -> ClipNamer {
        ClipNamer::new(
            dir,
            stream,
            self.factory.extension(),
            self.config.output.naming,
            Arc::clone(&self.sequence),
        )
    }

    /// Build the pipeline for one stream
    pub fn pipeline(&self, stream: &str, info: StreamInfo) -> EventCamResult<StreamPipeline> {
        let outputs = PipelineOutputs {
            factory: Arc::clone(&self.factory),
            reader: self.reader.clone(),
            segments: self.namer(&self.config.output.segments_dir, stream),
            clips: self.namer(&self.config.output.events_dir, stream),
        };
        StreamPipeline::new(stream, info, &self.settings, outputs)
    }

    /// Open the frame source a locator names
    pub fn open_source(&self, locator: &SourceLocator, synthetic: &SyntheticOptions) -> EventCamResult<Box<dyn FrameSource>> {
        match locator {
            SourceLocator::Synthetic { name } => {
                let fps = self.settings.fps.unwrap_or(DEFAULT_FPS);
                let info = StreamInfo::new(fps, SYNTHETIC_WIDTH, SYNTHETIC_HEIGHT)?;
                let mut source = SyntheticSource::new(name, info).paced(synthetic.paced);
                if let Some(frames) = synthetic.frames {
                    source = source.with_length(frames);
                }
                for range in &synthetic.bright {
                    source = source.with_bright(range.clone());
                }
                Ok(Box::new(source))
            }
            SourceLocator::File(path) => Ok(Box::new(ContainerSource::open(path)?)),
            SourceLocator::Ffmpeg(url) => open_ffmpeg(url),
        }
    }
}

impl AppContainer for DefaultAppContainer {
    fn config(&self) -> &AppConfig {
        &self.config
    }

    fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    fn recorder(&self) -> MultiStreamRecorder {
        let runner = StreamRunner::new(
            Arc::clone(&self.classifier),
            Arc::clone(&self.sink),
            self.config.classifier.workers,
        );
        MultiStreamRecorder::new(runner)
    }

    fn stream_jobs(&self, sources: &[SourceLocator], synthetic: &SyntheticOptions) -> EventCamResult<Vec<StreamJob>> {
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut jobs = Vec::with_capacity(sources.len());
        for locator in sources {
            let source = self.open_source(locator, synthetic)?;
            // Streams sharing a name would share output file names.
            let count = seen.entry(source.name().to_string()).or_insert(0);
            *count += 1;
            let stream = if *count == 1 {
                source.name().to_string()
            } else {
                format!("{}-{}", source.name(), count)
            };
            let pipeline = self.pipeline(&stream, source.info())?;
            jobs.push(StreamJob { source, pipeline });
        }
        Ok(jobs)
    }

    fn scan_interactor(&self, stream: &str) -> Arc<ScanInteractor> {
        Arc::new(ScanInteractor::new(
            Arc::clone(&self.classifier),
            self.settings.clone(),
            Arc::clone(&self.factory),
            self.namer(&self.config.output.events_dir, stream),
            Arc::clone(&self.sink),
        ))
    }
}

type FileOutputs = (Arc<dyn WriterFactory>, Option<Arc<dyn SegmentReader>>);

fn file_outputs(format: OutputFormat) -> EventCamResult<FileOutputs> {
    match format {
        OutputFormat::Frames => {
            let factory: Arc<dyn WriterFactory> = Arc::new(ContainerWriterFactory::new());
            let reader: Arc<dyn SegmentReader> = Arc::new(ContainerSegmentReader::new());
            Ok((factory, Some(reader)))
        }
        #[cfg(feature = "ffmpeg")]
        OutputFormat::Mp4 => {
            let factory: Arc<dyn WriterFactory> = Arc::new(crate::adapters::Mp4WriterFactory);
            Ok((factory, None))
        }
        #[cfg(not(feature = "ffmpeg"))]
        OutputFormat::Mp4 => Err(DomainError::config("mp4 output requires the ffmpeg feature").into()),
    }
}

#[cfg(feature = "ffmpeg")]
fn open_ffmpeg(url: &str) -> EventCamResult<Box<dyn FrameSource>> {
    let name = std::path::Path::new(url)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "camera".to_string());
    Ok(Box::new(crate::adapters::FfmpegSource::open(&name, url)?))
}

#[cfg(not(feature = "ffmpeg"))]
fn open_ffmpeg(url: &str) -> EventCamResult<Box<dyn FrameSource>> {
    Err(DomainError::config(format!("cannot open {}: built without the ffmpeg feature", url)).into())
}
