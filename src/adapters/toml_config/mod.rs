// Config adapter - Typed configuration loaded from TOML or YAML files,
// overridden by EVENTCAM_* environment variables

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::errors::DomainError;
use crate::domain::model::CaptureMode;
use crate::domain::rules::PositiveRule;
use crate::engine::PipelineSettings;
use crate::output::NamingScheme;

/// Frame rate assumed for streams that do not report one
pub const DEFAULT_FPS: u32 = 20;

/// Config files looked up in the working directory when none is given
pub const DEFAULT_CONFIG_PATHS: &[&str] = &["eventcam.toml", "eventcam.yaml", "config/eventcam.toml"];

/// Environment variable prefix
pub const ENV_PREFIX: &str = "EVENTCAM_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SegmentSection {
    pub duration_seconds: f64,
    pub overlap_seconds: f64,
    /// Overrides the source's frame rate
    pub fps: Option<u32>,
}

impl Default for SegmentSection {
    fn default() -> Self {
        Self {
            duration_seconds: 10.0,
            overlap_seconds: 3.0,
            fps: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EventSection {
    pub min_consecutive_positive_to_confirm: u32,
    pub end_negative_run: u32,
    pub min_event_duration_seconds: f64,
    pub max_event_duration_seconds: Option<f64>,
}

impl Default for EventSection {
    fn default() -> Self {
        Self {
            min_consecutive_positive_to_confirm: 7,
            end_negative_run: 12,
            min_event_duration_seconds: 2.0,
            max_event_duration_seconds: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassifierSection {
    pub positive_label_bound: u32,
    pub min_confidence: f32,
    /// Frames classified concurrently per stream
    pub workers: usize,
    /// Mean brightness at which the built-in classifier reports an event
    pub luma_threshold: f32,
}

impl Default for ClassifierSection {
    fn default() -> Self {
        let rule = PositiveRule::default();
        Self {
            positive_label_bound: rule.positive_label_bound,
            min_confidence: rule.min_confidence,
            workers: num_cpus::get(),
            luma_threshold: 0.5,
        }
    }
}

/// Output file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Seekable raw frame container
    #[default]
    Frames,
    /// MPEG-4 video (requires the `ffmpeg` feature)
    Mp4,
}

impl OutputFormat {
    pub fn parse(text: &str) -> Result<Self, DomainError> {
        match text.trim().to_lowercase().as_str() {
            "frames" => Ok(OutputFormat::Frames),
            "mp4" => Ok(OutputFormat::Mp4),
            _ => Err(DomainError::config(format!(
                "Invalid output format: {}. Valid formats: frames, mp4",
                text
            ))),
        }
    }
}

/// Where finished clips go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Move into `classified_dir` with a JSON result record
    #[default]
    Folder,
    /// Delete after extraction
    Discard,
    /// Leave clips in `events_dir`
    Keep,
}

impl SinkKind {
    pub fn parse(text: &str) -> Result<Self, DomainError> {
        match text.trim().to_lowercase().as_str() {
            "folder" => Ok(SinkKind::Folder),
            "discard" => Ok(SinkKind::Discard),
            "keep" => Ok(SinkKind::Keep),
            _ => Err(DomainError::config(format!(
                "Invalid sink: {}. Valid sinks: folder, discard, keep",
                text
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputSection {
    pub segments_dir: PathBuf,
    pub events_dir: PathBuf,
    pub classified_dir: PathBuf,
    pub format: OutputFormat,
    pub naming: NamingScheme,
    pub sink: SinkKind,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            segments_dir: PathBuf::from("recordings/segments"),
            events_dir: PathBuf::from("recordings/events"),
            classified_dir: PathBuf::from("recordings/classified"),
            format: OutputFormat::default(),
            naming: NamingScheme::default(),
            sink: SinkKind::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub segment: SegmentSection,
    pub event: EventSection,
    pub classifier: ClassifierSection,
    pub output: OutputSection,
    pub mode: CaptureMode,
    pub logging: LoggingSection,
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, DomainError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| DomainError::config(format!("{}{}={}: {}", ENV_PREFIX, key, value, e)))
}

fn seconds(label: &str, value: f64) -> Result<Duration, DomainError> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| DomainError::config(format!("{} must be a non-negative number of seconds (got {})", label, value)))
}

impl AppConfig {
    /// Parse a config file; the format follows the extension
    pub fn from_file(path: &Path) -> Result<Self, DomainError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DomainError::config(format!("Failed to read config file {}: {}", path.display(), e)))?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        let config = match extension.as_str() {
            "toml" => toml::from_str(&content)
                .map_err(|e| DomainError::config(format!("Failed to parse TOML config {}: {}", path.display(), e)))?,
            "yaml" | "yml" => serde_yaml::from_str(&content)
                .map_err(|e| DomainError::config(format!("Failed to parse YAML config {}: {}", path.display(), e)))?,
            _ => {
                return Err(DomainError::config(format!(
                    "Unsupported config format: {} (expected .toml, .yaml or .yml)",
                    path.display()
                )))
            }
        };

        info!("Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Load `path`, or the first default config file that exists, or defaults
    pub fn load(path: Option<&Path>) -> Result<Self, DomainError> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        for candidate in DEFAULT_CONFIG_PATHS {
            let candidate = Path::new(candidate);
            if candidate.exists() {
                return Self::from_file(candidate);
            }
        }
        debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Apply `EVENTCAM_*` overrides from the process environment
    pub fn apply_process_env(&mut self) -> Result<usize, DomainError> {
        self.apply_env(std::env::vars())
    }

    /// Apply `EVENTCAM_*` overrides from `vars`; returns how many applied
    pub fn apply_env<I>(&mut self, vars: I) -> Result<usize, DomainError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut applied = 0;
        for (name, value) in vars {
            let Some(key) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match key {
                "DURATION" => self.segment.duration_seconds = parse_env(key, &value)?,
                "OVERLAP" => self.segment.overlap_seconds = parse_env(key, &value)?,
                "FPS" => self.segment.fps = Some(parse_env(key, &value)?),
                "CONFIRM_FRAMES" => self.event.min_consecutive_positive_to_confirm = parse_env(key, &value)?,
                "END_NEGATIVE_RUN" => self.event.end_negative_run = parse_env(key, &value)?,
                "MIN_EVENT_SECONDS" => self.event.min_event_duration_seconds = parse_env(key, &value)?,
                "MAX_EVENT_SECONDS" => self.event.max_event_duration_seconds = Some(parse_env(key, &value)?),
                "POSITIVE_LABEL_BOUND" => self.classifier.positive_label_bound = parse_env(key, &value)?,
                "MIN_CONFIDENCE" => self.classifier.min_confidence = parse_env(key, &value)?,
                "WORKERS" => self.classifier.workers = parse_env(key, &value)?,
                "LUMA_THRESHOLD" => self.classifier.luma_threshold = parse_env(key, &value)?,
                "MODE" => self.mode = CaptureMode::parse(&value)?,
                "SEGMENTS_DIR" => self.output.segments_dir = PathBuf::from(&value),
                "EVENTS_DIR" => self.output.events_dir = PathBuf::from(&value),
                "CLASSIFIED_DIR" => self.output.classified_dir = PathBuf::from(&value),
                "FORMAT" => self.output.format = OutputFormat::parse(&value)?,
                "NAMING" => self.output.naming = NamingScheme::parse(&value)?,
                "SINK" => self.output.sink = SinkKind::parse(&value)?,
                "LOG_LEVEL" => self.logging.level = value.clone(),
                "LOG_JSON" => self.logging.json = parse_env(key, &value)?,
                _ => {
                    debug!("Ignoring unknown environment variable {}", name);
                    continue;
                }
            }
            info!("Found environment override: {} = {}", name, value);
            applied += 1;
        }
        Ok(applied)
    }

    /// Check every section eagerly and build the pipeline settings
    pub fn validate(&self) -> Result<PipelineSettings, DomainError> {
        let settings = self.pipeline_settings()?;
        // Frame-level checks need an fps; streams without one run at the default.
        settings.resolve(self.segment.fps.unwrap_or(DEFAULT_FPS))?;

        if self.classifier.workers == 0 {
            return Err(DomainError::config("classifier.workers must be at least 1"));
        }
        let threshold = self.classifier.luma_threshold;
        if !(threshold > 0.0 && threshold < 1.0) {
            return Err(DomainError::config(format!(
                "classifier.luma_threshold must be in (0, 1) (got {})",
                threshold
            )));
        }
        if crate::adapters::tracing_log::parse_level(&self.logging.level).is_none() {
            return Err(DomainError::config(format!(
                "Invalid log level: {}. Valid levels: trace, debug, info, warn, error",
                self.logging.level
            )));
        }
        if self.segment.fps == Some(0) {
            return Err(DomainError::config("segment.fps must be positive"));
        }
        Ok(settings)
    }

    pub fn pipeline_settings(&self) -> Result<PipelineSettings, DomainError> {
        Ok(PipelineSettings {
            segment_duration: seconds("segment.duration_seconds", self.segment.duration_seconds)?,
            overlap: seconds("segment.overlap_seconds", self.segment.overlap_seconds)?,
            fps: self.segment.fps,
            min_consecutive_positive_to_confirm: self.event.min_consecutive_positive_to_confirm,
            end_negative_run: self.event.end_negative_run,
            min_event_duration: seconds("event.min_event_duration_seconds", self.event.min_event_duration_seconds)?,
            max_event_duration: self
                .event
                .max_event_duration_seconds
                .map(|s| seconds("event.max_event_duration_seconds", s))
                .transpose()?,
            rule: PositiveRule::new(self.classifier.positive_label_bound, self.classifier.min_confidence)?,
            mode: self.mode,
        })
    }
}
