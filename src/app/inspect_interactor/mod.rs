// Inspect interactor - Summarizes a recorded frame container

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::domain::errors::DomainError;
use crate::error::{EventCamError, EventCamResult};
use crate::output::{ContainerHeader, ContainerReader};
use crate::utils::Utils;

/// Output format of an inspection summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
    Yaml,
}

impl ReportFormat {
    pub fn parse(text: &str) -> Result<Self, DomainError> {
        match text.trim().to_lowercase().as_str() {
            "text" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            "yaml" => Ok(ReportFormat::Yaml),
            _ => Err(DomainError::BadArgs(format!(
                "Invalid format: {}. Valid formats: text, json, yaml",
                text
            ))),
        }
    }
}

/// Request for a container inspection
#[derive(Debug, Clone)]
pub struct InspectRequest {
    pub path: PathBuf,
    pub format: ReportFormat,
}

/// What a container holds
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerReport {
    pub path: PathBuf,
    pub header: ContainerHeader,
    pub file_size: u64,
    pub frame_count: u64,
    pub first_index: Option<u64>,
    pub last_index: Option<u64>,
    /// Indices inside `[first_index, last_index]` with no recorded frame
    pub missing_frames: u64,
    pub start_timestamp: Option<DateTime<Utc>>,
    pub end_timestamp: Option<DateTime<Utc>>,
    /// Frame count over fps
    pub duration_seconds: f64,
}

#[derive(Debug, Clone)]
pub struct InspectResponse {
    pub report: ContainerReport,
    pub summary: String,
}

/// Interactor for the container inspection use case
#[derive(Debug, Default)]
pub struct InspectInteractor;

impl InspectInteractor {
    pub fn new() -> Self {
        Self
    }

    pub async fn execute(&self, request: InspectRequest) -> EventCamResult<InspectResponse> {
        info!("Inspecting {}", request.path.display());
        let path = request.path.clone();
        let report = tokio::task::spawn_blocking(move || inspect_container(&path))
            .await
            .map_err(|e| EventCamError::IoError(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

        let summary = match request.format {
            ReportFormat::Json => serde_json::to_string_pretty(&report)
                .map_err(|e| DomainError::InternalError(format!("JSON serialization failed: {}", e)))?,
            ReportFormat::Yaml => serde_yaml::to_string(&report)
                .map_err(|e| DomainError::InternalError(format!("YAML serialization failed: {}", e)))?,
            ReportFormat::Text => format_as_text(&report),
        };
        Ok(InspectResponse { report, summary })
    }
}

/// Read a container front to back
pub fn inspect_container(path: &Path) -> EventCamResult<ContainerReport> {
    let file_size = std::fs::metadata(path)?.len();
    let mut reader = ContainerReader::open(path)?;
    let header = *reader.header();

    let mut frame_count = 0u64;
    let mut first: Option<(u64, DateTime<Utc>)> = None;
    let mut last: Option<(u64, DateTime<Utc>)> = None;
    while let Some(frame) = reader.next_frame()? {
        frame_count += 1;
        first.get_or_insert((frame.index(), frame.timestamp()));
        last = Some((frame.index(), frame.timestamp()));
    }

    let missing_frames = match (first, last) {
        (Some((a, _)), Some((b, _))) => (b - a + 1).saturating_sub(frame_count),
        _ => 0,
    };
    Ok(ContainerReport {
        path: path.to_path_buf(),
        header,
        file_size,
        frame_count,
        first_index: first.map(|(i, _)| i),
        last_index: last.map(|(i, _)| i),
        missing_frames,
        start_timestamp: first.map(|(_, t)| t),
        end_timestamp: last.map(|(_, t)| t),
        duration_seconds: if header.fps > 0 {
            frame_count as f64 / header.fps as f64
        } else {
            0.0
        },
    })
}

fn format_as_text(report: &ContainerReport) -> String {
    let mut output = String::new();
    output.push_str("Frame Container:\n");
    output.push_str(&format!("  File: {}\n", report.path.display()));
    output.push_str(&format!("  File Size: {}\n", Utils::format_file_size(report.file_size)));
    output.push_str(&format!(
        "  Video: {}x{} @ {}fps, {} bytes/frame\n",
        report.header.width, report.header.height, report.header.fps, report.header.bytes_per_frame
    ));
    output.push_str(&format!("  Frames: {}\n", report.frame_count));
    output.push_str(&format!(
        "  Duration: {}\n",
        Utils::format_duration(Duration::from_secs_f64(report.duration_seconds))
    ));
    if let (Some(first), Some(last)) = (report.first_index, report.last_index) {
        output.push_str(&format!("  Index Range: {}..={}\n", first, last));
    }
    if let (Some(start), Some(end)) = (report.start_timestamp, report.end_timestamp) {
        output.push_str(&format!("  Captured: {} .. {}\n", start.to_rfc3339(), end.to_rfc3339()));
    }
    if report.missing_frames > 0 {
        output.push_str(&format!("  Missing Frames: {}\n", report.missing_frames));
    }
    output
}
