// Filesystem sinks - Hand finished clips to a classified folder or discard them

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::model::Clip;
use crate::error::{EventCamError, EventCamResult};
use crate::ports::{ArtifactSink, SinkAck};
use crate::utils::path::{ensure_directory, move_file};

/// Result record written next to every clip a `FolderSink` accepts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipRecord {
    pub clip: Clip,
    pub duration_seconds: f64,
    pub accepted_at: DateTime<Utc>,
}

fn rejected(clip: &Clip, message: impl std::fmt::Display) -> EventCamError {
    EventCamError::SinkRejected {
        path: clip.path.display().to_string(),
        message: message.to_string(),
    }
}

/// Moves clips into a folder and writes a `.json` result record beside each
#[derive(Debug, Clone)]
pub struct FolderSink {
    dir: PathBuf,
}

impl FolderSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn deliver(dir: &Path, clip: &Clip) -> EventCamResult<PathBuf> {
        ensure_directory(dir)?;
        let file_name = clip
            .path
            .file_name()
            .ok_or_else(|| rejected(clip, "clip path has no file name"))?;
        let target = dir.join(file_name);
        move_file(&clip.path, &target)?;

        let mut delivered = clip.clone();
        delivered.path = target.clone();
        let record = ClipRecord {
            duration_seconds: (clip.end_timestamp - clip.start_timestamp).num_milliseconds() as f64 / 1000.0,
            clip: delivered,
            accepted_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&record).map_err(|e| rejected(clip, e))?;
        std::fs::write(target.with_extension("json"), json)?;
        Ok(target)
    }
}

#[async_trait]
impl ArtifactSink for FolderSink {
    fn name(&self) -> &str {
        "folder"
    }

    async fn accept(&self, clip: &Clip) -> EventCamResult<SinkAck> {
        let dir = self.dir.clone();
        let owned = clip.clone();
        let target = tokio::task::spawn_blocking(move || Self::deliver(&dir, &owned))
            .await
            .map_err(|e| rejected(clip, e))?
            .map_err(|e| match e {
                EventCamError::SinkRejected { .. } => e,
                other => rejected(clip, other),
            })?;

        info!(clip = clip.id, stream = %clip.stream, "Clip delivered to {}", target.display());
        Ok(SinkAck {
            location: Some(target),
        })
    }
}

/// Deletes clips once extracted
#[derive(Debug, Clone, Default)]
pub struct DiscardSink;

#[async_trait]
impl ArtifactSink for DiscardSink {
    fn name(&self) -> &str {
        "discard"
    }

    async fn accept(&self, clip: &Clip) -> EventCamResult<SinkAck> {
        tokio::fs::remove_file(&clip.path)
            .await
            .map_err(|e| rejected(clip, e))?;
        debug!(clip = clip.id, "Clip discarded: {}", clip.path.display());
        Ok(SinkAck { location: None })
    }
}

/// Leaves clips where extraction wrote them
#[derive(Debug, Clone, Default)]
pub struct KeepSink;

#[async_trait]
impl ArtifactSink for KeepSink {
    fn name(&self) -> &str {
        "keep"
    }

    async fn accept(&self, clip: &Clip) -> EventCamResult<SinkAck> {
        debug!(clip = clip.id, "Clip kept at {}", clip.path.display());
        Ok(SinkAck {
            location: Some(clip.path.clone()),
        })
    }
}
