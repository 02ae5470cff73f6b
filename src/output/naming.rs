//! Deterministic output naming and process-wide id allocation

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainError;
use crate::utils::path::sanitize_component;
use crate::utils::time::format_filename_timestamp;

/// Monotonic id source shared by every stream of a process.
///
/// Passed around by `Arc`; allocation is a single atomic increment.
#[derive(Debug, Default)]
pub struct SequenceGenerator {
    next: AtomicU64,
}

impl SequenceGenerator {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Allocate the next id
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of ids handed out so far (relative to 0)
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

/// File name layout for segments and clips
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum NamingScheme {
    /// `{start}__{end}_.{ext}`; two files starting in the same second collide
    Original,
    /// `{start}__{end}_{stream}-{frame index}.{ext}`; stable across re-runs
    #[default]
    Indexed,
    /// `{start}__{end}_{stream}-{sequence id}.{ext}`
    Sequenced,
}

impl NamingScheme {
    pub fn parse(text: &str) -> Result<Self, DomainError> {
        match text.trim().to_lowercase().as_str() {
            "original" => Ok(NamingScheme::Original),
            "indexed" => Ok(NamingScheme::Indexed),
            "sequenced" => Ok(NamingScheme::Sequenced),
            _ => Err(DomainError::BadArgs(format!(
                "Invalid naming scheme: {}. Valid schemes: original, indexed, sequenced",
                text
            ))),
        }
    }
}

/// Output name allocated for one file
#[derive(Debug, Clone, PartialEq)]
pub struct AllocatedName {
    pub id: u64,
    pub path: PathBuf,
}

/// Builds output paths for one stream inside one directory
#[derive(Debug, Clone)]
pub struct ClipNamer {
    dir: PathBuf,
    stream: String,
    extension: String,
    scheme: NamingScheme,
    sequence: Arc<SequenceGenerator>,
}

impl ClipNamer {
    pub fn new(
        dir: impl Into<PathBuf>,
        stream: &str,
        extension: &str,
        scheme: NamingScheme,
        sequence: Arc<SequenceGenerator>,
    ) -> Self {
        Self {
            dir: dir.into(),
            stream: sanitize_component(stream),
            extension: extension.trim_start_matches('.').to_string(),
            scheme,
            sequence,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Allocate an id and a path for a file covering `[start, end]`,
    /// whose first frame index is `first_index`
    pub fn allocate(&self, start: &DateTime<Utc>, end: &DateTime<Utc>, first_index: u64) -> AllocatedName {
        let id = self.sequence.next_id();
        let tag = match self.scheme {
            NamingScheme::Original => String::new(),
            NamingScheme::Indexed => format!("{}-{}", self.stream, first_index),
            NamingScheme::Sequenced => format!("{}-{}", self.stream, id),
        };
        let file_name = format!(
            "{}__{}_{}.{}",
            format_filename_timestamp(start),
            format_filename_timestamp(end),
            tag,
            self.extension
        );
        AllocatedName {
            id,
            path: self.dir.join(file_name),
        }
    }
}
