//! Command-line argument definitions

use std::ops::Range;
use std::path::PathBuf;

use clap::Args;
use clap_num::number_range;

fn fps_in_range(s: &str) -> Result<u32, String> {
    number_range(s, 1, 240)
}

fn workers_in_range(s: &str) -> Result<usize, String> {
    number_range(s, 1, 256)
}

fn frames_at_least_one(s: &str) -> Result<u32, String> {
    number_range(s, 1, u32::MAX)
}

/// Parse a half-open frame range `START..END`
fn frame_range(s: &str) -> Result<Range<u64>, String> {
    let (start, end) = s
        .split_once("..")
        .ok_or_else(|| format!("expected START..END, got {}", s))?;
    let start: u64 = start.trim().parse().map_err(|e| format!("invalid start {}: {}", start, e))?;
    let end: u64 = end.trim().parse().map_err(|e| format!("invalid end {}: {}", end, e))?;
    if start >= end {
        return Err(format!("range {} is empty", s));
    }
    Ok(start..end)
}

/// Arguments for the record command
#[derive(Args, Debug)]
pub struct RecordArgs {
    /// Stream source: synthetic[:NAME], file:PATH or ffmpeg:URL (repeatable)
    #[arg(short, long = "source", required = true)]
    pub sources: Vec<String>,

    /// Segment length in seconds
    #[arg(long)]
    pub duration: Option<f64>,

    /// Overlap between consecutive segments in seconds
    #[arg(long)]
    pub overlap: Option<f64>,

    /// Frame rate override
    #[arg(long, value_parser = fps_in_range)]
    pub fps: Option<u32>,

    /// Capture mode (live-buffer or re-cut)
    #[arg(long)]
    pub mode: Option<String>,

    /// Output naming scheme (original, indexed or sequenced)
    #[arg(long)]
    pub naming: Option<String>,

    /// Output format (frames or mp4)
    #[arg(long)]
    pub format: Option<String>,

    /// Clip destination (folder, discard or keep)
    #[arg(long)]
    pub sink: Option<String>,

    /// Directory for segment files
    #[arg(long)]
    pub segments_dir: Option<PathBuf>,

    /// Directory for extracted clips
    #[arg(long)]
    pub events_dir: Option<PathBuf>,

    /// Directory the folder sink moves clips to
    #[arg(long)]
    pub classified_dir: Option<PathBuf>,

    /// Frames classified concurrently per stream
    #[arg(long, value_parser = workers_in_range)]
    pub workers: Option<usize>,

    /// Positive frames in a row needed to confirm an event
    #[arg(long, value_parser = frames_at_least_one)]
    pub confirm_frames: Option<u32>,

    /// Negative frames in a row that end an event
    #[arg(long, value_parser = frames_at_least_one)]
    pub end_negative_run: Option<u32>,

    /// Synthetic sources: stop after this many frames
    #[arg(long)]
    pub frames: Option<u64>,

    /// Synthetic sources: frame range rendered bright, START..END (repeatable)
    #[arg(long, value_parser = frame_range)]
    pub bright: Vec<Range<u64>>,

    /// Synthetic sources: deliver frames in real time
    #[arg(long)]
    pub paced: bool,

    /// Keep every output in memory instead of writing files
    #[arg(long)]
    pub dry_run: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the scan command
#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Directory holding one stream's segment files
    #[arg(short, long)]
    pub dir: PathBuf,

    /// Stream name used for clip file names (default: the directory name)
    #[arg(long)]
    pub stream: Option<String>,

    /// Directory for extracted clips
    #[arg(long)]
    pub events_dir: Option<PathBuf>,

    /// Clip destination (folder, discard or keep)
    #[arg(long)]
    pub sink: Option<String>,

    /// Directory the folder sink moves clips to
    #[arg(long)]
    pub classified_dir: Option<PathBuf>,

    /// Print the scan report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the inspect command
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Frame container to inspect
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output format (text, json or yaml)
    #[arg(long, default_value = "text")]
    pub format: String,
}
