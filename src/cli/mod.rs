//! CLI module for EventCam
//!
//! This module handles command-line argument parsing and command execution.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod args;
pub mod commands;

pub use args::{InspectArgs, RecordArgs, ScanArgs};

/// EventCam segment recorder
///
/// Records camera streams as overlapping segments and cuts classifier-confirmed
/// events out of them.
#[derive(Parser, Debug)]
#[command(name = "eventcam")]
#[command(about = "EventCam - Overlapping segment recorder with event extraction")]
#[command(version)]
#[command(long_about = None)]
pub struct Cli {
    /// Logging level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Configuration file (.toml, .yaml or .yml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// The command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Record one or more streams into segments and event clips
    Record(args::RecordArgs),
    /// Classify recorded segment files and cut events out of them
    Scan(args::ScanArgs),
    /// Inspect a frame container
    Inspect(args::InspectArgs),
}
