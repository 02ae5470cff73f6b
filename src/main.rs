//! EventCam segment recorder
//!
//! Records camera streams as overlapping segments, classifies every frame and
//! cuts confirmed events out as clips.
//!
//! # Usage
//!
//! ```bash
//! eventcam record --source ffmpeg:rtsp://camera/1 --source synthetic:test --frames 600
//! eventcam scan --dir recordings/segments
//! eventcam inspect --input recordings/events/clip.frames --format json
//! ```

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

use eventcam::adapters::init_logging;
use eventcam::app::stop_channel;
use eventcam::cli::{commands, Cli, Commands};
use eventcam::config_initialization::initialize_configuration_hierarchy;

/// Main entry point for the EventCam CLI application
#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Configuration first: it decides how logging is set up
    let config = initialize_configuration_hierarchy(&cli)?;
    init_logging(&config.logging.level, config.logging.json)?;

    info!("Starting EventCam");

    // Execute the requested command
    let result = match cli.command {
        Commands::Record(args) => {
            info!("Executing record command");
            let (handle, signal) = stop_channel();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, closing open segments");
                    handle.stop();
                }
            });
            commands::record(args, config, signal).await
        }
        Commands::Scan(args) => {
            info!("Executing scan command");
            commands::scan(args, config).await
        }
        Commands::Inspect(args) => {
            info!("Executing inspect command");
            commands::inspect(args).await
        }
    };

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}
