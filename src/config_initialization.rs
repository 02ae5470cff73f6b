//! Configuration initialization and hierarchy management

use anyhow::{Context, Result};
use tracing::info;

use crate::adapters::toml_config::{OutputFormat, SinkKind};
use crate::adapters::AppConfig;
use crate::cli::{Cli, Commands};
use crate::domain::model::CaptureMode;
use crate::output::NamingScheme;

/// Build the configuration following precedence: CLI > Env > File > Defaults
pub fn initialize_configuration_hierarchy(cli: &Cli) -> Result<AppConfig> {
    // Steps 1 and 2: defaults, then the config file if there is one
    let mut config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration file")?;

    // Step 3: environment variables
    let env_overrides = config
        .apply_process_env()
        .context("Invalid environment override")?;
    if env_overrides > 0 {
        info!("Applied {} environment variable overrides", env_overrides);
    }

    // Step 4: CLI arguments
    let cli_overrides = apply_cli_configuration_overrides(&mut config, cli)?;
    if cli_overrides > 0 {
        info!("Applied {} CLI configuration overrides", cli_overrides);
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Apply CLI argument overrides to `config`; returns how many applied
pub fn apply_cli_configuration_overrides(config: &mut AppConfig, cli: &Cli) -> Result<usize> {
    let mut cli_overrides = 0;
    let mut count = |applied: bool| {
        if applied {
            cli_overrides += 1;
        }
    };

    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
        count(true);
    }
    if cli.json_logs {
        config.logging.json = true;
        count(true);
    }

    match &cli.command {
        Commands::Record(args) => {
            count(set(&mut config.segment.duration_seconds, args.duration));
            count(set(&mut config.segment.overlap_seconds, args.overlap));
            if let Some(fps) = args.fps {
                config.segment.fps = Some(fps);
                count(true);
            }
            count(set(&mut config.classifier.workers, args.workers));
            count(set(
                &mut config.event.min_consecutive_positive_to_confirm,
                args.confirm_frames,
            ));
            count(set(&mut config.event.end_negative_run, args.end_negative_run));
            if let Some(mode) = &args.mode {
                config.mode = CaptureMode::parse(mode).context("Invalid --mode")?;
                count(true);
            }
            if let Some(naming) = &args.naming {
                config.output.naming = NamingScheme::parse(naming).context("Invalid --naming")?;
                count(true);
            }
            if let Some(format) = &args.format {
                config.output.format = OutputFormat::parse(format).context("Invalid --format")?;
                count(true);
            }
            if let Some(sink) = &args.sink {
                config.output.sink = SinkKind::parse(sink).context("Invalid --sink")?;
                count(true);
            }
            count(set(&mut config.output.segments_dir, args.segments_dir.clone()));
            count(set(&mut config.output.events_dir, args.events_dir.clone()));
            count(set(&mut config.output.classified_dir, args.classified_dir.clone()));
        }
        Commands::Scan(args) => {
            if let Some(sink) = &args.sink {
                config.output.sink = SinkKind::parse(sink).context("Invalid --sink")?;
                count(true);
            }
            count(set(&mut config.output.events_dir, args.events_dir.clone()));
            count(set(&mut config.output.classified_dir, args.classified_dir.clone()));
        }
        Commands::Inspect(_) => {}
    }

    Ok(cli_overrides)
}

fn set<T>(slot: &mut T, value: Option<T>) -> bool {
    match value {
        Some(value) => {
            *slot = value;
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_cli_overrides_win_over_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("eventcam.toml");
        std::fs::write(&path, "mode = \"re-cut\"\n[segment]\nduration_seconds = 6.0\noverlap_seconds = 2.0\n").unwrap();

        let cli = Cli::try_parse_from([
            "eventcam",
            "--config",
            path.to_str().unwrap(),
            "record",
            "--source",
            "synthetic",
            "--duration",
            "8",
            "--mode",
            "live-buffer",
            "--events-dir",
            "clips",
        ])
        .unwrap();
        let mut config = AppConfig::load(cli.config.as_deref()).unwrap();
        let applied = apply_cli_configuration_overrides(&mut config, &cli).unwrap();

        assert_eq!(applied, 3);
        assert_eq!(config.segment.duration_seconds, 8.0);
        assert_eq!(config.segment.overlap_seconds, 2.0);
        assert_eq!(config.mode, CaptureMode::LiveBuffer);
        assert_eq!(config.output.events_dir, PathBuf::from("clips"));
    }

    #[test]
    fn test_invalid_cli_values_are_errors() {
        let cli = Cli::try_parse_from(["eventcam", "record", "--source", "synthetic", "--naming", "random"]).unwrap();
        let mut config = AppConfig::default();
        assert!(apply_cli_configuration_overrides(&mut config, &cli).is_err());

        let cli = Cli::try_parse_from(["eventcam", "record", "--source", "synthetic", "--overlap", "30"]).unwrap();
        let mut config = AppConfig::default();
        apply_cli_configuration_overrides(&mut config, &cli).unwrap();
        assert!(config.validate().is_err());
    }
}
