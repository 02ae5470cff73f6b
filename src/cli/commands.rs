//! Command implementations

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::adapters::AppConfig;
use crate::app::{
    AppContainer, DefaultAppContainer, InspectInteractor, InspectRequest, ReportFormat, RunSummary, ScanRequest, SourceLocator,
    StopSignal, SyntheticOptions,
};
use crate::cli::args::{InspectArgs, RecordArgs, ScanArgs};

/// Execute the record command
pub async fn record(args: RecordArgs, config: AppConfig, stop: StopSignal) -> Result<()> {
    let sources = args
        .sources
        .iter()
        .map(|s| SourceLocator::parse(s))
        .collect::<Result<Vec<_>, _>>()
        .context("Invalid --source")?;
    let synthetic = SyntheticOptions {
        frames: args.frames,
        bright: args.bright.clone(),
        paced: args.paced,
    };

    let container = if args.dry_run {
        info!("Dry run: outputs are kept in memory");
        DefaultAppContainer::dry_run(config)
    } else {
        DefaultAppContainer::new(config)
    }
    .context("Failed to set up the recorder")?;

    let jobs = container
        .stream_jobs(&sources, &synthetic)
        .context("Failed to open stream sources")?;
    let outcomes = container.recorder().run(jobs, stop).await;

    let mut summaries = Vec::new();
    let mut failed = Vec::new();
    for outcome in outcomes {
        match outcome.result {
            Ok(summary) => summaries.push(summary),
            Err(e) => {
                warn!(stream = %outcome.stream, "Stream failed: {}", e);
                failed.push(outcome.stream);
            }
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else {
        for summary in &summaries {
            print!("{}", format_summary(summary));
        }
    }

    if !failed.is_empty() {
        return Err(anyhow::anyhow!("{} stream(s) failed: {}", failed.len(), failed.join(", ")));
    }
    info!("Record operation completed successfully");
    Ok(())
}

fn format_summary(summary: &RunSummary) -> String {
    let mut output = String::new();
    output.push_str(&format!("Stream {}:\n", summary.stream));
    output.push_str(&format!("  Frames: {}\n", summary.frames));
    output.push_str(&format!("  Segments: {}\n", summary.segments_closed));
    output.push_str(&format!("  Clips: {}\n", summary.clips.len()));
    for clip in &summary.clips {
        output.push_str(&format!(
            "    #{} frames {}..{} -> {}\n",
            clip.id,
            clip.start_index,
            clip.end_index,
            clip.path.display()
        ));
    }
    let problems = [
        ("Read failures", summary.read_failures),
        ("Classifier failures", summary.classifier_failures),
        ("Writer failures", summary.writer_failures),
        ("Extraction failures", summary.extraction_failures),
        ("Rejected clips", summary.rejected_clips.len() as u64),
        ("Discarded events", summary.discarded_events),
    ];
    for (label, count) in problems {
        if count > 0 {
            output.push_str(&format!("  {}: {}\n", label, count));
        }
    }
    if summary.stopped {
        output.push_str("  Stopped before end of stream\n");
    }
    output
}

/// Execute the scan command
pub async fn scan(args: ScanArgs, config: AppConfig) -> Result<()> {
    let stream = args.stream.clone().unwrap_or_else(|| {
        args.dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "scan".to_string())
    });
    let container = DefaultAppContainer::new(config).context("Failed to set up the scanner")?;
    let report = container
        .scan_interactor(&stream)
        .execute(ScanRequest { dir: args.dir.clone() })
        .await
        .with_context(|| format!("Failed to scan {}", args.dir.display()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Scanned {} file(s), {} frame(s)", report.files, report.frames);
        if report.invalid_files > 0 {
            println!("  Invalid files: {}", report.invalid_files);
        }
        if report.sessions > 1 {
            println!("  Recordings: {}", report.sessions);
        }
        println!("  Events: {}", report.events.len());
        for clip in &report.clips {
            println!(
                "    #{} frames {}..{} -> {}",
                clip.id,
                clip.start_index,
                clip.end_index,
                clip.path.display()
            );
        }
        if report.failures > 0 {
            println!("  Failures: {}", report.failures);
        }
    }
    Ok(())
}

/// Execute the inspect command
pub async fn inspect(args: InspectArgs) -> Result<()> {
    let format = ReportFormat::parse(&args.format).context("Invalid --format")?;
    if !args.input.exists() {
        return Err(anyhow::anyhow!("Input file does not exist: {}", args.input.display()));
    }
    let response = InspectInteractor::new()
        .execute(InspectRequest {
            path: args.input.clone(),
            format,
        })
        .await
        .with_context(|| format!("Failed to inspect {}", args.input.display()))?;
    print!("{}", response.summary);
    if !response.summary.ends_with('\n') {
        println!();
    }
    Ok(())
}
