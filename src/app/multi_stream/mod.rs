// Multi-stream recorder - Runs several independent stream pipelines at once
//
// Streams share only the classifier, the sink and the id sequence inside
// their namers. A stream that fails or panics does not take the others down.

use std::io;

use tokio::task::JoinSet;
use tracing::{error, info};

use crate::app::stream_runner::{RunSummary, StopSignal, StreamRunner};
use crate::engine::StreamPipeline;
use crate::error::{EventCamError, EventCamResult};
use crate::ports::FrameSource;

/// One stream to record
pub struct StreamJob {
    pub source: Box<dyn FrameSource>,
    pub pipeline: StreamPipeline,
}

/// Outcome of one stream
#[derive(Debug)]
pub struct StreamOutcome {
    pub stream: String,
    pub result: EventCamResult<RunSummary>,
}

pub struct MultiStreamRecorder {
    runner: StreamRunner,
}

impl MultiStreamRecorder {
    pub fn new(runner: StreamRunner) -> Self {
        Self { runner }
    }

    /// Run every job to completion (or until `stop`), returning outcomes in job order
    pub async fn run(&self, jobs: Vec<StreamJob>, stop: StopSignal) -> Vec<StreamOutcome> {
        let names: Vec<String> = jobs.iter().map(|job| job.pipeline.stream().to_string()).collect();
        info!(streams = names.len(), "Recording started");

        let mut tasks = JoinSet::new();
        for (position, job) in jobs.into_iter().enumerate() {
            let runner = self.runner.clone();
            let stop = stop.clone();
            tasks.spawn(async move { (position, runner.run(job.source, job.pipeline, stop).await) });
        }

        let mut results: Vec<Option<EventCamResult<RunSummary>>> = names.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((position, result)) => {
                    if let Err(e) = &result {
                        error!(stream = %names[position], "{}", e);
                    }
                    results[position] = Some(result);
                }
                Err(e) => error!("Stream task failed: {}", e),
            }
        }

        names
            .into_iter()
            .zip(results)
            .map(|(stream, result)| StreamOutcome {
                result: result.unwrap_or_else(|| {
                    Err(EventCamError::IoError(io::Error::new(
                        io::ErrorKind::Other,
                        format!("stream {} task aborted", stream),
                    )))
                }),
                stream,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{KeepSink, LumaClassifier, MemoryWriterFactory, SyntheticSource};
    use crate::app::stream_runner::stop_channel;
    use crate::domain::model::{CaptureMode, StreamInfo};
    use crate::domain::rules::PositiveRule;
    use crate::engine::{PipelineOutputs, PipelineSettings};
    use crate::output::{ClipNamer, NamingScheme, SequenceGenerator};
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 3)]
    async fn test_streams_run_independently_with_unique_ids() {
        let memory = MemoryWriterFactory::default();
        let sequence = SequenceGenerator::shared();
        let settings = PipelineSettings {
            segment_duration: Duration::from_secs(2),
            overlap: Duration::from_secs(1),
            fps: None,
            min_consecutive_positive_to_confirm: 3,
            end_negative_run: 2,
            min_event_duration: Duration::from_millis(300),
            max_event_duration: None,
            rule: PositiveRule::default(),
            mode: CaptureMode::ReCut,
        };

        let info = StreamInfo::new(10, 2, 2).unwrap();
        let jobs = ["north", "south", "east"]
            .iter()
            .map(|name| {
                let outputs = PipelineOutputs {
                    factory: Arc::new(memory.clone()),
                    reader: Some(Arc::new(memory.reader())),
                    segments: ClipNamer::new("segments", name, "frames", NamingScheme::Sequenced, Arc::clone(&sequence)),
                    clips: ClipNamer::new("events", name, "frames", NamingScheme::Sequenced, Arc::clone(&sequence)),
                };
                StreamJob {
                    source: Box::new(SyntheticSource::new(name, info).with_length(50).with_bright(10..20)),
                    pipeline: StreamPipeline::new(name, info, &settings, outputs).unwrap(),
                }
            })
            .collect();

        let runner = StreamRunner::new(Arc::new(LumaClassifier::default()), Arc::new(KeepSink), 2);
        let (_handle, signal) = stop_channel();
        let outcomes = MultiStreamRecorder::new(runner).run(jobs, signal).await;

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[1].stream, "south");
        let mut ids = HashSet::new();
        for outcome in &outcomes {
            let summary = outcome.result.as_ref().unwrap();
            assert_eq!(summary.frames, 50);
            assert_eq!(summary.segments_closed, 5);
            assert_eq!(summary.clips.len(), 1);
            assert!(ids.insert(summary.clips[0].id));
        }
        // 5 segments and 1 clip per stream
        assert_eq!(sequence.peek(), 18);
        assert_eq!(memory.published().len(), 18);
    }
}
