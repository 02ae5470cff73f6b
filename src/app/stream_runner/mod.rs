// Stream runner - Drives one stream's pipeline from its source on tokio
//
// The source is pulled on a blocking task into a bounded channel. Up to
// `workers` frames are classified at once on the blocking pool; verdicts are
// consumed strictly in frame order, so the pipeline sees exactly the sequence
// the source produced. Clips are handed to the sink on their own tasks and
// never hold up the next frame.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::domain::model::{Clip, Frame, Verdict};
use crate::engine::{StepReport, StreamPipeline};
use crate::error::{EventCamError, EventCamResult};
use crate::ports::{ArtifactSink, Classifier, FrameSource, SinkAck, SourceEvent};

/// Frames buffered between the source thread and the pipeline
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Requests cancellation of every runner holding a matching `StopSignal`
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }
}

/// Observes a `StopHandle`
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once stop is requested; never if the handle is dropped first
    pub async fn stopped(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Create a connected stop handle and signal
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx: Arc::new(tx) }, StopSignal { rx })
}

/// What one stream run produced
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub stream: String,
    pub frames: u64,
    pub read_failures: u64,
    pub classifier_failures: u64,
    pub segments_closed: u64,
    pub writer_failures: u64,
    /// Clips the sink accepted
    pub clips: Vec<Clip>,
    /// Clips the sink refused; the files stay where extraction put them
    pub rejected_clips: Vec<Clip>,
    pub extraction_failures: u64,
    pub discarded_events: u64,
    pub stopped: bool,
}

enum Slot {
    Classify {
        frame: Frame,
        task: JoinHandle<EventCamResult<Verdict>>,
    },
    Missing(u64),
}

enum Settled {
    Verdict(Option<Verdict>),
    Missing(u64),
}

/// Await the oldest queued slot without removing it
async fn settle_head(queue: &mut VecDeque<Slot>, classifier_failures: &mut u64) -> Settled {
    match queue.front_mut() {
        Some(Slot::Classify { frame, task }) => match task.await {
            Ok(Ok(verdict)) => Settled::Verdict(Some(verdict)),
            Ok(Err(e)) => {
                warn!(index = frame.index(), "{}", e);
                *classifier_failures += 1;
                Settled::Verdict(None)
            }
            Err(e) => {
                warn!(index = frame.index(), "Classifier task failed: {}", e);
                *classifier_failures += 1;
                Settled::Verdict(None)
            }
        },
        Some(Slot::Missing(index)) => Settled::Missing(*index),
        None => std::future::pending().await,
    }
}

/// Runs pipelines against sources with a shared classifier and sink
#[derive(Clone)]
pub struct StreamRunner {
    classifier: Arc<dyn Classifier>,
    sink: Arc<dyn ArtifactSink>,
    workers: usize,
    channel_capacity: usize,
}

impl StreamRunner {
    pub fn new(classifier: Arc<dyn Classifier>, sink: Arc<dyn ArtifactSink>, workers: usize) -> Self {
        Self {
            classifier,
            sink,
            workers: workers.max(1),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Run until the source ends or `stop` fires
    pub async fn run(
        &self,
        source: Box<dyn FrameSource>,
        mut pipeline: StreamPipeline,
        mut stop: StopSignal,
    ) -> EventCamResult<RunSummary> {
        let mut summary = RunSummary {
            stream: pipeline.stream().to_string(),
            ..RunSummary::default()
        };
        info!(stream = %summary.stream, workers = self.workers, "Stream started");

        let (tx, mut rx) = mpsc::channel(self.channel_capacity);
        let reader_stop = stop.clone();
        let _reader = tokio::task::spawn_blocking(move || pull_frames(source, tx, reader_stop));

        let mut queue: VecDeque<Slot> = VecDeque::new();
        let mut sinks: JoinSet<(Clip, EventCamResult<SinkAck>)> = JoinSet::new();
        let mut source_done = false;
        let mut classifier_failures = 0;

        loop {
            if source_done && queue.is_empty() {
                break;
            }
            let can_pull = !source_done && queue.len() < self.workers;

            tokio::select! {
                biased;
                _ = stop.stopped() => {
                    summary.stopped = true;
                    break;
                }
                settled = settle_head(&mut queue, &mut classifier_failures), if !queue.is_empty() => {
                    let report = match (settled, queue.pop_front()) {
                        (Settled::Verdict(verdict), Some(Slot::Classify { frame, .. })) => {
                            pipeline.step(&frame, verdict.as_ref())
                        }
                        (Settled::Missing(index), _) => pipeline.skip(index),
                        _ => StepReport::default(),
                    };
                    self.dispatch(report, &mut summary, &mut sinks);
                }
                Some(joined) = sinks.join_next(), if !sinks.is_empty() => {
                    record_delivery(joined, &mut summary);
                }
                event = rx.recv(), if can_pull => {
                    match event {
                        Some(SourceEvent::Frame(frame)) => {
                            let classifier = Arc::clone(&self.classifier);
                            let input = frame.clone();
                            let task = tokio::task::spawn_blocking(move || classifier.classify(&input));
                            queue.push_back(Slot::Classify { frame, task });
                        }
                        Some(SourceEvent::ReadFailure { index, message }) => {
                            let error = EventCamError::SourceReadFailure { index, message };
                            warn!(stream = %summary.stream, "{}", error);
                            summary.read_failures += 1;
                            queue.push_back(Slot::Missing(index));
                        }
                        Some(SourceEvent::EndOfStream) | None => {
                            debug!(stream = %summary.stream, "{}", EventCamError::SourceExhausted);
                            source_done = true;
                        }
                    }
                }
            }
        }

        let report = if summary.stopped {
            // Frames already pulled are still recorded; their verdicts are not used.
            rx.close();
            let mut report = StepReport::default();
            for slot in queue.drain(..) {
                match slot {
                    Slot::Classify { frame, task } => {
                        task.abort();
                        report.merge(pipeline.step(&frame, None));
                    }
                    Slot::Missing(index) => report.merge(pipeline.skip(index)),
                }
            }
            while let Ok(event) = rx.try_recv() {
                match event {
                    SourceEvent::Frame(frame) => report.merge(pipeline.step(&frame, None)),
                    SourceEvent::ReadFailure { index, .. } => report.merge(pipeline.skip(index)),
                    SourceEvent::EndOfStream => break,
                }
            }
            report.merge(pipeline.stop());
            report
        } else {
            pipeline.finish()
        };
        self.dispatch(report, &mut summary, &mut sinks);

        while let Some(joined) = sinks.join_next().await {
            record_delivery(joined, &mut summary);
        }

        summary.frames = pipeline.next_index();
        summary.classifier_failures = classifier_failures;
        info!(
            stream = %summary.stream,
            frames = summary.frames,
            segments = summary.segments_closed,
            clips = summary.clips.len(),
            stopped = summary.stopped,
            "Stream run complete"
        );
        Ok(summary)
    }

    fn dispatch(
        &self,
        report: StepReport,
        summary: &mut RunSummary,
        sinks: &mut JoinSet<(Clip, EventCamResult<SinkAck>)>,
    ) {
        summary.segments_closed += report.segments_closed.len() as u64;
        summary.discarded_events += report.discarded.len() as u64;
        for error in &report.errors {
            match error {
                EventCamError::WriterOpenFailed { .. } | EventCamError::WriterWriteFailed { .. } => {
                    summary.writer_failures += 1
                }
                _ => summary.extraction_failures += 1,
            }
        }
        for clip in report.clips {
            let sink = Arc::clone(&self.sink);
            sinks.spawn(async move {
                let result = sink.accept(&clip).await;
                (clip, result)
            });
        }
    }
}

fn record_delivery(
    joined: Result<(Clip, EventCamResult<SinkAck>), tokio::task::JoinError>,
    summary: &mut RunSummary,
) {
    match joined {
        Ok((mut clip, Ok(ack))) => {
            if let Some(location) = ack.location {
                clip.path = location;
            }
            summary.clips.push(clip);
        }
        Ok((clip, Err(e))) => {
            warn!(stream = %clip.stream, clip = clip.id, "{}", e);
            summary.rejected_clips.push(clip);
        }
        Err(e) => warn!("Sink task failed: {}", e),
    }
}

/// Blocking loop feeding source events into the channel
fn pull_frames(mut source: Box<dyn FrameSource>, tx: mpsc::Sender<SourceEvent>, stop: StopSignal) {
    loop {
        if stop.is_stopped() {
            debug!(stream = %source.name(), "Source reader stopping");
            return;
        }
        let event = source.next_event();
        let end = matches!(event, SourceEvent::EndOfStream);
        if tx.blocking_send(event).is_err() || end {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{DiscardSink, MemoryWriterFactory, ScriptedClassifier, SyntheticSource};
    use crate::domain::model::{CaptureMode, StreamInfo};
    use crate::domain::rules::PositiveRule;
    use crate::engine::{PipelineOutputs, PipelineSettings};
    use crate::output::{ClipNamer, NamingScheme, SequenceGenerator};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records every clip it is given
    #[derive(Default)]
    struct CollectingSink {
        clips: Mutex<Vec<Clip>>,
        reject: bool,
    }

    #[async_trait]
    impl ArtifactSink for CollectingSink {
        fn name(&self) -> &str {
            "collect"
        }

        async fn accept(&self, clip: &Clip) -> EventCamResult<SinkAck> {
            self.clips.lock().unwrap().push(clip.clone());
            if self.reject {
                return Err(EventCamError::SinkRejected {
                    path: clip.path.display().to_string(),
                    message: "refused".to_string(),
                });
            }
            Ok(SinkAck { location: None })
        }
    }

    fn settings() -> PipelineSettings {
        PipelineSettings {
            segment_duration: Duration::from_secs(2),
            overlap: Duration::from_secs(1),
            fps: None,
            min_consecutive_positive_to_confirm: 4,
            end_negative_run: 3,
            min_event_duration: Duration::from_millis(500),
            max_event_duration: None,
            rule: PositiveRule::default(),
            mode: CaptureMode::LiveBuffer,
        }
    }

    fn pipeline(memory: &MemoryWriterFactory) -> StreamPipeline {
        let sequence = SequenceGenerator::shared();
        let outputs = PipelineOutputs {
            factory: Arc::new(memory.clone()),
            reader: Some(Arc::new(memory.reader())),
            segments: ClipNamer::new("segments", "cam", "frames", NamingScheme::Indexed, Arc::clone(&sequence)),
            clips: ClipNamer::new("events", "cam", "frames", NamingScheme::Indexed, sequence),
        };
        StreamPipeline::new("cam", StreamInfo::new(10, 1, 1).unwrap(), &settings(), outputs).unwrap()
    }

    fn flags(len: usize, positive: std::ops::Range<usize>) -> Vec<bool> {
        (0..len).map(|i| positive.contains(&i)).collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_out_of_order_classification_keeps_event_boundaries() {
        let memory = MemoryWriterFactory::default();
        // later frames finish first within every window of four
        let delays = vec![
            Duration::from_millis(8),
            Duration::from_millis(5),
            Duration::from_millis(2),
            Duration::from_millis(0),
        ];
        let classifier = ScriptedClassifier::from_flags(&flags(60, 20..32)).with_delays(delays);
        let sink = Arc::new(CollectingSink::default());
        let runner = StreamRunner::new(Arc::new(classifier), sink.clone(), 4);

        let source = SyntheticSource::new("cam", StreamInfo::new(10, 1, 1).unwrap()).with_length(60);
        let (_handle, signal) = stop_channel();
        let summary = runner.run(Box::new(source), pipeline(&memory), signal).await.unwrap();

        assert_eq!(summary.frames, 60);
        assert!(!summary.stopped);
        assert_eq!(summary.clips.len(), 1);
        let clip = &summary.clips[0];
        assert_eq!((clip.start_index, clip.end_index), (20, 32));
        assert_eq!(memory.indices(&clip.path).unwrap(), (20..32).collect::<Vec<_>>());
        assert_eq!(memory.live_writers(), 0);
    }

    #[tokio::test]
    async fn test_read_and_classifier_failures_are_skipped() {
        let memory = MemoryWriterFactory::default();
        let classifier = ScriptedClassifier::from_flags(&flags(30, 0..0)).failing_at(5);
        let runner = StreamRunner::new(Arc::new(classifier), Arc::new(DiscardSink), 2);
        let source = SyntheticSource::new("cam", StreamInfo::new(10, 1, 1).unwrap())
            .with_length(30)
            .with_read_failure(7);

        let (_handle, signal) = stop_channel();
        let summary = runner.run(Box::new(source), pipeline(&memory), signal).await.unwrap();

        assert_eq!(summary.frames, 30);
        assert_eq!(summary.read_failures, 1);
        assert_eq!(summary.classifier_failures, 1);
        assert_eq!(summary.segments_closed, 3);
        let first = memory.published()[0].clone();
        assert_eq!(memory.indices(&first).unwrap().len(), 19);
    }

    #[tokio::test]
    async fn test_sink_rejection_keeps_clip_and_run_continues() {
        let memory = MemoryWriterFactory::default();
        let classifier = ScriptedClassifier::from_flags(&flags(40, 5..15));
        let sink = Arc::new(CollectingSink {
            reject: true,
            ..CollectingSink::default()
        });
        let runner = StreamRunner::new(Arc::new(classifier), sink.clone(), 1);
        let source = SyntheticSource::new("cam", StreamInfo::new(10, 1, 1).unwrap()).with_length(40);

        let (_handle, signal) = stop_channel();
        let summary = runner.run(Box::new(source), pipeline(&memory), signal).await.unwrap();

        assert!(summary.clips.is_empty());
        assert_eq!(summary.rejected_clips.len(), 1);
        assert!(memory.indices(&summary.rejected_clips[0].path).is_some());
        assert_eq!(summary.frames, 40);
    }

    #[tokio::test]
    async fn test_stop_closes_segments_and_drops_partial_event() {
        let memory = MemoryWriterFactory::default();
        // positive from frame 12 on, never confirmed before the stop
        let classifier = ScriptedClassifier::from_flags(&flags(1000, 12..1000));
        let sink = Arc::new(CollectingSink::default());
        let runner = StreamRunner::new(Arc::new(classifier), sink.clone(), 2).with_channel_capacity(4);
        let source = SyntheticSource::new("cam", StreamInfo::new(100, 1, 1).unwrap()).paced(true);

        let (handle, signal) = stop_channel();
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            handle.stop();
        });

        let mut settings = settings();
        settings.min_consecutive_positive_to_confirm = 100_000;
        let outputs = PipelineOutputs {
            factory: Arc::new(memory.clone()),
            reader: None,
            segments: ClipNamer::new("segments", "cam", "frames", NamingScheme::Indexed, SequenceGenerator::shared()),
            clips: ClipNamer::new("events", "cam", "frames", NamingScheme::Indexed, SequenceGenerator::shared()),
        };
        let pipeline = StreamPipeline::new("cam", StreamInfo::new(100, 1, 1).unwrap(), &settings, outputs).unwrap();
        let summary = runner.run(Box::new(source), pipeline, signal).await.unwrap();
        stopper.await.unwrap();

        assert!(summary.stopped);
        assert!(summary.frames > 0);
        assert!(summary.clips.is_empty());
        assert!(sink.clips.lock().unwrap().is_empty());
        assert_eq!(memory.live_writers(), 0);
        assert!(summary.segments_closed >= 1);
    }
}
