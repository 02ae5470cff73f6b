//! Per-stream pipeline
//!
//! One synchronous step per frame index: the scheduler writes the frame into
//! its overlapping segments, the aggregator folds the frame's verdict into its
//! debounce state, and confirmed events are turned into clips. A pipeline owns
//! all of its state; streams never share one.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::domain::errors::DomainError;
use crate::domain::model::{CaptureMode, Clip, EventPolicy, EventRange, Frame, SegmentConfig, SegmentRecord, StreamInfo, Verdict};
use crate::domain::rules::PositiveRule;
use crate::engine::aggregator::{AggregatorOutput, EventAggregator};
use crate::engine::extractor::ClipExtractor;
use crate::engine::scheduler::{SegmentScheduler, TickOutcome};
use crate::error::{EventCamError, EventCamResult};
use crate::output::ClipNamer;
use crate::ports::{SegmentReader, WriterFactory};

/// Stream-independent pipeline parameters, resolved against each stream's fps
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub segment_duration: Duration,
    pub overlap: Duration,
    /// Overrides the fps a source reports
    pub fps: Option<u32>,
    pub min_consecutive_positive_to_confirm: u32,
    pub end_negative_run: u32,
    pub min_event_duration: Duration,
    pub max_event_duration: Option<Duration>,
    pub rule: PositiveRule,
    pub mode: CaptureMode,
}

impl PipelineSettings {
    /// Effective stream info: the source's, with the fps override applied
    pub fn stream_info(&self, source: StreamInfo) -> StreamInfo {
        StreamInfo {
            fps: self.fps.unwrap_or(source.fps),
            ..source
        }
    }

    /// Build the frame-based segment and event parameters for `fps`
    pub fn resolve(&self, fps: u32) -> Result<(SegmentConfig, EventPolicy), DomainError> {
        let segment = SegmentConfig::new(self.segment_duration, self.overlap, fps)?;
        let policy = EventPolicy::from_seconds(
            self.min_consecutive_positive_to_confirm,
            self.end_negative_run,
            self.min_event_duration.as_secs_f64(),
            self.max_event_duration.map(|d| d.as_secs_f64()),
            fps,
        )?;
        Ok((segment, policy))
    }
}

/// Output collaborators of one pipeline
#[derive(Clone)]
pub struct PipelineOutputs {
    pub factory: Arc<dyn WriterFactory>,
    /// Required for re-cut mode
    pub reader: Option<Arc<dyn SegmentReader>>,
    pub segments: ClipNamer,
    pub clips: ClipNamer,
}

/// Everything one step (or the final flush) produced
#[derive(Debug, Default)]
pub struct StepReport {
    pub segments_closed: Vec<SegmentRecord>,
    pub clips: Vec<Clip>,
    /// Events that closed without confirmation, or were dropped on stop
    pub discarded: Vec<EventRange>,
    /// Recoverable failures; each has already been logged once
    pub errors: Vec<EventCamError>,
}

impl StepReport {
    fn absorb(&mut self, outcome: TickOutcome) {
        self.segments_closed.extend(outcome.closed);
        self.errors.extend(outcome.failures);
    }

    pub fn merge(&mut self, other: StepReport) {
        self.segments_closed.extend(other.segments_closed);
        self.clips.extend(other.clips);
        self.discarded.extend(other.discarded);
        self.errors.extend(other.errors);
    }
}

pub struct StreamPipeline {
    stream: String,
    info: StreamInfo,
    mode: CaptureMode,
    rule: PositiveRule,
    scheduler: SegmentScheduler,
    aggregator: EventAggregator,
    extractor: ClipExtractor,
    next_index: u64,
    /// Closed segments still needed by pending or active re-cut events
    segments: Vec<SegmentRecord>,
    /// Furthest window end among all closed segments
    closed_horizon: u64,
    pending: VecDeque<EventRange>,
    finished: bool,
}

impl StreamPipeline {
    /// Build a pipeline; invalid settings are rejected here, before any frame
    pub fn new(
        stream: &str,
        source_info: StreamInfo,
        settings: &PipelineSettings,
        outputs: PipelineOutputs,
    ) -> EventCamResult<Self> {
        let info = settings.stream_info(source_info);
        let (segment, policy) = settings.resolve(info.fps)?;
        if settings.mode == CaptureMode::ReCut && outputs.reader.is_none() {
            return Err(DomainError::config("re-cut mode needs a segment reader for the output format").into());
        }

        info!(
            stream,
            fps = info.fps,
            duration_frames = segment.duration_frames(),
            step_frames = segment.step_frames(),
            live_slots = segment.max_live_slots(),
            mode = %settings.mode,
            "Pipeline ready"
        );

        let scheduler = SegmentScheduler::new(segment, info, Arc::clone(&outputs.factory), outputs.segments);
        let aggregator = EventAggregator::new(policy, settings.mode == CaptureMode::LiveBuffer);
        let extractor = ClipExtractor::new(info, outputs.factory, outputs.reader, outputs.clips);

        Ok(Self {
            stream: stream.to_string(),
            info,
            mode: settings.mode,
            rule: settings.rule,
            scheduler,
            aggregator,
            extractor,
            next_index: 0,
            segments: Vec::new(),
            closed_horizon: 0,
            pending: VecDeque::new(),
            finished: false,
        })
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn info(&self) -> StreamInfo {
        self.info
    }

    /// Index the pipeline expects next
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    pub fn live_slots(&self) -> usize {
        self.scheduler.live_slots()
    }

    /// Process one frame. `verdict` is `None` when classification failed; the
    /// frame is still recorded but does not move the event state machine.
    pub fn step(&mut self, frame: &Frame, verdict: Option<&Verdict>) -> StepReport {
        let mut report = StepReport::default();
        if self.finished {
            return report;
        }

        let index = frame.index();
        if index < self.next_index {
            warn!(stream = %self.stream, index, expected = self.next_index, "Dropping out-of-order frame");
            return report;
        }
        self.catch_up(index, &mut report);

        report.absorb(self.scheduler.tick(Some(frame)));
        self.next_index = index + 1;

        if let Some(verdict) = verdict {
            let positive = self.rule.is_positive(verdict);
            let output = self.aggregator.step(frame, positive);
            self.handle(output, &mut report);
        }

        self.after_segments(&mut report);
        report
    }

    /// The frame at `index` could not be read: its tick passes without a frame
    pub fn skip(&mut self, index: u64) -> StepReport {
        let mut report = StepReport::default();
        if self.finished || index < self.next_index {
            return report;
        }
        self.catch_up(index, &mut report);
        report.absorb(self.scheduler.tick(None));
        self.next_index = index + 1;
        self.after_segments(&mut report);
        report
    }

    /// End of stream: flush the active event, close every segment and
    /// extract whatever is still pending
    pub fn finish(&mut self) -> StepReport {
        let mut report = StepReport::default();
        if self.finished {
            return report;
        }
        let output = self.aggregator.finish();
        self.handle(output, &mut report);
        self.shutdown(&mut report);
        info!(stream = %self.stream, frames = self.next_index, "Stream finished");
        report
    }

    /// Cancellation: drop the active event, close every segment, still
    /// extract events that were already complete
    pub fn stop(&mut self) -> StepReport {
        let mut report = StepReport::default();
        if self.finished {
            return report;
        }
        if let Some(range) = self.aggregator.abort() {
            report.discarded.push(range);
        }
        self.shutdown(&mut report);
        info!(stream = %self.stream, frames = self.next_index, "Stream stopped");
        report
    }

    fn shutdown(&mut self, report: &mut StepReport) {
        report.absorb(self.scheduler.close_all());
        self.record_segments(report);
        while let Some(range) = self.pending.pop_front() {
            self.recut(&range, report);
        }
        self.segments.clear();
        self.finished = true;
    }

    fn catch_up(&mut self, index: u64, report: &mut StepReport) {
        if index > self.next_index {
            debug!(stream = %self.stream, from = self.next_index, to = index, "Source skipped frames");
        }
        while self.next_index < index {
            report.absorb(self.scheduler.tick(None));
            self.next_index += 1;
        }
    }

    fn handle(&mut self, output: AggregatorOutput, report: &mut StepReport) {
        match output {
            AggregatorOutput::Nothing => {}
            AggregatorOutput::Discarded(range) => report.discarded.push(range),
            AggregatorOutput::Emitted(event) => match self.mode {
                CaptureMode::LiveBuffer => match self.extractor.extract_buffered(&event) {
                    Ok(clip) => report.clips.push(clip),
                    Err(e) => {
                        warn!(stream = %self.stream, event_start = event.range.start_index, "{}", e);
                        report.errors.push(e);
                    }
                },
                CaptureMode::ReCut => {
                    debug!(
                        stream = %self.stream,
                        event_start = event.range.start_index,
                        event_end = event.range.end_index,
                        "Event queued until its segments close"
                    );
                    self.pending.push_back(event.range);
                }
            },
        }
    }

    fn after_segments(&mut self, report: &mut StepReport) {
        self.record_segments(report);

        while self
            .pending
            .front()
            .is_some_and(|range| range.end_index <= self.closed_horizon)
        {
            if let Some(range) = self.pending.pop_front() {
                self.recut(&range, report);
            }
        }

        // Keep only segments a pending or active event can still reach.
        let horizon = self
            .pending
            .front()
            .map(|r| r.start_index)
            .into_iter()
            .chain(self.aggregator.active_start())
            .min()
            .unwrap_or(self.next_index);
        self.segments.retain(|s| s.window_end > horizon);
    }

    fn record_segments(&mut self, report: &StepReport) {
        for record in &report.segments_closed {
            self.closed_horizon = self.closed_horizon.max(record.window_end);
        }
        if self.mode == CaptureMode::ReCut {
            for record in &report.segments_closed {
                if !self.segments.iter().any(|s| s.id == record.id) {
                    self.segments.push(record.clone());
                }
            }
        }
    }

    fn recut(&mut self, range: &EventRange, report: &mut StepReport) {
        match self.extractor.extract_recut(range, &self.segments) {
            Ok(clip) => report.clips.push(clip),
            Err(e) => {
                warn!(stream = %self.stream, event_start = range.start_index, "{}", e);
                report.errors.push(e);
            }
        }
    }
}

impl Drop for StreamPipeline {
    fn drop(&mut self) {
        if !self.finished {
            self.stop();
        }
    }
}
