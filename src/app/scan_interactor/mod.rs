// Scan interactor - Classifies recorded segment files after the fact
//
// Every container in a directory is replayed through a fresh aggregator.
// Overlapping segments see the same frames, so detections that share frames
// are merged into one event before it is re-cut from the segments on disk.
// Frame indices restart with every recording, so segments are first grouped
// into sessions by the wall-clock time their frame 0 maps to.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::domain::model::{Clip, EventRange, SegmentRecord, StreamInfo};
use crate::domain::rules::PositiveRule;
use crate::engine::{AggregatorOutput, ClipExtractor, EventAggregator, PipelineSettings};
use crate::error::{EventCamError, EventCamResult};
use crate::output::{ClipNamer, ContainerReader, ContainerSegmentReader, CONTAINER_EXTENSION};
use crate::ports::{ArtifactSink, Classifier, WriterFactory};

/// Request for an offline scan
#[derive(Debug, Clone)]
pub struct ScanRequest {
    /// Directory holding one stream's segment containers
    pub dir: PathBuf,
}

/// Segments whose frame-0 origins differ by less than this share a session
const SESSION_ORIGIN_TOLERANCE_MS: i64 = 1_000;

/// Outcome of an offline scan
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub files: usize,
    pub invalid_files: usize,
    /// Recording sessions found among the segments
    pub sessions: usize,
    pub frames: u64,
    pub classifier_failures: u64,
    /// Detections before overlapping ones were merged
    pub detections: usize,
    pub events: Vec<EventRange>,
    pub clips: Vec<Clip>,
    pub failures: usize,
}

/// One segment file replayed through the aggregator
struct ScannedSegment {
    record: SegmentRecord,
    info: StreamInfo,
    detections: Vec<EventRange>,
    classifier_failures: u64,
}

/// Interactor for the offline scan use case
pub struct ScanInteractor {
    classifier: Arc<dyn Classifier>,
    settings: PipelineSettings,
    factory: Arc<dyn WriterFactory>,
    clips: ClipNamer,
    sink: Arc<dyn ArtifactSink>,
}

impl ScanInteractor {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        settings: PipelineSettings,
        factory: Arc<dyn WriterFactory>,
        clips: ClipNamer,
        sink: Arc<dyn ArtifactSink>,
    ) -> Self {
        Self {
            classifier,
            settings,
            factory,
            clips,
            sink,
        }
    }

    pub async fn execute(&self, request: ScanRequest) -> EventCamResult<ScanReport> {
        let files = segment_files(&request.dir)?;
        info!(dir = %request.dir.display(), files = files.len(), "Scanning segments");

        let mut report = ScanReport {
            files: files.len(),
            ..ScanReport::default()
        };
        let mut scanned = Vec::new();
        for (id, path) in files.into_iter().enumerate() {
            let classifier = Arc::clone(&self.classifier);
            let settings = self.settings.clone();
            let stream = self.clips.stream().to_string();
            let file = path.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                scan_segment(&file, id as u64, &stream, classifier.as_ref(), &settings)
            })
            .await
            .map_err(|e| EventCamError::IoError(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

            match outcome {
                Ok(Some(segment)) => {
                    report.frames += segment.record.frames_written;
                    report.classifier_failures += segment.classifier_failures;
                    report.detections += segment.detections.len();
                    scanned.push(segment);
                }
                Ok(None) => debug!("Skipping empty container {}", path.display()),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("{}", e);
                    report.invalid_files += 1;
                }
            }
        }

        let sessions = group_sessions(scanned);
        report.sessions = sessions.len();
        if sessions.len() > 1 {
            info!(sessions = sessions.len(), "Segments belong to several recordings");
        }
        for session in sessions {
            self.extract_session(session, &mut report).await;
        }

        info!(
            events = report.events.len(),
            clips = report.clips.len(),
            frames = report.frames,
            "Scan complete"
        );
        Ok(report)
    }

    /// Merge one session's detections and re-cut them from its own segments
    async fn extract_session(&self, session: Vec<ScannedSegment>, report: &mut ScanReport) {
        let Some(info) = session.first().map(|s| s.info) else {
            return;
        };
        if session.iter().any(|s| s.info != info) {
            warn!("Segments disagree on frame geometry; clips use the first segment's");
        }

        let records: Vec<SegmentRecord> = session.iter().map(|s| s.record.clone()).collect();
        let events = merge_detections(session.into_iter().flat_map(|s| s.detections).collect());

        let extractor = ClipExtractor::new(
            info,
            Arc::clone(&self.factory),
            Some(Arc::new(ContainerSegmentReader::new())),
            self.clips.clone(),
        );
        for range in &events {
            let clip = match extractor.extract_recut(range, &records) {
                Ok(clip) => clip,
                Err(e) => {
                    warn!(event_start = range.start_index, "{}", e);
                    report.failures += 1;
                    continue;
                }
            };
            match self.sink.accept(&clip).await {
                Ok(ack) => {
                    let mut clip = clip;
                    if let Some(location) = ack.location {
                        clip.path = location;
                    }
                    report.clips.push(clip);
                }
                Err(e) => {
                    warn!(clip = clip.id, "{}", e);
                    report.failures += 1;
                }
            }
        }
        report.events.extend(events);
    }
}

/// Wall-clock time frame 0 of a segment's recording maps to
fn session_origin(segment: &ScannedSegment) -> DateTime<Utc> {
    let fps = segment.info.fps.max(1) as i64;
    let offset_micros = (segment.record.window_start as i64).saturating_mul(1_000_000) / fps;
    segment.record.start_timestamp - chrono::Duration::microseconds(offset_micros)
}

/// Split segments into recordings: same origin within tolerance, ordered by origin
fn group_sessions(mut scanned: Vec<ScannedSegment>) -> Vec<Vec<ScannedSegment>> {
    scanned.sort_by_key(session_origin);
    let tolerance = chrono::Duration::milliseconds(SESSION_ORIGIN_TOLERANCE_MS);
    let mut sessions: Vec<(DateTime<Utc>, Vec<ScannedSegment>)> = Vec::new();
    for segment in scanned {
        let origin = session_origin(&segment);
        match sessions.last_mut() {
            Some((anchor, members)) if origin - *anchor < tolerance => members.push(segment),
            _ => sessions.push((origin, vec![segment])),
        }
    }
    sessions.into_iter().map(|(_, members)| members).collect()
}

/// Container files under `dir`, in name order
fn segment_files(dir: &Path) -> EventCamResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(EventCamError::IoError(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("scan directory does not exist: {}", dir.display()),
        )));
    }
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension().is_some_and(|ext| ext == CONTAINER_EXTENSION)
                && !path
                    .file_name()
                    .is_some_and(|name| name.to_string_lossy().starts_with('.'))
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Replay one container; `None` when it holds no frames
fn scan_segment(
    path: &Path,
    id: u64,
    stream: &str,
    classifier: &dyn Classifier,
    settings: &PipelineSettings,
) -> EventCamResult<Option<ScannedSegment>> {
    let mut reader = ContainerReader::open(path)?;
    let info = reader.header().stream_info();
    let (_, policy) = settings.resolve(info.fps)?;
    let rule: PositiveRule = settings.rule;
    let mut aggregator = EventAggregator::new(policy, false);

    let mut detections = Vec::new();
    let mut classifier_failures = 0;
    let mut span: Option<(u64, u64)> = None;
    let mut timestamps: Option<(DateTime<Utc>, DateTime<Utc>)> = None;
    let mut frames_written = 0u64;

    while let Some(frame) = reader.next_frame()? {
        let index = frame.index();
        span = Some(span.map_or((index, index), |(first, _)| (first, index)));
        timestamps = Some(timestamps.map_or((frame.timestamp(), frame.timestamp()), |(first, _)| {
            (first, frame.timestamp())
        }));
        frames_written += 1;

        match classifier.classify(&frame) {
            Ok(verdict) => {
                if let AggregatorOutput::Emitted(event) = aggregator.step(&frame, rule.is_positive(&verdict)) {
                    detections.push(event.range);
                }
            }
            Err(e) => {
                debug!(path = %path.display(), "{}", e);
                classifier_failures += 1;
            }
        }
    }
    if let AggregatorOutput::Emitted(event) = aggregator.finish() {
        detections.push(event.range);
    }

    let (Some((first, last)), Some((start_timestamp, end_timestamp))) = (span, timestamps) else {
        return Ok(None);
    };
    debug!(
        path = %path.display(),
        first,
        last,
        detections = detections.len(),
        "Segment scanned"
    );
    Ok(Some(ScannedSegment {
        record: SegmentRecord {
            id,
            stream: stream.to_string(),
            path: path.to_path_buf(),
            window_start: first,
            window_end: last + 1,
            frames_written,
            contiguous: last - first + 1 == frames_written,
            start_timestamp,
            end_timestamp,
        },
        info,
        detections,
        classifier_failures,
    }))
}

/// Union detections that share frames, ordered by start
fn merge_detections(mut detections: Vec<EventRange>) -> Vec<EventRange> {
    detections.sort_by_key(|r| (r.start_index, r.end_index));
    let mut merged: Vec<EventRange> = Vec::new();
    for range in detections {
        match merged.last_mut() {
            Some(last) if last.overlaps(&range) => {
                if range.end_index > last.end_index {
                    last.end_index = range.end_index;
                    last.end_timestamp = range.end_timestamp;
                }
            }
            _ => merged.push(range),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{KeepSink, LumaClassifier};
    use crate::domain::model::{CaptureMode, Frame};
    use crate::output::{ContainerWriter, ContainerWriterFactory, NamingScheme, SequenceGenerator};
    use crate::ports::{FrameWriter, OutputRequest};
    use chrono::TimeZone;
    use std::time::Duration;
    use tempfile::TempDir;

    fn range(start: u64, end: u64) -> EventRange {
        let origin = Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap();
        EventRange {
            start_index: start,
            end_index: end,
            start_timestamp: origin + chrono::Duration::seconds(start as i64),
            end_timestamp: origin + chrono::Duration::seconds(end as i64),
        }
    }

    fn origin() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap()
    }

    /// Segment file with frames `indices`; frames in `bright` are bright
    fn write_segment(path: &Path, indices: std::ops::Range<u64>, bright: std::ops::Range<u64>) {
        write_recording_segment(path, origin(), indices, bright);
    }

    /// Like `write_segment`, for a recording whose frame 0 was captured at `origin`
    fn write_recording_segment(
        path: &Path,
        origin: DateTime<Utc>,
        indices: std::ops::Range<u64>,
        bright: std::ops::Range<u64>,
    ) {
        let info = StreamInfo::new(10, 2, 2).unwrap();
        let request = OutputRequest {
            path: path.to_path_buf(),
            info,
        };
        let mut writer = Box::new(ContainerWriter::create(&request).unwrap());
        for i in indices {
            let level = if bright.contains(&i) { 230 } else { 10 };
            let ts = origin + chrono::Duration::milliseconds(i as i64 * 100);
            writer.write_frame(&Frame::new(i, ts, 2, 2, vec![level; 12])).unwrap();
        }
        writer.finish().unwrap();
    }

    fn interactor(events_dir: &Path) -> ScanInteractor {
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
        let namer = ClipNamer::new(events_dir, "cam", "frames", NamingScheme::Indexed, SequenceGenerator::shared());
        ScanInteractor::new(
            Arc::new(LumaClassifier::default()),
            settings,
            Arc::new(ContainerWriterFactory::new()),
            namer,
            Arc::new(KeepSink),
        )
    }

    #[test]
    fn test_merge_detections_unions_shared_frames() {
        let merged = merge_detections(vec![range(25, 32), range(12, 20), range(15, 22), range(22, 24)]);
        let spans: Vec<_> = merged.iter().map(|r| (r.start_index, r.end_index)).collect();
        assert_eq!(spans, vec![(12, 22), (22, 24), (25, 32)]);
    }

    #[tokio::test]
    async fn test_scan_merges_overlapping_segments_into_one_clip() {
        let dir = TempDir::new().unwrap();
        let segments = dir.path().join("segments");
        std::fs::create_dir_all(&segments).unwrap();
        // event 15..25 straddles the first window's end
        write_segment(&segments.join("a.frames"), 0..20, 15..25);
        write_segment(&segments.join("b.frames"), 10..30, 15..25);
        write_segment(&segments.join("c.frames"), 20..40, 15..25);
        std::fs::write(segments.join("notes.txt"), b"ignored").unwrap();

        let report = interactor(&dir.path().join("events"))
            .execute(ScanRequest { dir: segments })
            .await
            .unwrap();

        assert_eq!(report.files, 3);
        assert_eq!(report.sessions, 1);
        assert_eq!(report.frames, 60);
        assert_eq!(report.detections, 3);
        let spans: Vec<_> = report.events.iter().map(|r| (r.start_index, r.end_index)).collect();
        assert_eq!(spans, vec![(15, 25)]);

        assert_eq!(report.clips.len(), 1);
        let mut reader = ContainerReader::open(&report.clips[0].path).unwrap();
        let mut indices = Vec::new();
        while let Some(frame) = reader.next_frame().unwrap() {
            indices.push(frame.index());
        }
        assert_eq!(indices, (15..25).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_scan_keeps_recordings_sharing_a_directory_apart() {
        let dir = TempDir::new().unwrap();
        let segments = dir.path().join("segments");
        std::fs::create_dir_all(&segments).unwrap();
        // two recordings an hour apart, both numbering frames from 0
        let later = origin() + chrono::Duration::hours(1);
        write_recording_segment(&segments.join("a0.frames"), origin(), 0..20, 15..25);
        write_recording_segment(&segments.join("a1.frames"), origin(), 10..30, 15..25);
        write_recording_segment(&segments.join("b0.frames"), later, 0..20, 18..28);
        write_recording_segment(&segments.join("b1.frames"), later, 10..30, 18..28);

        let report = interactor(&dir.path().join("events"))
            .execute(ScanRequest { dir: segments })
            .await
            .unwrap();

        assert_eq!(report.sessions, 2);
        let spans: Vec<_> = report.events.iter().map(|r| (r.start_index, r.end_index)).collect();
        assert_eq!(spans, vec![(15, 25), (18, 28)]);
        assert_eq!(report.clips.len(), 2);

        for (clip, indices, recording) in [(&report.clips[0], 15..25, origin()), (&report.clips[1], 18..28, later)] {
            let mut reader = ContainerReader::open(&clip.path).unwrap();
            let mut seen = Vec::new();
            while let Some(frame) = reader.next_frame().unwrap() {
                let offset = frame.timestamp() - recording;
                assert_eq!(offset, chrono::Duration::milliseconds(frame.index() as i64 * 100));
                seen.push(frame.index());
            }
            assert_eq!(seen, indices.collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn test_scan_counts_invalid_files_and_rejects_missing_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("broken.frames"), b"not a container at all!!!").unwrap();
        let report = interactor(&dir.path().join("events"))
            .execute(ScanRequest {
                dir: dir.path().to_path_buf(),
            })
            .await
            .unwrap();
        assert_eq!((report.files, report.invalid_files), (1, 1));
        assert!(report.clips.is_empty());

        let missing = interactor(dir.path())
            .execute(ScanRequest {
                dir: dir.path().join("nope"),
            })
            .await;
        assert!(missing.is_err());
    }
}
