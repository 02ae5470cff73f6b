//! Event debounce state machine
//!
//! Turns a stream of per-frame positive/negative decisions into discrete,
//! bounded event ranges. An event opens on the first positive, survives short
//! negative runs, and closes once `end_negative_run` negatives arrive in a row.
//! Closed events are emitted only when they contain a positive run of at least
//! `min_consecutive_positive_to_confirm` and span `min_event_frames`.

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::domain::model::{EventPolicy, EventRange, Frame};

/// A confirmed event ready for extraction
#[derive(Debug, Clone)]
pub struct ConfirmedEvent {
    pub range: EventRange,
    /// Frames in `range`, in order; empty unless the aggregator buffers
    pub frames: Vec<Frame>,
}

/// Result of one aggregator transition
#[derive(Debug)]
pub enum AggregatorOutput {
    Nothing,
    Emitted(ConfirmedEvent),
    /// An event closed without meeting the confirmation rules
    Discarded(EventRange),
}

#[derive(Debug)]
struct ActiveEvent {
    start_index: u64,
    start_timestamp: DateTime<Utc>,
    last_positive_index: u64,
    last_positive_timestamp: DateTime<Utc>,
    consecutive_positive: u32,
    longest_positive_run: u32,
    negative_run: u32,
    frames: Vec<Frame>,
}

impl ActiveEvent {
    fn open(frame: &Frame) -> Self {
        Self {
            start_index: frame.index(),
            start_timestamp: frame.timestamp(),
            last_positive_index: frame.index(),
            last_positive_timestamp: frame.timestamp(),
            consecutive_positive: 1,
            longest_positive_run: 1,
            negative_run: 0,
            frames: Vec::new(),
        }
    }

    fn end_index(&self) -> u64 {
        self.last_positive_index + 1
    }

    fn range(&self) -> EventRange {
        EventRange {
            start_index: self.start_index,
            end_index: self.end_index(),
            start_timestamp: self.start_timestamp,
            end_timestamp: self.last_positive_timestamp,
        }
    }
}

#[derive(Debug)]
enum EventState {
    Idle,
    Active(ActiveEvent),
}

/// Debounces per-frame verdicts into events
#[derive(Debug)]
pub struct EventAggregator {
    policy: EventPolicy,
    buffer_frames: bool,
    state: EventState,
}

impl EventAggregator {
    /// `buffer_frames` keeps the frames of the active event in memory so a
    /// confirmed event can be written without re-reading segments
    pub fn new(policy: EventPolicy, buffer_frames: bool) -> Self {
        Self {
            policy,
            buffer_frames,
            state: EventState::Idle,
        }
    }

    pub fn policy(&self) -> &EventPolicy {
        &self.policy
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, EventState::Active(_))
    }

    /// First frame index of the active event
    pub fn active_start(&self) -> Option<u64> {
        match &self.state {
            EventState::Active(event) => Some(event.start_index),
            EventState::Idle => None,
        }
    }

    /// Feed the decision for one frame. Frames must arrive in index order;
    /// frames without a decision are simply not fed.
    pub fn step(&mut self, frame: &Frame, positive: bool) -> AggregatorOutput {
        match &mut self.state {
            EventState::Idle => {
                if positive {
                    let mut event = ActiveEvent::open(frame);
                    if self.buffer_frames {
                        event.frames.push(frame.clone());
                    }
                    debug!(event_start = frame.index(), "Event opened");
                    self.state = EventState::Active(event);
                    return self.check_cap(frame.index());
                }
                AggregatorOutput::Nothing
            }
            EventState::Active(event) => {
                if self.buffer_frames {
                    event.frames.push(frame.clone());
                }
                if positive {
                    event.consecutive_positive += 1;
                    event.longest_positive_run = event.longest_positive_run.max(event.consecutive_positive);
                    event.last_positive_index = frame.index();
                    event.last_positive_timestamp = frame.timestamp();
                    event.negative_run = 0;
                } else {
                    event.consecutive_positive = 0;
                    event.negative_run += 1;
                    trace!(event_start = event.start_index, negative_run = event.negative_run, "Negative inside event");
                    if event.negative_run >= self.policy.end_negative_run {
                        return self.close();
                    }
                }
                self.check_cap(frame.index())
            }
        }
    }

    /// End of stream: emit the active event if it already qualifies
    pub fn finish(&mut self) -> AggregatorOutput {
        match self.state {
            EventState::Idle => AggregatorOutput::Nothing,
            EventState::Active(_) => self.close(),
        }
    }

    /// Cancellation: drop the active event without emitting it
    pub fn abort(&mut self) -> Option<EventRange> {
        match std::mem::replace(&mut self.state, EventState::Idle) {
            EventState::Active(event) => {
                debug!(event_start = event.start_index, "Active event discarded on stop");
                Some(event.range())
            }
            EventState::Idle => None,
        }
    }

    fn check_cap(&mut self, index: u64) -> AggregatorOutput {
        let Some(max) = self.policy.max_event_frames else {
            return AggregatorOutput::Nothing;
        };
        match &self.state {
            EventState::Active(event) if index + 1 - event.start_index >= max => {
                debug!(event_start = event.start_index, max_frames = max, "Event reached length cap");
                self.close()
            }
            _ => AggregatorOutput::Nothing,
        }
    }

    fn close(&mut self) -> AggregatorOutput {
        let EventState::Active(mut event) = std::mem::replace(&mut self.state, EventState::Idle) else {
            return AggregatorOutput::Nothing;
        };

        let range = event.range();
        let confirmed = event.longest_positive_run >= self.policy.min_consecutive_positive_to_confirm;
        let long_enough = range.len() >= self.policy.min_event_frames;
        if !(confirmed && long_enough) {
            debug!(
                event_start = range.start_index,
                event_end = range.end_index,
                longest_run = event.longest_positive_run,
                "Event discarded as noise"
            );
            return AggregatorOutput::Discarded(range);
        }

        // Trailing negatives after the last positive are not part of the event.
        let keep = event.frames.partition_point(|f| f.index() < range.end_index);
        event.frames.truncate(keep);

        debug!(
            event_start = range.start_index,
            event_end = range.end_index,
            longest_run = event.longest_positive_run,
            "Event confirmed"
        );
        AggregatorOutput::Emitted(ConfirmedEvent {
            range,
            frames: event.frames,
        })
    }
}
