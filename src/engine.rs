use crate::config::EngineConfig;
use crate::error::{EngineError, TimelineError};
use crate::events::TimelineEvent;
use crate::timing::{
    BeatHandle, BeatMarker, BeatRange, BeatTimeline, Correction, QuantizedPosition, Quantizer,
    RationalTime, TempoCorrector, TempoEstimate, rescale_frames,
};
use crossbeam::channel::{self, Receiver, Sender};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Source of the current playback frame, read once per tap.
pub trait PlaybackPosition: Send {
    fn current_sample_frame(&self) -> i64;
}

impl PlaybackPosition for Arc<AtomicI64> {
    fn current_sample_frame(&self) -> i64 {
        self.load(Ordering::Relaxed)
    }
}

/// Consistent view of the timeline between two commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineSnapshot {
    pub revision: u64,
    pub markers: Vec<BeatMarker>,
    pub selection: Option<BeatRange>,
}

impl TimelineSnapshot {
    pub fn frames(&self) -> Vec<i64> {
        self.markers.iter().map(|m| m.frame).collect()
    }
}

type Reply<T> = Sender<Result<T, TimelineError>>;

enum TimelineCommand {
    Insert { frame: i64, reply: Reply<BeatHandle> },
    Remove { handle: BeatHandle, reply: Reply<i64> },
    Move { handle: BeatHandle, frame: i64, reply: Reply<()> },
    Nearest { frame: i64, reply: Reply<BeatHandle> },
    Neighbors {
        handle: BeatHandle,
        reply: Reply<(Option<BeatHandle>, Option<BeatHandle>)>,
    },
    FrameOf { handle: BeatHandle, reply: Reply<i64> },
    Resolve { frame: i64, reply: Sender<QuantizedPosition> },
    ToFrame {
        beat_index: i64,
        offset: RationalTime,
        reply: Reply<i64>,
    },
    Select { first: BeatHandle, last: BeatHandle, reply: Reply<BeatRange> },
    SelectSnapped { start: i64, end: i64, reply: Reply<BeatRange> },
    Shunt { delta: i64, reply: Reply<BeatRange> },
    ClearSelection,
    ApplyTempo { reply: Reply<Correction> },
    Estimate { reply: Sender<Option<TempoEstimate>> },
    Snapshot { reply: Sender<TimelineSnapshot> },
    Load { frames: Vec<i64>, sample_rate: u32, reply: Reply<()> },
    Reset,
    AttachPlayback(Box<dyn PlaybackPosition>),
    Tap { reply: Sender<Result<BeatHandle, EngineError>> },
    Subscribe(Sender<TimelineEvent>),
    Shutdown,
}

impl TimelineCommand {
    fn name(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "insert",
            Self::Remove { .. } => "remove",
            Self::Move { .. } => "move",
            Self::Nearest { .. } => "nearest",
            Self::Neighbors { .. } => "neighbors",
            Self::FrameOf { .. } => "frame_of",
            Self::Resolve { .. } => "resolve",
            Self::ToFrame { .. } => "to_frame",
            Self::Select { .. } => "select",
            Self::SelectSnapped { .. } => "select_snapped",
            Self::Shunt { .. } => "shunt",
            Self::ClearSelection => "clear_selection",
            Self::ApplyTempo { .. } => "apply_tempo",
            Self::Estimate { .. } => "estimate",
            Self::Snapshot { .. } => "snapshot",
            Self::Load { .. } => "load",
            Self::Reset => "reset",
            Self::AttachPlayback(_) => "attach_playback",
            Self::Tap { .. } => "tap",
            Self::Subscribe(_) => "subscribe",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Cloneable handle to the timeline owner thread. The thread exits on
/// [`TimelineHandle::shutdown`] or once every handle is dropped.
#[derive(Clone)]
pub struct TimelineHandle {
    command_tx: Sender<TimelineCommand>,
}

pub fn spawn_timeline(config: &EngineConfig) -> TimelineHandle {
    let (command_tx, command_rx) = channel::unbounded();
    let state = TimelineState::new(config);

    let spawned = std::thread::Builder::new()
        .name("beat-timeline".into())
        .spawn(move || timeline_thread(command_rx, state));
    if let Err(e) = spawned {
        tracing::error!("failed to spawn timeline thread: {}", e);
    }

    TimelineHandle { command_tx }
}

impl TimelineHandle {
    fn send(&self, command: TimelineCommand) -> Result<(), EngineError> {
        self.command_tx
            .send(command)
            .map_err(|_| EngineError::Disconnected)
    }

    fn request<T>(&self, make: impl FnOnce(Sender<T>) -> TimelineCommand) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = channel::bounded(1);
        self.send(make(reply_tx))?;
        reply_rx.recv().map_err(|_| EngineError::Disconnected)
    }

    fn call<T>(&self, make: impl FnOnce(Reply<T>) -> TimelineCommand) -> Result<T, EngineError> {
        Ok(self.request(make)??)
    }

    pub fn insert(&self, frame: i64) -> Result<BeatHandle, EngineError> {
        self.call(|reply| TimelineCommand::Insert { frame, reply })
    }

    /// Returns the frame the beat was at.
    pub fn remove(&self, handle: BeatHandle) -> Result<i64, EngineError> {
        self.call(|reply| TimelineCommand::Remove { handle, reply })
    }

    pub fn move_beat(&self, handle: BeatHandle, frame: i64) -> Result<(), EngineError> {
        self.call(|reply| TimelineCommand::Move { handle, frame, reply })
    }

    pub fn nearest(&self, frame: i64) -> Result<BeatHandle, EngineError> {
        self.call(|reply| TimelineCommand::Nearest { frame, reply })
    }

    pub fn neighbors(
        &self,
        handle: BeatHandle,
    ) -> Result<(Option<BeatHandle>, Option<BeatHandle>), EngineError> {
        self.call(|reply| TimelineCommand::Neighbors { handle, reply })
    }

    pub fn frame_of(&self, handle: BeatHandle) -> Result<i64, EngineError> {
        self.call(|reply| TimelineCommand::FrameOf { handle, reply })
    }

    pub fn resolve(&self, frame: i64) -> Result<QuantizedPosition, EngineError> {
        self.request(|reply| TimelineCommand::Resolve { frame, reply })
    }

    pub fn to_frame(&self, beat_index: i64, offset: RationalTime) -> Result<i64, EngineError> {
        self.call(|reply| TimelineCommand::ToFrame {
            beat_index,
            offset,
            reply,
        })
    }

    pub fn select(&self, first: BeatHandle, last: BeatHandle) -> Result<BeatRange, EngineError> {
        self.call(|reply| TimelineCommand::Select { first, last, reply })
    }

    /// Selects the beats nearest to each end of a frame selection.
    pub fn select_snapped(&self, start: i64, end: i64) -> Result<BeatRange, EngineError> {
        self.call(|reply| TimelineCommand::SelectSnapped { start, end, reply })
    }

    /// Moves the selection by whole beats.
    pub fn shunt_selection(&self, delta: i64) -> Result<BeatRange, EngineError> {
        self.call(|reply| TimelineCommand::Shunt { delta, reply })
    }

    pub fn clear_selection(&self) -> Result<(), EngineError> {
        self.send(TimelineCommand::ClearSelection)
    }

    pub fn apply_tempo_correction(&self) -> Result<Correction, EngineError> {
        self.call(|reply| TimelineCommand::ApplyTempo { reply })
    }

    pub fn estimate(&self) -> Result<Option<TempoEstimate>, EngineError> {
        self.request(|reply| TimelineCommand::Estimate { reply })
    }

    /// Quantization error of the selection in frames, `None` when not
    /// applicable.
    pub fn error(&self) -> Result<Option<i64>, EngineError> {
        Ok(self.estimate()?.map(|e| e.error))
    }

    pub fn snapshot(&self) -> Result<TimelineSnapshot, EngineError> {
        self.request(|reply| TimelineCommand::Snapshot { reply })
    }

    /// Replaces every beat with persisted frames recorded at `sample_rate`.
    pub fn load_frames(&self, frames: Vec<i64>, sample_rate: u32) -> Result<(), EngineError> {
        self.call(|reply| TimelineCommand::Load {
            frames,
            sample_rate,
            reply,
        })
    }

    pub fn reset(&self) -> Result<(), EngineError> {
        self.send(TimelineCommand::Reset)
    }

    pub fn attach_playback<P: PlaybackPosition + 'static>(&self, source: P) -> Result<(), EngineError> {
        self.send(TimelineCommand::AttachPlayback(Box::new(source)))
    }

    /// Inserts a beat at the current playback frame.
    pub fn tap(&self) -> Result<BeatHandle, EngineError> {
        self.request(|reply| TimelineCommand::Tap { reply })?
    }

    pub fn subscribe(&self) -> Result<Receiver<TimelineEvent>, EngineError> {
        let (event_tx, event_rx) = channel::unbounded();
        self.send(TimelineCommand::Subscribe(event_tx))?;
        Ok(event_rx)
    }

    pub fn shutdown(&self) -> Result<(), EngineError> {
        self.send(TimelineCommand::Shutdown)
    }
}

struct TimelineState {
    timeline: BeatTimeline,
    quantizer: Quantizer,
    corrector: TempoCorrector,
    sample_rate: u32,
    playback: Option<Box<dyn PlaybackPosition>>,
    subscribers: Vec<Sender<TimelineEvent>>,
    published_selection: Option<BeatRange>,
}

fn timeline_thread(command_rx: Receiver<TimelineCommand>, mut state: TimelineState) {
    tracing::info!(sample_rate = state.sample_rate, "timeline engine started");

    while let Ok(command) = command_rx.recv() {
        tracing::debug!(command = command.name(), "timeline command");
        if !state.handle(command) {
            break;
        }
    }

    tracing::info!(beats = state.timeline.len(), "timeline engine stopped");
}

impl TimelineState {
    fn new(config: &EngineConfig) -> Self {
        Self {
            timeline: BeatTimeline::new(),
            quantizer: Quantizer::new(config.max_subdivision),
            corrector: TempoCorrector::new(),
            sample_rate: config.sample_rate,
            playback: None,
            subscribers: Vec::new(),
            published_selection: None,
        }
    }

    /// Returns `false` once the thread should stop.
    fn handle(&mut self, command: TimelineCommand) -> bool {
        match command {
            TimelineCommand::Insert { frame, reply } => {
                let _ = reply.send(self.insert(frame));
            }
            TimelineCommand::Remove { handle, reply } => {
                let result = self.timeline.remove(handle);
                if let Ok(frame) = result {
                    self.committed(&[frame]);
                }
                let _ = reply.send(result);
            }
            TimelineCommand::Move {
                handle,
                frame,
                reply,
            } => {
                let result = self.move_beat(handle, frame);
                let _ = reply.send(result);
            }
            TimelineCommand::Nearest { frame, reply } => {
                let _ = reply.send(self.timeline.nearest(frame));
            }
            TimelineCommand::Neighbors { handle, reply } => {
                let _ = reply.send(self.timeline.neighbors(handle));
            }
            TimelineCommand::FrameOf { handle, reply } => {
                let _ = reply.send(self.timeline.frame_of(handle));
            }
            TimelineCommand::Resolve { frame, reply } => {
                let _ = reply.send(self.quantizer.resolve(&self.timeline, frame));
            }
            TimelineCommand::ToFrame {
                beat_index,
                offset,
                reply,
            } => {
                let _ = reply.send(self.quantizer.to_frame(&self.timeline, beat_index, offset));
            }
            TimelineCommand::Select { first, last, reply } => {
                let result = self.timeline.range(first, last).and_then(|r| self.select(r));
                let _ = reply.send(result);
            }
            TimelineCommand::SelectSnapped { start, end, reply } => {
                let result = self
                    .timeline
                    .snapped_range(start, end)
                    .and_then(|r| self.select(r));
                let _ = reply.send(result);
            }
            TimelineCommand::Shunt { delta, reply } => {
                let result = self
                    .corrector
                    .selection()
                    .ok_or(TimelineError::NoSelection)
                    .and_then(|r| self.timeline.shunt(r, delta))
                    .and_then(|r| self.select(r));
                let _ = reply.send(result);
            }
            TimelineCommand::ClearSelection => {
                self.corrector.clear_selection();
                self.publish_selection();
            }
            TimelineCommand::ApplyTempo { reply } => {
                let before = self.timeline.revision();
                let result = self.corrector.apply(&mut self.timeline);
                if self.timeline.revision() != before {
                    self.publish_beats();
                }
                let _ = reply.send(result);
            }
            TimelineCommand::Estimate { reply } => {
                let estimate = self.corrector.estimate(&self.timeline);
                self.publish_selection();
                let _ = reply.send(estimate);
            }
            TimelineCommand::Snapshot { reply } => {
                let _ = reply.send(TimelineSnapshot {
                    revision: self.timeline.revision(),
                    markers: self.timeline.markers().to_vec(),
                    selection: self.corrector.selection(),
                });
            }
            TimelineCommand::Load {
                frames,
                sample_rate,
                reply,
            } => {
                let _ = reply.send(self.load(frames, sample_rate));
            }
            TimelineCommand::Reset => {
                self.timeline.clear();
                self.reset_published();
            }
            TimelineCommand::AttachPlayback(source) => {
                self.playback = Some(source);
            }
            TimelineCommand::Tap { reply } => {
                let result = match &self.playback {
                    Some(source) => {
                        let frame = source.current_sample_frame();
                        self.insert(frame).map_err(EngineError::from)
                    }
                    None => Err(EngineError::NoPlaybackSource),
                };
                let _ = reply.send(result);
            }
            TimelineCommand::Subscribe(subscriber) => {
                self.subscribers.push(subscriber);
            }
            TimelineCommand::Shutdown => return false,
        }
        true
    }

    fn insert(&mut self, frame: i64) -> Result<BeatHandle, TimelineError> {
        let handle = self.timeline.insert(frame)?;
        self.committed(&[frame]);
        Ok(handle)
    }

    fn move_beat(&mut self, handle: BeatHandle, frame: i64) -> Result<(), TimelineError> {
        let before = self.timeline.frame_of(handle)?;
        let revision = self.timeline.revision();
        self.timeline.move_beat(handle, frame)?;
        if self.timeline.revision() != revision {
            self.committed(&[before, frame]);
        }
        Ok(())
    }

    fn select(&mut self, range: BeatRange) -> Result<BeatRange, TimelineError> {
        self.corrector.select(&self.timeline, range)?;
        self.publish_selection();
        Ok(range)
    }

    fn load(&mut self, mut frames: Vec<i64>, sample_rate: u32) -> Result<(), TimelineError> {
        rescale_frames(&mut frames, sample_rate, self.sample_rate);
        self.timeline.load_frames(&frames)?;
        tracing::info!(beats = self.timeline.len(), "timeline loaded");
        self.reset_published();
        self.publish_beats();
        Ok(())
    }

    /// Book-keeping after a user edit touching `frames`.
    fn committed(&mut self, frames: &[i64]) {
        self.corrector.note_mutation(&self.timeline, frames);
        let stale = self
            .corrector
            .selection()
            .is_some_and(|range| self.timeline.range_indices(range).is_err());
        if stale {
            self.corrector.clear_selection();
        }
        self.publish_beats();
        self.publish_selection();
    }

    fn reset_published(&mut self) {
        self.corrector.clear_selection();
        tracing::info!(revision = self.timeline.revision(), "timeline reset");
        self.publish(TimelineEvent::Reset {
            revision: self.timeline.revision(),
        });
        self.publish_selection();
    }

    fn publish_beats(&mut self) {
        self.publish(TimelineEvent::BeatsChanged {
            revision: self.timeline.revision(),
            frames: self.timeline.frames(),
        });
    }

    fn publish_selection(&mut self) {
        let range = self.corrector.selection();
        if range != self.published_selection {
            self.published_selection = range;
            self.publish(TimelineEvent::SelectionChanged { range });
        }
    }

    fn publish(&mut self, event: TimelineEvent) {
        let before = self.subscribers.len();
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
        let dropped = before - self.subscribers.len();
        if dropped > 0 {
            tracing::warn!(dropped, "dropped disconnected timeline subscribers");
        }
    }
}
