use crate::timing::BeatRange;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthEvent {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledEvent {
    pub deadline: Instant,
    pub event: SynthEvent,
}

/// Published by the timeline engine after each committed change, in commit
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineEvent {
    BeatsChanged { revision: u64, frames: Vec<i64> },
    SelectionChanged { range: Option<BeatRange> },
    Reset { revision: u64 },
}
