use super::{BeatTimeline, RationalTime};
use crate::error::TimelineError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_SUBDIVISION: u32 = 64;

/// Where a resolved frame sits relative to the timeline's markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bound {
    /// Timeline has no markers; the position carries no beat information.
    Unquantized,
    /// Frame precedes the first marker and was clamped onto beat 0.
    BeforeFirst,
    Inside,
    /// Frame is on or after the last marker; offset is always zero.
    AtOrPastLast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantizedPosition {
    /// `-1` when unquantized.
    pub beat_index: i64,
    /// In [0, 1).
    pub offset: RationalTime,
    pub bound: Bound,
}

impl QuantizedPosition {
    pub const UNQUANTIZED: Self = Self {
        beat_index: -1,
        offset: RationalTime::ZERO,
        bound: Bound::Unquantized,
    };

    pub fn is_quantized(&self) -> bool {
        self.bound != Bound::Unquantized
    }

    /// Fractional beat number, `beat_index + offset`.
    pub fn beats(&self) -> Option<RationalTime> {
        if !self.is_quantized() {
            return None;
        }
        RationalTime::from_integer(self.beat_index).checked_add(self.offset)
    }
}

/// Exact beat distance from `from` to `to`.
pub fn beat_delta(from: &QuantizedPosition, to: &QuantizedPosition) -> Option<RationalTime> {
    to.beats()?.checked_sub(from.beats()?)
}

/// Maps frames onto a [`BeatTimeline`] as beat + fractional offset, with
/// offsets limited to `max_subdivision` parts per beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quantizer {
    max_subdivision: i64,
}

impl Default for Quantizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SUBDIVISION)
    }
}

impl Quantizer {
    pub fn new(max_subdivision: u32) -> Self {
        Self {
            max_subdivision: max_subdivision.max(1) as i64,
        }
    }

    pub fn max_subdivision(&self) -> u32 {
        self.max_subdivision as u32
    }

    /// Resolves `frame` with the offset snapped to the closest fraction whose
    /// denominator fits the subdivision limit.
    pub fn resolve(&self, timeline: &BeatTimeline, frame: i64) -> QuantizedPosition {
        let exact = self.resolve_exact(timeline, frame);
        if exact.bound != Bound::Inside {
            return exact;
        }

        let offset = exact.offset.limit_denominator(self.max_subdivision);
        if offset < RationalTime::ONE {
            return QuantizedPosition { offset, ..exact };
        }

        let beat_index = exact.beat_index + 1;
        let bound = if beat_index as usize + 1 == timeline.len() {
            Bound::AtOrPastLast
        } else {
            Bound::Inside
        };
        QuantizedPosition {
            beat_index,
            offset: RationalTime::ZERO,
            bound,
        }
    }

    /// Resolves `frame` with the offset left as the exact fraction of the
    /// surrounding beat interval.
    pub fn resolve_exact(&self, timeline: &BeatTimeline, frame: i64) -> QuantizedPosition {
        let Some(first) = timeline.first() else {
            return QuantizedPosition::UNQUANTIZED;
        };
        if frame < first.frame {
            return QuantizedPosition {
                beat_index: 0,
                offset: RationalTime::ZERO,
                bound: Bound::BeforeFirst,
            };
        }

        let index = timeline.floor_index(frame).unwrap_or(0);
        let beat = timeline.markers()[index];
        match timeline.marker(index + 1) {
            None => QuantizedPosition {
                beat_index: index as i64,
                offset: RationalTime::ZERO,
                bound: Bound::AtOrPastLast,
            },
            Some(next) => QuantizedPosition {
                beat_index: index as i64,
                offset: RationalTime::new(frame - beat.frame, next.frame - beat.frame)
                    .unwrap_or_default(),
                bound: Bound::Inside,
            },
        }
    }

    /// Inverse of [`Quantizer::resolve`], rounding half up to a whole frame.
    /// A non-zero offset on the last beat extrapolates the previous interval.
    pub fn to_frame(
        &self,
        timeline: &BeatTimeline,
        beat_index: i64,
        offset: RationalTime,
    ) -> Result<i64, TimelineError> {
        if offset.is_negative() || offset >= RationalTime::ONE {
            return Err(TimelineError::OffsetOutOfRange(offset));
        }
        let index = usize::try_from(beat_index)
            .ok()
            .filter(|&i| i < timeline.len())
            .ok_or(TimelineError::IndexOutOfRange(beat_index))?;

        let beat = timeline.markers()[index];
        if offset.is_zero() {
            return Ok(beat.frame);
        }

        let interval = match timeline.marker(index + 1) {
            Some(next) => next.frame - beat.frame,
            None => {
                let prev = index
                    .checked_sub(1)
                    .and_then(|i| timeline.marker(i))
                    .ok_or(TimelineError::NoInterval)?;
                beat.frame - prev.frame
            }
        };
        offset
            .mul_round(interval)
            .and_then(|delta| beat.frame.checked_add(delta))
            .ok_or(TimelineError::FrameOverflow)
    }

    /// Fractional beat number of `frame`, defined between the first and last
    /// markers inclusive.
    pub fn to_beats(&self, timeline: &BeatTimeline, frame: i64) -> Option<RationalTime> {
        let position = self.resolve(timeline, frame);
        match position.bound {
            Bound::Inside => position.beats(),
            Bound::AtOrPastLast if timeline.last().map(|m| m.frame) == Some(frame) => {
                position.beats()
            }
            _ => None,
        }
    }

    pub fn from_beats(
        &self,
        timeline: &BeatTimeline,
        beats: RationalTime,
    ) -> Result<i64, TimelineError> {
        self.to_frame(timeline, beats.floor(), beats.fract())
    }
}
