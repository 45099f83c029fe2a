use super::{BeatRange, BeatTimeline, RationalTime, frames_to_duration};
use crate::error::TimelineError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correction {
    /// Range has no interior beats.
    Nop,
    Applied { moved: usize },
}

/// Tempo implied by the selected range and how far its beats stray from a
/// uniform grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempoEstimate {
    pub beat_count: i64,
    pub frames_per_beat: RationalTime,
    /// Largest deviation in frames.
    pub error: i64,
}

impl TempoEstimate {
    pub fn bpm(&self, sample_rate: u32) -> f64 {
        60.0 * sample_rate as f64 / self.frames_per_beat.to_f64()
    }

    pub fn error_duration(&self, sample_rate: u32) -> Duration {
        frames_to_duration(self.error, sample_rate)
    }

    /// Status line such as `120.0bpm ±2ms`.
    pub fn status(&self, sample_rate: u32) -> String {
        format!(
            "{:.1}bpm ±{}",
            self.bpm(sample_rate),
            nice_duration(self.error_duration(sample_rate))
        )
    }
}

/// Sub-second durations truncated to whole ms/µs/ns.
pub fn nice_duration(duration: Duration) -> String {
    if duration >= Duration::from_secs(1) {
        format!("{:?}", duration)
    } else if duration >= Duration::from_millis(1) {
        format!("{}ms", duration.as_millis())
    } else if duration >= Duration::from_micros(1) {
        format!("{}µs", duration.as_micros())
    } else {
        format!("{}ns", duration.as_nanos())
    }
}

#[derive(Debug, Clone)]
struct Selection {
    range: BeatRange,
    /// Frames of every beat in the range when it was selected or last
    /// touched by an edit, endpoints included.
    baseline: Vec<i64>,
    dirty: bool,
    /// `None` means stale.
    cached: Option<Option<TempoEstimate>>,
}

/// Redistributes the interior beats of a selected range evenly between its
/// endpoints.
#[derive(Debug, Clone, Default)]
pub struct TempoCorrector {
    selection: Option<Selection>,
}

impl TempoCorrector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selection(&self) -> Option<BeatRange> {
        self.selection.as_ref().map(|s| s.range)
    }

    pub fn select(&mut self, timeline: &BeatTimeline, range: BeatRange) -> Result<(), TimelineError> {
        let baseline = capture(timeline, range)?;
        self.selection = Some(Selection {
            range,
            baseline,
            dirty: false,
            cached: None,
        });
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        self.selection = None;
    }

    /// Records that the frames in `touched` were edited. Edits inside the
    /// selected range refresh its baseline on the next query.
    pub fn note_mutation(&mut self, timeline: &BeatTimeline, touched: &[i64]) {
        let Some(selection) = self.selection.as_mut() else {
            return;
        };
        let bounds = (
            timeline.frame_of(selection.range.first),
            timeline.frame_of(selection.range.last),
        );
        let overlaps = match bounds {
            (Ok(start), Ok(end)) => touched.iter().any(|f| (start..=end).contains(f)),
            _ => true,
        };
        if overlaps {
            selection.dirty = true;
            selection.cached = None;
        }
    }

    fn refresh(&mut self, timeline: &BeatTimeline) {
        let Some(selection) = self.selection.as_mut() else {
            return;
        };
        if !selection.dirty {
            return;
        }
        match capture(timeline, selection.range) {
            Ok(baseline) => {
                selection.baseline = baseline;
                selection.dirty = false;
                selection.cached = None;
            }
            Err(_) => self.selection = None,
        }
    }

    /// Moves every interior beat of the selection onto the uniform grid
    /// between its endpoints. Nothing moves unless every target frame is
    /// valid.
    pub fn apply(&mut self, timeline: &mut BeatTimeline) -> Result<Correction, TimelineError> {
        self.refresh(timeline);
        let selection = self.selection.as_mut().ok_or(TimelineError::NoSelection)?;
        let (first, last) = timeline.range_indices(selection.range)?;
        let beat_count = (last - first) as i64;
        if beat_count < 2 {
            return Ok(Correction::Nop);
        }

        let markers = timeline.markers();
        let start = markers[first].frame;
        let step = RationalTime::new(markers[last].frame - start, beat_count)
            .ok_or(TimelineError::InvalidRange)?;

        // start + step * k never passes the last marker, so it fits
        let moves = (1..beat_count)
            .map(|k| -> Result<_, TimelineError> {
                let marker = markers[first + k as usize];
                let frame = step
                    .mul_round(k)
                    .and_then(|delta| start.checked_add(delta))
                    .ok_or(TimelineError::FrameOverflow)?;
                Ok((marker.handle, frame))
            })
            .filter(|mv| match mv {
                Ok((handle, frame)) => timeline.frame_of(*handle) != Ok(*frame),
                Err(_) => true,
            })
            .collect::<Result<Vec<_>, TimelineError>>()?;

        timeline.relocate_batch(&moves)?;
        selection.cached = None;
        tracing::info!(
            moved = moves.len(),
            frames_per_beat = %step,
            "tempo correction applied"
        );
        Ok(Correction::Applied { moved: moves.len() })
    }

    /// `None` when nothing is selected or the range has no interior beats.
    pub fn estimate(&mut self, timeline: &BeatTimeline) -> Option<TempoEstimate> {
        self.refresh(timeline);
        let selection = self.selection.as_mut()?;
        *selection
            .cached
            .get_or_insert_with(|| estimate(&selection.baseline))
    }

    /// Quantization error of the selection in frames; `None` when not
    /// applicable.
    pub fn error(&mut self, timeline: &BeatTimeline) -> Option<i64> {
        self.estimate(timeline).map(|e| e.error)
    }
}

fn capture(timeline: &BeatTimeline, range: BeatRange) -> Result<Vec<i64>, TimelineError> {
    let (first, last) = timeline.range_indices(range)?;
    Ok(timeline.markers()[first..=last]
        .iter()
        .map(|m| m.frame)
        .collect())
}

fn estimate(baseline: &[i64]) -> Option<TempoEstimate> {
    let beat_count = baseline.len() as i64 - 1;
    if beat_count < 2 {
        return None;
    }
    let total = baseline[baseline.len() - 1] - baseline[0];
    let step = RationalTime::new(total, beat_count)?;

    // Interior beats only: each one against a uniform step from its
    // predecessor.
    let mut error = 0;
    for pair in baseline[..baseline.len() - 1].windows(2) {
        let deviation = RationalTime::from_integer(pair[1] - pair[0]).checked_sub(step)?;
        error = error.max(deviation.abs().round());
    }

    Some(TempoEstimate {
        beat_count,
        frames_per_beat: step,
        error,
    })
}
