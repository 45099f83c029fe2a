use crate::error::TimelineError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Frame rate assumed for persisted beat lists that predate rate tagging.
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Stable reference to a beat marker. Survives edits to other markers and
/// goes stale once its own marker is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BeatHandle {
    slot: u32,
    generation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeatMarker {
    pub frame: i64,
    pub handle: BeatHandle,
}

/// Inclusive range of beats, `first` strictly before `last`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeatRange {
    pub first: BeatHandle,
    pub last: BeatHandle,
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    frame: Option<i64>,
}

/// Beat markers sorted by strictly increasing frame.
///
/// A marker's positional index is only meaningful until the next mutation;
/// hold on to its [`BeatHandle`] to refer to it across edits.
#[derive(Debug, Clone, Default)]
pub struct BeatTimeline {
    markers: Vec<BeatMarker>,
    slots: Vec<Slot>,
    free: Vec<u32>,
    revision: u64,
}

impl BeatTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a timeline from persisted frames. Input order does not matter.
    pub fn from_frames(frames: &[i64]) -> Result<Self, TimelineError> {
        let mut sorted = frames.to_vec();
        sorted.sort_unstable();

        let mut timeline = Self::new();
        for (i, &frame) in sorted.iter().enumerate() {
            if frame < 0 {
                return Err(TimelineError::NegativeFrame(frame));
            }
            if i > 0 && sorted[i - 1] == frame {
                return Err(TimelineError::DuplicateFrame(frame));
            }
            let handle = timeline.alloc(frame);
            timeline.markers.push(BeatMarker { frame, handle });
        }
        Ok(timeline)
    }

    /// Replaces every marker with `frames`. Leaves the timeline untouched on
    /// error. Handles issued before the reload all go stale.
    pub fn load_frames(&mut self, frames: &[i64]) -> Result<(), TimelineError> {
        let fresh = Self::from_frames(frames)?;
        let revision = self.revision + 1;
        self.clear();
        for marker in fresh.markers {
            let handle = self.alloc(marker.frame);
            self.markers.push(BeatMarker {
                frame: marker.frame,
                handle,
            });
        }
        self.revision = revision;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.markers.clear();
        self.free.clear();
        for (i, slot) in self.slots.iter_mut().enumerate().rev() {
            if slot.frame.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
            }
            self.free.push(i as u32);
        }
        self.revision += 1;
    }

    fn alloc(&mut self, frame: i64) -> BeatHandle {
        if let Some(slot) = self.free.pop() {
            let entry = &mut self.slots[slot as usize];
            entry.frame = Some(frame);
            BeatHandle {
                slot,
                generation: entry.generation,
            }
        } else {
            self.slots.push(Slot {
                generation: 0,
                frame: Some(frame),
            });
            BeatHandle {
                slot: (self.slots.len() - 1) as u32,
                generation: 0,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Bumped by every committed mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn markers(&self) -> &[BeatMarker] {
        &self.markers
    }

    pub fn frames(&self) -> Vec<i64> {
        self.markers.iter().map(|m| m.frame).collect()
    }

    pub fn marker(&self, index: usize) -> Option<BeatMarker> {
        self.markers.get(index).copied()
    }

    pub fn handle_at(&self, index: usize) -> Option<BeatHandle> {
        self.markers.get(index).map(|m| m.handle)
    }

    pub fn first(&self) -> Option<BeatMarker> {
        self.markers.first().copied()
    }

    pub fn last(&self) -> Option<BeatMarker> {
        self.markers.last().copied()
    }

    pub fn insert(&mut self, frame: i64) -> Result<BeatHandle, TimelineError> {
        if frame < 0 {
            return Err(TimelineError::NegativeFrame(frame));
        }
        let pos = match self.markers.binary_search_by_key(&frame, |m| m.frame) {
            Ok(_) => return Err(TimelineError::DuplicateFrame(frame)),
            Err(pos) => pos,
        };
        let handle = self.alloc(frame);
        self.markers.insert(pos, BeatMarker { frame, handle });
        self.revision += 1;
        Ok(handle)
    }

    /// Removes the marker and returns the frame it occupied.
    pub fn remove(&mut self, handle: BeatHandle) -> Result<i64, TimelineError> {
        let index = self.index_of(handle)?;
        let marker = self.markers.remove(index);
        let slot = &mut self.slots[handle.slot as usize];
        slot.frame = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.slot);
        self.revision += 1;
        Ok(marker.frame)
    }

    pub fn frame_of(&self, handle: BeatHandle) -> Result<i64, TimelineError> {
        self.slots
            .get(handle.slot as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.frame)
            .ok_or(TimelineError::NotFound)
    }

    /// Current positional index of the marker.
    pub fn index_of(&self, handle: BeatHandle) -> Result<usize, TimelineError> {
        let frame = self.frame_of(handle)?;
        self.markers
            .binary_search_by_key(&frame, |m| m.frame)
            .map_err(|_| TimelineError::NotFound)
    }

    /// Index of the greatest marker at or before `frame`.
    pub fn floor_index(&self, frame: i64) -> Option<usize> {
        self.markers
            .partition_point(|m| m.frame <= frame)
            .checked_sub(1)
    }

    /// Closest marker to `frame`; ties go to the earlier marker.
    pub fn nearest(&self, frame: i64) -> Result<BeatHandle, TimelineError> {
        let after = self.markers.partition_point(|m| m.frame < frame);
        let candidate = match (after.checked_sub(1), self.markers.get(after)) {
            (None, None) => return Err(TimelineError::Empty),
            (Some(before), None) => before,
            (None, Some(_)) => after,
            (Some(before), Some(next)) => {
                if next.frame - frame < frame - self.markers[before].frame {
                    after
                } else {
                    before
                }
            }
        };
        Ok(self.markers[candidate].handle)
    }

    pub fn neighbors(
        &self,
        handle: BeatHandle,
    ) -> Result<(Option<BeatHandle>, Option<BeatHandle>), TimelineError> {
        let index = self.index_of(handle)?;
        let prev = index.checked_sub(1).and_then(|i| self.handle_at(i));
        let next = self.handle_at(index + 1);
        Ok((prev, next))
    }

    /// Moves a marker between its current neighbours. Moves that would jump
    /// over a neighbour must be done as remove + insert.
    pub fn move_beat(&mut self, handle: BeatHandle, new_frame: i64) -> Result<(), TimelineError> {
        let index = self.index_of(handle)?;
        if new_frame < 0 {
            return Err(TimelineError::NegativeFrame(new_frame));
        }
        if self.markers[index].frame == new_frame {
            return Ok(());
        }
        let min = index.checked_sub(1).map_or(-1, |i| self.markers[i].frame);
        let max = self.markers.get(index + 1).map_or(i64::MAX, |m| m.frame);
        if new_frame <= min || new_frame >= max {
            return Err(TimelineError::OutOfOrder {
                frame: new_frame,
                min,
                max,
            });
        }
        self.set_frame(index, new_frame);
        self.revision += 1;
        Ok(())
    }

    fn set_frame(&mut self, index: usize, frame: i64) {
        let marker = &mut self.markers[index];
        marker.frame = frame;
        self.slots[marker.handle.slot as usize].frame = Some(frame);
    }

    /// Applies several moves as one commit. Every move is checked against
    /// the resulting order first; on error nothing has changed.
    pub fn relocate_batch(&mut self, moves: &[(BeatHandle, i64)]) -> Result<(), TimelineError> {
        let mut frames = self.frames();
        let mut indices = Vec::with_capacity(moves.len());
        for &(handle, frame) in moves {
            let index = self.index_of(handle)?;
            if frame < 0 {
                return Err(TimelineError::NegativeFrame(frame));
            }
            frames[index] = frame;
            indices.push(index);
        }

        for pair in frames.windows(2) {
            if pair[0] >= pair[1] {
                return Err(TimelineError::Inconsistent { frame: pair[1] });
            }
        }

        if indices.is_empty() {
            return Ok(());
        }
        for index in indices {
            self.set_frame(index, frames[index]);
        }
        self.revision += 1;
        Ok(())
    }

    pub fn range_indices(&self, range: BeatRange) -> Result<(usize, usize), TimelineError> {
        let first = self.index_of(range.first)?;
        let last = self.index_of(range.last)?;
        if first >= last {
            return Err(TimelineError::InvalidRange);
        }
        Ok((first, last))
    }

    pub fn range(&self, first: BeatHandle, last: BeatHandle) -> Result<BeatRange, TimelineError> {
        let range = BeatRange { first, last };
        self.range_indices(range)?;
        Ok(range)
    }

    /// Range spanning the beats nearest to each end of a frame selection.
    pub fn snapped_range(&self, start: i64, end: i64) -> Result<BeatRange, TimelineError> {
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        self.range(self.nearest(start)?, self.nearest(end)?)
    }

    /// Shifts a range by whole beats, stopping at either end of the
    /// timeline.
    pub fn shunt(&self, range: BeatRange, delta: i64) -> Result<BeatRange, TimelineError> {
        let (first, last) = self.range_indices(range)?;
        let (first, last) = (first as i64, last as i64);
        let max_last = self.len() as i64 - 1;
        let delta = delta.clamp(-first, max_last - last);
        let handle = |i: i64| self.handle_at(i as usize).ok_or(TimelineError::NotFound);
        Ok(BeatRange {
            first: handle(first + delta)?,
            last: handle(last + delta)?,
        })
    }
}

/// Converts persisted frames recorded at `from_rate` to `to_rate`, rounding
/// half up. A `from_rate` of zero means [`DEFAULT_SAMPLE_RATE`].
pub fn rescale_frames(frames: &mut [i64], from_rate: u32, to_rate: u32) {
    let from_rate = if from_rate == 0 {
        DEFAULT_SAMPLE_RATE
    } else {
        from_rate
    };
    if from_rate == to_rate {
        return;
    }
    let (from, to) = (from_rate as i128, to_rate as i128);
    for frame in frames.iter_mut() {
        let scaled = (*frame as i128 * to * 2 + from).div_euclid(2 * from);
        *frame = scaled as i64;
    }
}

/// Wall-clock length of `frames` at `sample_rate`. Negative lengths clamp to
/// zero.
pub fn frames_to_duration(frames: i64, sample_rate: u32) -> Duration {
    if frames <= 0 || sample_rate == 0 {
        return Duration::ZERO;
    }
    let nanos = frames as u128 * 1_000_000_000 / sample_rate as u128;
    Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn timeline(frames: &[i64]) -> BeatTimeline {
        BeatTimeline::from_frames(frames).unwrap()
    }

    fn assert_strictly_increasing(timeline: &BeatTimeline) {
        for pair in timeline.markers().windows(2) {
            assert!(pair[0].frame < pair[1].frame, "{:?}", timeline.frames());
        }
    }

    #[test]
    fn test_insert_keeps_order() {
        let mut tl = BeatTimeline::new();
        for frame in [3000, 0, 2000, 1000] {
            tl.insert(frame).unwrap();
        }
        assert_eq!(tl.frames(), vec![0, 1000, 2000, 3000]);
        assert_eq!(tl.revision(), 4);
    }

    #[test]
    fn test_insert_duplicate_frame() {
        let mut tl = timeline(&[0, 1000]);
        let before = tl.revision();
        assert_eq!(tl.insert(1000), Err(TimelineError::DuplicateFrame(1000)));
        assert_eq!(tl.insert(-5), Err(TimelineError::NegativeFrame(-5)));
        assert_eq!(tl.revision(), before);
    }

    #[test]
    fn test_handles_survive_earlier_edits() {
        let mut tl = timeline(&[1000, 2000]);
        let h = tl.handle_at(1).unwrap();
        assert_eq!(tl.index_of(h), Ok(1));

        tl.insert(500).unwrap();
        assert_eq!(tl.index_of(h), Ok(2));
        assert_eq!(tl.frame_of(h), Ok(2000));

        let first = tl.handle_at(0).unwrap();
        tl.remove(first).unwrap();
        assert_eq!(tl.index_of(h), Ok(1));
    }

    #[test]
    fn test_remove_twice_is_not_found() {
        let mut tl = timeline(&[0, 1000]);
        let h = tl.handle_at(0).unwrap();
        assert_eq!(tl.remove(h), Ok(0));
        assert_eq!(tl.remove(h), Err(TimelineError::NotFound));
        assert_eq!(tl.frame_of(h), Err(TimelineError::NotFound));
    }

    #[test]
    fn test_reused_slot_does_not_revive_stale_handle() {
        let mut tl = timeline(&[0, 1000]);
        let stale = tl.handle_at(0).unwrap();
        tl.remove(stale).unwrap();
        let fresh = tl.insert(0).unwrap();
        assert_ne!(stale, fresh);
        assert_eq!(tl.frame_of(stale), Err(TimelineError::NotFound));
        assert_eq!(tl.frame_of(fresh), Ok(0));
    }

    #[test]
    fn test_nearest() {
        let tl = timeline(&[0, 1000, 2000]);
        let frame = |h| tl.frame_of(h).unwrap();
        assert_eq!(frame(tl.nearest(-50).unwrap()), 0);
        assert_eq!(frame(tl.nearest(400).unwrap()), 0);
        assert_eq!(frame(tl.nearest(500).unwrap()), 0); // tie goes earlier
        assert_eq!(frame(tl.nearest(501).unwrap()), 1000);
        assert_eq!(frame(tl.nearest(1000).unwrap()), 1000);
        assert_eq!(frame(tl.nearest(9999).unwrap()), 2000);
        assert_eq!(BeatTimeline::new().nearest(0), Err(TimelineError::Empty));
    }

    #[test]
    fn test_neighbors() {
        let tl = timeline(&[0, 1000, 2000]);
        let (a, b, c) = (
            tl.handle_at(0).unwrap(),
            tl.handle_at(1).unwrap(),
            tl.handle_at(2).unwrap(),
        );
        assert_eq!(tl.neighbors(a), Ok((None, Some(b))));
        assert_eq!(tl.neighbors(b), Ok((Some(a), Some(c))));
        assert_eq!(tl.neighbors(c), Ok((Some(b), None)));
    }

    #[test]
    fn test_move_within_neighbors() {
        let mut tl = timeline(&[0, 1000, 2000]);
        let h = tl.handle_at(1).unwrap();
        tl.move_beat(h, 1500).unwrap();
        assert_eq!(tl.frames(), vec![0, 1500, 2000]);

        assert_eq!(
            tl.move_beat(h, 2000),
            Err(TimelineError::OutOfOrder {
                frame: 2000,
                min: 0,
                max: 2000
            })
        );
        assert!(tl.move_beat(h, 0).is_err());
        assert_eq!(tl.frames(), vec![0, 1500, 2000]);

        let last = tl.handle_at(2).unwrap();
        tl.move_beat(last, 1_000_000).unwrap();
        assert_eq!(tl.frame_of(last), Ok(1_000_000));
    }

    #[test]
    fn test_relocate_batch_is_atomic() {
        let mut tl = timeline(&[0, 1000, 2000, 3000]);
        let before = tl.frames();
        let (b1, b2) = (tl.handle_at(1).unwrap(), tl.handle_at(2).unwrap());

        let revision = tl.revision();
        let observe = |tl: &BeatTimeline| {
            let sample_frames = [0, 900, 1000, 1600, 2000, 2450, 3000];
            let nearest: Vec<_> = sample_frames.iter().map(|&f| tl.nearest(f)).collect();
            let neighbors: Vec<_> = tl
                .markers()
                .iter()
                .map(|m| tl.neighbors(m.handle))
                .collect();
            (nearest, neighbors)
        };
        let observed = observe(&tl);

        // b1 would land past b2's new frame
        let result = tl.relocate_batch(&[(b1, 2500), (b2, 2400)]);
        assert_eq!(result, Err(TimelineError::Inconsistent { frame: 2400 }));
        // b1 would collide with b2's current frame
        let result = tl.relocate_batch(&[(b1, 2000)]);
        assert_eq!(result, Err(TimelineError::Inconsistent { frame: 2000 }));

        assert_eq!(tl.frames(), before);
        assert_eq!(tl.revision(), revision);
        assert_eq!(observe(&tl), observed);
        assert_eq!(tl.frame_of(b1), Ok(1000));
        assert_eq!(tl.frame_of(b2), Ok(2000));

        tl.relocate_batch(&[(b1, 1100), (b2, 2200)]).unwrap();
        assert_eq!(tl.frames(), vec![0, 1100, 2200, 3000]);
    }

    #[test]
    fn test_load_frames_invalidates_old_handles() {
        let mut tl = timeline(&[0, 1000]);
        let old = tl.handle_at(0).unwrap();
        tl.load_frames(&[2000, 500, 0]).unwrap();
        assert_eq!(tl.frames(), vec![0, 500, 2000]);
        assert_eq!(tl.frame_of(old), Err(TimelineError::NotFound));

        assert_eq!(
            tl.load_frames(&[5, 5]),
            Err(TimelineError::DuplicateFrame(5))
        );
        assert_eq!(tl.frames(), vec![0, 500, 2000]);
    }

    #[test]
    fn test_clear() {
        let mut tl = timeline(&[0, 1000]);
        let old = tl.handle_at(1).unwrap();
        tl.clear();
        assert!(tl.is_empty());
        let fresh = tl.insert(1000).unwrap();
        assert_eq!(tl.frame_of(old), Err(TimelineError::NotFound));
        assert_eq!(tl.frame_of(fresh), Ok(1000));
    }

    #[test]
    fn test_snapped_range_and_shunt() {
        let tl = timeline(&[0, 1000, 2000, 3000, 4000]);
        let range = tl.snapped_range(2900, 1100).unwrap();
        assert_eq!(tl.range_indices(range), Ok((1, 3)));

        let right = tl.shunt(range, 5).unwrap();
        assert_eq!(tl.range_indices(right), Ok((2, 4)));
        let left = tl.shunt(range, -1).unwrap();
        assert_eq!(tl.range_indices(left), Ok((0, 2)));

        assert_eq!(tl.snapped_range(0, 100), Err(TimelineError::InvalidRange));
    }

    #[test]
    fn test_random_edits_stay_ordered() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut tl = BeatTimeline::new();
        for _ in 0..2000 {
            match rng.gen_range(0..3) {
                0 => {
                    let _ = tl.insert(rng.gen_range(0..50_000));
                }
                1 if !tl.is_empty() => {
                    let h = tl.handle_at(rng.gen_range(0..tl.len())).unwrap();
                    tl.remove(h).unwrap();
                }
                _ if !tl.is_empty() => {
                    let h = tl.handle_at(rng.gen_range(0..tl.len())).unwrap();
                    let frame = tl.frame_of(h).unwrap() + rng.gen_range(-300..300);
                    let _ = tl.move_beat(h, frame);
                }
                _ => {}
            }
            assert_strictly_increasing(&tl);
            for (i, marker) in tl.markers().iter().enumerate() {
                assert_eq!(tl.index_of(marker.handle), Ok(i));
            }
        }
    }

    #[test]
    fn test_rescale_frames() {
        let mut frames = vec![0, 44100, 22051];
        rescale_frames(&mut frames, 0, 48000);
        assert_eq!(frames, vec![0, 48000, 24001]);

        let mut same = vec![7, 9];
        rescale_frames(&mut same, 48000, 48000);
        assert_eq!(same, vec![7, 9]);
    }

    #[test]
    fn test_frames_to_duration() {
        assert_eq!(frames_to_duration(48000, 48000), Duration::from_secs(1));
        assert_eq!(frames_to_duration(48, 48000), Duration::from_millis(1));
        assert_eq!(frames_to_duration(-10, 48000), Duration::ZERO);
    }
}
