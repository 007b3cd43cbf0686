//! Bus mixer: sums registered sources into the output bus
//!
//! Each period every installed lane is advanced by exactly one period:
//! - Up to `n` frames are read from its queue; a short or empty queue is padded
//!   with silence (the source is starved, not finished)
//! - Its gain ramps linearly from last period's value to the current target,
//!   so gain, mute and ducking changes never step mid-signal
//! - Muted sources are still drained so they stay in sync with the bus
//!
//! Ducking: while any unmuted source of a higher priority has audio queued,
//! lower priority sources are scaled by `duck_gain`.

use basedrop::Owned;

use super::source::{SourceLane, SourcePriority};
use crate::types::{StereoBuffer, StereoSample, MAX_PERIOD_FRAMES};

pub struct BusMixer {
    lanes: Vec<Option<Owned<SourceLane>>>,
    /// Pre-allocated per-lane read buffer
    scratch: StereoBuffer,
    duck_gain: f32,
}

impl BusMixer {
    pub fn new(max_sources: usize, duck_gain: f32) -> Self {
        Self {
            lanes: (0..max_sources).map(|_| None).collect(),
            scratch: StereoBuffer::silence(MAX_PERIOD_FRAMES as usize),
            duck_gain,
        }
    }

    /// Put a lane into `slot`, returning whatever was there
    pub fn install(&mut self, slot: usize, lane: Owned<SourceLane>) -> Option<Owned<SourceLane>> {
        match self.lanes.get_mut(slot) {
            Some(existing) => existing.replace(lane),
            // Slot out of range: hand the lane back so it is still freed off-thread
            None => Some(lane),
        }
    }

    pub fn remove(&mut self, slot: usize) -> Option<Owned<SourceLane>> {
        self.lanes.get_mut(slot).and_then(Option::take)
    }

    pub fn active_sources(&self) -> usize {
        self.lanes.iter().filter(|l| l.is_some()).count()
    }

    /// Highest priority among unmuted lanes that have audio queued
    fn dominant_priority(&self) -> Option<SourcePriority> {
        self.lanes
            .iter()
            .flatten()
            .filter(|lane| !lane.control.is_muted() && lane.control.gain() > 0.0)
            .filter(|lane| lane.queued_frames() > 0)
            .map(|lane| lane.priority)
            .max()
    }

    /// Add one period of every source onto `bus`
    pub fn mix(&mut self, bus: &mut [StereoSample]) {
        let n = bus.len().min(self.scratch.len());
        let dominant = self.dominant_priority();
        let scratch = self.scratch.as_mut_slice();

        for lane in self.lanes.iter_mut().flatten() {
            let available = lane.consumer.slots().min(n);
            if let Ok(chunk) = lane.consumer.read_chunk(available) {
                let (first, second) = chunk.as_slices();
                scratch[..first.len()].copy_from_slice(first);
                scratch[first.len()..available].copy_from_slice(second);
                chunk.commit_all();
            }
            scratch[available..n].fill(StereoSample::silence());

            let mut target = if lane.control.is_muted() {
                0.0
            } else {
                lane.control.gain()
            };
            if dominant.is_some_and(|p| lane.priority < p) {
                target *= self.duck_gain;
            }

            let start = lane.applied_gain;
            if start == target {
                if target != 0.0 {
                    for (out, s) in bus[..n].iter_mut().zip(&scratch[..n]) {
                        *out += *s * target;
                    }
                }
            } else {
                let step = (target - start) / n.max(1) as f32;
                for (i, (out, s)) in bus[..n].iter_mut().zip(&scratch[..n]).enumerate() {
                    *out += *s * (start + step * (i + 1) as f32);
                }
            }
            lane.applied_gain = target;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::gc::gc_handle;
    use crate::engine::source::{SourceHandle, SourceRegistry};
    use crate::types::AudioBlock;

    fn setup(priorities: &[SourcePriority]) -> (SourceRegistry, Vec<SourceHandle>, BusMixer) {
        let mut registry = SourceRegistry::new(priorities.len());
        let mut mixer = BusMixer::new(priorities.len(), 0.25);
        let mut handles = Vec::new();
        for (i, &p) in priorities.iter().enumerate() {
            let (handle, lane) = registry.register(&format!("s{}", i), p, 1024).unwrap();
            assert!(mixer.install(handle.slot(), Owned::new(&gc_handle(), lane)).is_none());
            handles.push(handle);
        }
        (registry, handles, mixer)
    }

    fn constant(frames: usize, value: f32) -> AudioBlock {
        AudioBlock::mono(vec![value; frames], 48000, 0).unwrap()
    }

    #[test]
    fn test_sources_are_summed() {
        let (mut registry, h, mut mixer) = setup(&[SourcePriority::Normal, SourcePriority::Normal]);
        registry.push(h[0], &constant(64, 0.25)).unwrap();
        registry.push(h[1], &constant(64, 0.125)).unwrap();

        let mut bus = vec![StereoSample::silence(); 64];
        mixer.mix(&mut bus);
        assert!(bus.iter().all(|s| *s == StereoSample::mono(0.375)));
        assert_eq!(registry.queued_frames(h[0]).unwrap(), 0);
    }

    #[test]
    fn test_starved_source_pads_with_silence_and_stays_installed() {
        let (mut registry, h, mut mixer) = setup(&[SourcePriority::Normal]);
        registry.push(h[0], &constant(10, 0.5)).unwrap();

        let mut bus = vec![StereoSample::silence(); 32];
        mixer.mix(&mut bus);
        assert!(bus[..10].iter().all(|s| s.left == 0.5));
        assert!(bus[10..].iter().all(|s| *s == StereoSample::silence()));

        // Nothing queued: silent period, lane still there
        let mut bus = vec![StereoSample::silence(); 32];
        mixer.mix(&mut bus);
        assert!(bus.iter().all(|s| *s == StereoSample::silence()));
        assert_eq!(mixer.active_sources(), 1);

        registry.push(h[0], &constant(32, 0.5)).unwrap();
        let mut bus = vec![StereoSample::silence(); 32];
        mixer.mix(&mut bus);
        assert!(bus.iter().all(|s| s.left == 0.5));
    }

    #[test]
    fn test_queue_advances_one_period() {
        let (mut registry, h, mut mixer) = setup(&[SourcePriority::Normal]);
        registry.push(h[0], &constant(100, 0.1)).unwrap();
        let mut bus = vec![StereoSample::silence(); 32];
        mixer.mix(&mut bus);
        assert_eq!(registry.queued_frames(h[0]).unwrap(), 68);
    }

    #[test]
    fn test_gain_change_is_ramped() {
        let (mut registry, h, mut mixer) = setup(&[SourcePriority::Normal]);
        registry.control(h[0]).unwrap().set_gain(0.0);
        registry.push(h[0], &constant(128, 1.0)).unwrap();

        let mut bus = vec![StereoSample::silence(); 64];
        mixer.mix(&mut bus);
        // Ramps from 1.0 down to 0.0 across the period
        for pair in bus.windows(2) {
            assert!(pair[1].left <= pair[0].left);
        }
        assert!(bus[0].left > 0.9);
        assert_eq!(bus[63].left, 0.0);

        // Next period sits at the target
        let mut bus = vec![StereoSample::silence(); 64];
        mixer.mix(&mut bus);
        assert!(bus.iter().all(|s| *s == StereoSample::silence()));
    }

    #[test]
    fn test_muted_source_is_drained_but_silent() {
        let (mut registry, h, mut mixer) = setup(&[SourcePriority::Normal]);
        registry.control(h[0]).unwrap().set_muted(true);
        registry.push(h[0], &constant(128, 1.0)).unwrap();

        let mut bus = vec![StereoSample::silence(); 64];
        mixer.mix(&mut bus);
        let mut bus = vec![StereoSample::silence(); 64];
        mixer.mix(&mut bus);
        assert!(bus.iter().all(|s| *s == StereoSample::silence()));
        assert_eq!(registry.queued_frames(h[0]).unwrap(), 0);
    }

    #[test]
    fn test_high_priority_ducks_lower() {
        let (mut registry, h, mut mixer) = setup(&[SourcePriority::Normal, SourcePriority::High]);
        let period = 64;

        // Settle the track's gain at 1.0 with speech idle
        registry.push(h[0], &constant(period, 0.5)).unwrap();
        let mut bus = vec![StereoSample::silence(); period];
        mixer.mix(&mut bus);
        assert_eq!(bus[period - 1].left, 0.5);

        // Speech arrives: track ramps to duck gain, then holds there
        for _ in 0..2 {
            registry.push(h[0], &constant(period, 0.5)).unwrap();
            registry.push(h[1], &constant(period, 0.0)).unwrap();
            bus = vec![StereoSample::silence(); period];
            mixer.mix(&mut bus);
        }
        assert!((bus[0].left - 0.5 * 0.25).abs() < 1e-6);

        // Speech queue empty: track ramps back up to unity
        registry.push(h[0], &constant(period, 0.5)).unwrap();
        bus = vec![StereoSample::silence(); period];
        mixer.mix(&mut bus);
        assert!((bus[period - 1].left - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_remove_discards_lane() {
        let (mut registry, h, mut mixer) = setup(&[SourcePriority::Normal]);
        registry.push(h[0], &constant(64, 0.5)).unwrap();
        assert!(mixer.remove(h[0].slot()).is_some());
        let mut bus = vec![StereoSample::silence(); 64];
        mixer.mix(&mut bus);
        assert!(bus.iter().all(|s| *s == StereoSample::silence()));
        assert_eq!(mixer.active_sources(), 0);
    }
}
