//! Playback sources: registration, handles and per-source queues
//!
//! Every registered source owns one SPSC ring of stereo frames. The producer
//! half stays in the [`SourceRegistry`] (non-RT, behind the engine's source
//! lock); the consumer half travels to the audio thread inside a
//! [`SourceLane`]. Gain and mute live in [`SourceControl`] atomics so they can
//! change without a command round trip.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::error::{EngineError, EngineResult};
use crate::types::{AudioBlock, BlockError, StereoSample};

/// Loudest gain a source may be set to (the old player allowed 150% volume)
pub const MAX_SOURCE_GAIN: f32 = 1.5;

/// Opaque reference to a registered source
///
/// The generation makes stale handles fail with `UnknownSource` after the slot
/// has been reused by a later registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceHandle {
    slot: usize,
    generation: u64,
}

impl SourceHandle {
    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl fmt::Display for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source#{}.{}", self.slot, self.generation)
    }
}

/// Mixing priority; while a higher priority source is producing audio, lower ones are ducked
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourcePriority {
    Low,
    #[default]
    Normal,
    /// Speech prompts
    High,
}

/// Lock-free per-source controls shared between the API and the audio thread
#[derive(Debug)]
pub struct SourceControl {
    /// f32 bits
    gain: AtomicU32,
    muted: AtomicBool,
}

impl SourceControl {
    fn new() -> Self {
        Self {
            gain: AtomicU32::new(1.0f32.to_bits()),
            muted: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::Relaxed))
    }

    pub fn set_gain(&self, gain: f32) {
        self.gain.store(gain.to_bits(), Ordering::Relaxed);
    }

    #[inline]
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }
}

/// Audio-thread half of a source
#[derive(Debug)]
pub struct SourceLane {
    pub(crate) consumer: rtrb::Consumer<StereoSample>,
    pub(crate) control: Arc<SourceControl>,
    pub(crate) priority: SourcePriority,
    /// Gain actually applied at the end of the previous period (ramp start)
    pub(crate) applied_gain: f32,
}

impl SourceLane {
    /// Frames ready to be mixed
    #[inline]
    pub fn queued_frames(&self) -> usize {
        self.consumer.slots()
    }
}

/// Producer half of a source, owned by the registry
struct SourceEntry {
    name: String,
    generation: u64,
    producer: rtrb::Producer<StereoSample>,
    capacity: usize,
    control: Arc<SourceControl>,
}

/// Fixed set of source slots
pub struct SourceRegistry {
    slots: Vec<Option<SourceEntry>>,
    next_generation: u64,
}

impl SourceRegistry {
    pub fn new(max_sources: usize) -> Self {
        Self {
            slots: (0..max_sources).map(|_| None).collect(),
            next_generation: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Claim a free slot and create its queue of `capacity` frames
    ///
    /// Returns the handle and the lane to install on the audio thread.
    pub fn register(
        &mut self,
        name: &str,
        priority: SourcePriority,
        capacity: usize,
    ) -> EngineResult<(SourceHandle, SourceLane)> {
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(EngineError::Capacity {
                max: self.slots.len(),
            })?;

        let generation = self.next_generation;
        self.next_generation += 1;

        let (producer, consumer) = rtrb::RingBuffer::new(capacity);
        let control = Arc::new(SourceControl::new());

        self.slots[slot] = Some(SourceEntry {
            name: name.to_string(),
            generation,
            producer,
            capacity,
            control: Arc::clone(&control),
        });

        let lane = SourceLane {
            consumer,
            control,
            priority,
            applied_gain: 1.0,
        };
        Ok((SourceHandle { slot, generation }, lane))
    }

    /// Release a slot; the queue's producer is dropped here, the consumer with the lane
    pub fn unregister(&mut self, handle: SourceHandle) -> EngineResult<String> {
        self.entry(handle)?;
        let entry = self.slots[handle.slot]
            .take()
            .ok_or(EngineError::UnknownSource)?;
        Ok(entry.name)
    }

    /// Copy a block into the source's queue, all or nothing
    pub fn push(&mut self, handle: SourceHandle, block: &AudioBlock) -> EngineResult<()> {
        let entry = self.entry_mut(handle)?;
        let frames = block.frames();
        if frames > entry.capacity {
            return Err(BlockError::TooLarge {
                frames,
                capacity: entry.capacity,
            }
            .into());
        }
        if frames == 0 {
            return Ok(());
        }

        // Fails without touching the ring when fewer than `frames` slots are free
        let chunk = entry
            .producer
            .write_chunk_uninit(frames)
            .map_err(|_| EngineError::Backpressure)?;
        let written = chunk.fill_from_iter(block.stereo_frames());
        debug_assert_eq!(written, frames);
        Ok(())
    }

    /// Copy stereo frames directly, all or nothing
    pub fn push_frames(&mut self, handle: SourceHandle, frames: &[StereoSample]) -> EngineResult<()> {
        let entry = self.entry_mut(handle)?;
        if frames.len() > entry.capacity {
            return Err(BlockError::TooLarge {
                frames: frames.len(),
                capacity: entry.capacity,
            }
            .into());
        }
        if frames.is_empty() {
            return Ok(());
        }
        let chunk = entry
            .producer
            .write_chunk_uninit(frames.len())
            .map_err(|_| EngineError::Backpressure)?;
        chunk.fill_from_iter(frames.iter().copied());
        Ok(())
    }

    pub fn control(&self, handle: SourceHandle) -> EngineResult<&Arc<SourceControl>> {
        Ok(&self.entry(handle)?.control)
    }

    /// Frames waiting in the source's queue
    pub fn queued_frames(&self, handle: SourceHandle) -> EngineResult<usize> {
        let entry = self.entry(handle)?;
        Ok(entry.capacity - entry.producer.slots())
    }

    pub fn capacity(&self, handle: SourceHandle) -> EngineResult<usize> {
        Ok(self.entry(handle)?.capacity)
    }

    pub fn name(&self, handle: SourceHandle) -> EngineResult<&str> {
        Ok(&self.entry(handle)?.name)
    }

    fn entry(&self, handle: SourceHandle) -> EngineResult<&SourceEntry> {
        self.slots
            .get(handle.slot)
            .and_then(Option::as_ref)
            .filter(|e| e.generation == handle.generation)
            .ok_or(EngineError::UnknownSource)
    }

    fn entry_mut(&mut self, handle: SourceHandle) -> EngineResult<&mut SourceEntry> {
        self.slots
            .get_mut(handle.slot)
            .and_then(Option::as_mut)
            .filter(|e| e.generation == handle.generation)
            .ok_or(EngineError::UnknownSource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(frames: usize, value: f32) -> AudioBlock {
        AudioBlock::mono(vec![value; frames], 48000, 0).unwrap()
    }

    #[test]
    fn test_capacity_is_enforced() {
        let mut registry = SourceRegistry::new(2);
        registry.register("track", SourcePriority::Normal, 64).unwrap();
        registry.register("tts", SourcePriority::High, 64).unwrap();
        let err = registry.register("extra", SourcePriority::Low, 64).unwrap_err();
        assert!(matches!(err, EngineError::Capacity { max: 2 }));
    }

    #[test]
    fn test_push_is_all_or_nothing() {
        let mut registry = SourceRegistry::new(1);
        let (handle, mut lane) = registry.register("track", SourcePriority::Normal, 100).unwrap();

        registry.push(handle, &block(60, 0.5)).unwrap();
        assert_eq!(registry.queued_frames(handle).unwrap(), 60);

        // 40 free slots; a 50-frame block must be refused outright
        let err = registry.push(handle, &block(50, 0.25)).unwrap_err();
        assert!(matches!(err, EngineError::Backpressure));
        assert_eq!(registry.queued_frames(handle).unwrap(), 60);
        assert_eq!(lane.queued_frames(), 60);

        // Queue contents are exactly the first block
        let chunk = lane.consumer.read_chunk(60).unwrap();
        let (a, b) = chunk.as_slices();
        assert!(a.iter().chain(b).all(|s| *s == StereoSample::mono(0.5)));
        chunk.commit_all();
        assert_eq!(registry.queued_frames(handle).unwrap(), 0);
    }

    #[test]
    fn test_block_larger_than_queue_is_a_format_error() {
        let mut registry = SourceRegistry::new(1);
        let (handle, _lane) = registry.register("track", SourcePriority::Normal, 32).unwrap();
        let err = registry.push(handle, &block(33, 0.0)).unwrap_err();
        assert!(matches!(
            err,
            EngineError::BlockFormat(BlockError::TooLarge { frames: 33, capacity: 32 })
        ));
    }

    #[test]
    fn test_stale_handle_is_rejected_after_slot_reuse() {
        let mut registry = SourceRegistry::new(1);
        let (old, _lane) = registry.register("tts", SourcePriority::High, 16).unwrap();
        assert_eq!(registry.unregister(old).unwrap(), "tts");

        let (new, _lane) = registry.register("tts", SourcePriority::High, 16).unwrap();
        assert_eq!(old.slot(), new.slot());
        assert!(matches!(registry.push(old, &block(4, 0.1)), Err(EngineError::UnknownSource)));
        assert!(matches!(registry.unregister(old), Err(EngineError::UnknownSource)));
        assert!(registry.push(new, &block(4, 0.1)).is_ok());
    }

    #[test]
    fn test_push_frames_wraps_the_ring() {
        let mut registry = SourceRegistry::new(1);
        let (handle, mut lane) = registry.register("track", SourcePriority::Normal, 8).unwrap();
        let frames: Vec<_> = (0..6).map(|i| StereoSample::mono(i as f32)).collect();

        registry.push_frames(handle, &frames).unwrap();
        lane.consumer.read_chunk(6).unwrap().commit_all();
        // Write position is now 6 of 8, so this push spans both slices
        registry.push_frames(handle, &frames).unwrap();

        let chunk = lane.consumer.read_chunk(6).unwrap();
        let (a, b) = chunk.as_slices();
        let read: Vec<_> = a.iter().chain(b).copied().collect();
        assert_eq!(read, frames);
    }

    #[test]
    fn test_control_defaults() {
        let mut registry = SourceRegistry::new(1);
        let (handle, lane) = registry.register("track", SourcePriority::Low, 8).unwrap();
        let control = registry.control(handle).unwrap();
        assert_eq!(control.gain(), 1.0);
        assert!(!control.is_muted());
        control.set_gain(0.5);
        control.set_muted(true);
        assert_eq!(lane.control.gain(), 0.5);
        assert!(lane.control.is_muted());
        assert_eq!(lane.priority, SourcePriority::Low);
    }
}
