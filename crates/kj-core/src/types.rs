//! Common types for the auto-kj audio engine
//!
//! Fundamental sample and buffer types shared by the DSP, mixer and transports,
//! plus the `AudioBlock` unit that producers hand to the engine.

use thiserror::Error;

/// Default device sample rate (48kHz, what jackd is started with)
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Sample rate of the analysis path (wake-word and speech-to-text models)
pub const ANALYSIS_SAMPLE_RATE: u32 = 16000;

/// Default period size in frames (~5.3ms at 48kHz)
pub const DEFAULT_PERIOD_FRAMES: u32 = 256;

/// Smallest accepted period size in frames
pub const MIN_PERIOD_FRAMES: u32 = 16;

/// Largest accepted period size in frames; all per-period scratch is sized to this
pub const MAX_PERIOD_FRAMES: u32 = 8192;

/// Audio sample type (32-bit float for processing)
pub type Sample = f32;

/// A single stereo sample (left and right channels)
///
/// `#[repr(C)]` keeps the layout [left, right] so slices can be viewed as
/// interleaved f32 through bytemuck.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StereoSample {
    pub left: Sample,
    pub right: Sample,
}

impl StereoSample {
    #[inline]
    pub fn new(left: Sample, right: Sample) -> Self {
        Self { left, right }
    }

    #[inline]
    pub fn silence() -> Self {
        Self::default()
    }

    /// Same value in both channels
    #[inline]
    pub fn mono(value: Sample) -> Self {
        Self { left: value, right: value }
    }
}

impl std::ops::AddAssign for StereoSample {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.left += other.left;
        self.right += other.right;
    }
}

impl std::ops::Mul<Sample> for StereoSample {
    type Output = Self;

    #[inline]
    fn mul(self, factor: Sample) -> Self {
        Self {
            left: self.left * factor,
            right: self.right * factor,
        }
    }
}

/// A buffer of stereo samples
///
/// The bus and playback scratch buffers are allocated once at `MAX_PERIOD_FRAMES`
/// capacity and then resized in place with `set_len_from_capacity`.
#[derive(Debug, Clone, Default)]
pub struct StereoBuffer {
    samples: Vec<StereoSample>,
}

impl StereoBuffer {
    /// Create an empty buffer with the given capacity (in stereo frames)
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
        }
    }

    /// Create a buffer filled with silence
    pub fn silence(len: usize) -> Self {
        Self {
            samples: vec![StereoSample::silence(); len],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Set the working length of a pre-allocated buffer (real-time safe)
    ///
    /// Newly exposed frames are silent. Growing past the capacity would allocate,
    /// which callers on the audio thread must never do.
    #[inline]
    pub fn set_len_from_capacity(&mut self, new_len: usize) {
        if new_len > self.samples.len() {
            debug_assert!(
                new_len <= self.samples.capacity(),
                "set_len_from_capacity called with len > capacity"
            );
            self.samples.resize(new_len, StereoSample::silence());
        } else {
            self.samples.truncate(new_len);
        }
    }

    #[inline]
    pub fn as_slice(&self) -> &[StereoSample] {
        &self.samples
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [StereoSample] {
        &mut self.samples
    }

    pub fn iter(&self) -> impl Iterator<Item = &StereoSample> {
        self.samples.iter()
    }
}

/// Errors raised when constructing an `AudioBlock`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("Audio block must have at least one channel")]
    NoChannels,

    #[error("Audio block of {samples} samples is not a whole number of {channels}-channel frames")]
    RaggedFrames { samples: usize, channels: u16 },

    #[error("Audio block sample rate must be non-zero")]
    ZeroSampleRate,

    #[error("Audio block is {block}Hz but the engine runs at {engine}Hz")]
    RateMismatch { block: u32, engine: u32 },

    #[error("Audio block of {frames} frames can never fit a queue of {capacity} frames")]
    TooLarge { frames: usize, capacity: usize },
}

/// One producer-side chunk of audio on its way to the bus
///
/// Samples are interleaved. A block is immutable once built; pushing it into the
/// engine copies the frames into the source's ring, so the producer keeps no alias
/// into anything the audio thread reads.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    samples: Box<[Sample]>,
    channels: u16,
    sample_rate: u32,
    sequence: u64,
}

impl AudioBlock {
    pub fn new(
        samples: Vec<Sample>,
        channels: u16,
        sample_rate: u32,
        sequence: u64,
    ) -> Result<Self, BlockError> {
        if channels == 0 {
            return Err(BlockError::NoChannels);
        }
        if sample_rate == 0 {
            return Err(BlockError::ZeroSampleRate);
        }
        if samples.len() % channels as usize != 0 {
            return Err(BlockError::RaggedFrames {
                samples: samples.len(),
                channels,
            });
        }
        Ok(Self {
            samples: samples.into_boxed_slice(),
            channels,
            sample_rate,
            sequence,
        })
    }

    /// Single-channel block
    pub fn mono(samples: Vec<Sample>, sample_rate: u32, sequence: u64) -> Result<Self, BlockError> {
        Self::new(samples, 1, sample_rate, sequence)
    }

    /// Two-channel block built from stereo frames
    pub fn stereo(
        frames: &[StereoSample],
        sample_rate: u32,
        sequence: u64,
    ) -> Result<Self, BlockError> {
        let samples: &[Sample] = bytemuck::cast_slice(frames);
        Self::new(samples.to_vec(), 2, sample_rate, sequence)
    }

    #[inline]
    pub fn channels(&self) -> u16 {
        self.channels
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Number of frames (samples per channel)
    #[inline]
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Interleaved samples
    #[inline]
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Iterate the block as stereo frames
    ///
    /// Mono is duplicated to both sides; channels beyond the second are ignored.
    pub fn stereo_frames(&self) -> impl Iterator<Item = StereoSample> + '_ {
        let channels = self.channels as usize;
        self.samples.chunks_exact(channels).map(move |frame| {
            if channels == 1 {
                StereoSample::mono(frame[0])
            } else {
                StereoSample::new(frame[0], frame[1])
            }
        })
    }
}
