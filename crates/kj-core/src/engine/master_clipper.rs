//! Bus soft clipper
//!
//! Memoryless knee + tanh curve:
//! - Below the knee (-0.9 dBFS) samples pass through bit-exact
//! - Above it the excess is squashed by tanh into the remaining headroom,
//!   so the output never leaves [-1.0, 1.0]
//!
//! The curve is continuous with slope 1 at the knee, so engaging it does not
//! click. NaN input is treated as silence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::types::StereoSample;

/// Linear amplitude where the curve departs from identity
pub const DEFAULT_KNEE: f32 = 0.9;

pub struct MasterClipper {
    knee: f32,
    headroom: f32,
    /// Set by the audio thread when any sample exceeded the knee; cleared by the reader
    clip_active: Arc<AtomicBool>,
}

impl MasterClipper {
    pub fn new() -> Self {
        Self::with_knee(DEFAULT_KNEE)
    }

    /// Knee in linear amplitude, clamped to (0, 1)
    pub fn with_knee(knee: f32) -> Self {
        let knee = knee.clamp(0.01, 0.99);
        Self {
            knee,
            headroom: 1.0 - knee,
            clip_active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn knee(&self) -> f32 {
        self.knee
    }

    /// Shared clip flag for stats
    pub fn clip_indicator(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.clip_active)
    }

    /// Clip a stereo buffer in place
    pub fn process(&mut self, buffer: &mut [StereoSample]) {
        let mut clipped = false;
        for sample in buffer.iter_mut() {
            let (l, cl) = self.shape(sample.left);
            let (r, cr) = self.shape(sample.right);
            sample.left = l;
            sample.right = r;
            clipped |= cl | cr;
        }
        if clipped {
            self.clip_active.store(true, Ordering::Relaxed);
        }
    }

    /// Returns the shaped sample and whether the knee was crossed
    #[inline]
    fn shape(&self, x: f32) -> (f32, bool) {
        if x.is_nan() {
            return (0.0, false);
        }
        let magnitude = x.abs();
        if magnitude <= self.knee {
            return (x, false);
        }
        let over = (magnitude - self.knee) / self.headroom;
        let shaped = (self.knee + self.headroom * over.tanh()).min(1.0);
        (shaped.copysign(x), true)
    }
}

impl Default for MasterClipper {
    fn default() -> Self {
        Self::new()
    }
}
