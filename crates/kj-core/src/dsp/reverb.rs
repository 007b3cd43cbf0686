//! Schroeder reverb for the live mic monitor
//!
//! Classic topology:
//! - Four parallel feedback comb filters with mutually distinct delays
//! - Two series all-pass filters for diffusion
//!
//! The comb feedback gains are derived from the requested RT60 decay time, so
//! every comb loses 60 dB over the same interval regardless of its length.
//! A one-pole lowpass in each comb loop darkens the tail (Freeverb-style damping).
//!
//! All delay lines are sized once in [`Reverb::new`]; `process` only walks
//! pre-allocated memory and costs O(block length).

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Comb filter delays in milliseconds (Schroeder's original set)
pub const COMB_DELAYS_MS: [f32; 4] = [29.7, 37.1, 41.1, 43.7];

/// All-pass filter delays in milliseconds
pub const ALLPASS_DELAYS_MS: [f32; 2] = [5.0, 1.7];

/// Gain applied to the summed comb outputs
const COMB_MIX: f32 = 0.25;

/// User-facing reverb parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverbParams {
    /// Time for the tail to fall by 60 dB, in seconds
    pub decay_seconds: f32,
    /// High-frequency damping inside the comb loops (0.0 = bright, <1.0)
    pub damping: f32,
    /// Feedback of the diffusion all-pass filters (|g| < 1)
    pub allpass_feedback: f32,
}

impl Default for ReverbParams {
    fn default() -> Self {
        Self {
            decay_seconds: 1.4,
            damping: 0.25,
            allpass_feedback: 0.7,
        }
    }
}

impl ReverbParams {
    /// Derive filter coefficients for a sample rate, rejecting anything that would not decay
    pub fn coefficients(&self, sample_rate: u32) -> Result<ReverbCoefficients, ConfigError> {
        if !self.decay_seconds.is_finite() || self.decay_seconds <= 0.0 {
            return Err(ConfigError::UnstableFilter(format!(
                "reverb decay must be a positive number of seconds, got {}",
                self.decay_seconds
            )));
        }
        if !(0.0..1.0).contains(&self.damping) {
            return Err(ConfigError::UnstableFilter(format!(
                "reverb damping must be in [0, 1), got {}",
                self.damping
            )));
        }
        if !self.allpass_feedback.is_finite() || self.allpass_feedback.abs() >= 1.0 {
            return Err(ConfigError::UnstableFilter(format!(
                "all-pass feedback must satisfy |g| < 1, got {}",
                self.allpass_feedback
            )));
        }

        let mut comb_feedback = [0.0f32; 4];
        for (g, &delay_ms) in comb_feedback.iter_mut().zip(COMB_DELAYS_MS.iter()) {
            // Use the rounded delay actually realised at this sample rate
            let delay_s = delay_samples(delay_ms, sample_rate) as f32 / sample_rate as f32;
            *g = 10.0_f32.powf(-3.0 * delay_s / self.decay_seconds);
            if !g.is_finite() || *g >= 1.0 {
                return Err(ConfigError::UnstableFilter(format!(
                    "decay of {}s gives comb feedback {} at {}Hz",
                    self.decay_seconds, g, sample_rate
                )));
            }
        }

        Ok(ReverbCoefficients {
            comb_feedback,
            damping: self.damping,
            allpass_feedback: self.allpass_feedback,
        })
    }
}

/// Validated coefficients; every loop gain is strictly below 1.0
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReverbCoefficients {
    comb_feedback: [f32; 4],
    damping: f32,
    allpass_feedback: f32,
}

impl ReverbCoefficients {
    pub fn comb_feedback(&self) -> [f32; 4] {
        self.comb_feedback
    }

    pub fn allpass_feedback(&self) -> f32 {
        self.allpass_feedback
    }
}

#[inline]
fn delay_samples(delay_ms: f32, sample_rate: u32) -> usize {
    ((delay_ms * 0.001 * sample_rate as f32).round() as usize).max(1)
}

/// Feedback comb filter with a damped loop
struct CombFilter {
    buffer: Box<[f32]>,
    pos: usize,
    filter_state: f32,
}

impl CombFilter {
    fn new(length: usize) -> Self {
        Self {
            buffer: vec![0.0; length].into_boxed_slice(),
            pos: 0,
            filter_state: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32, feedback: f32, damp: f32) -> f32 {
        let output = self.buffer[self.pos];

        self.filter_state = output * (1.0 - damp) + self.filter_state * damp;

        self.buffer[self.pos] = input + self.filter_state * feedback;
        self.pos += 1;
        if self.pos == self.buffer.len() {
            self.pos = 0;
        }

        output
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.filter_state = 0.0;
        self.pos = 0;
    }
}

/// Schroeder all-pass: w[n] = x[n] + g*w[n-D], y[n] = w[n-D] - g*w[n]
struct AllpassFilter {
    buffer: Box<[f32]>,
    pos: usize,
}

impl AllpassFilter {
    fn new(length: usize) -> Self {
        Self {
            buffer: vec![0.0; length].into_boxed_slice(),
            pos: 0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32, feedback: f32) -> f32 {
        let delayed = self.buffer[self.pos];
        let w = input + feedback * delayed;
        self.buffer[self.pos] = w;
        self.pos += 1;
        if self.pos == self.buffer.len() {
            self.pos = 0;
        }
        delayed - feedback * w
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.pos = 0;
    }
}

/// Mono Schroeder reverberator
pub struct Reverb {
    combs: [CombFilter; 4],
    allpasses: [AllpassFilter; 2],
    coefficients: ReverbCoefficients,
}

impl Reverb {
    /// Allocate all delay lines for `sample_rate`
    ///
    /// Not real-time safe; call before the stream starts.
    pub fn new(sample_rate: u32, coefficients: ReverbCoefficients) -> Self {
        let comb = |i: usize| CombFilter::new(delay_samples(COMB_DELAYS_MS[i], sample_rate));
        let allpass = |i: usize| AllpassFilter::new(delay_samples(ALLPASS_DELAYS_MS[i], sample_rate));
        Self {
            combs: [comb(0), comb(1), comb(2), comb(3)],
            allpasses: [allpass(0), allpass(1)],
            coefficients,
        }
    }

    /// Swap in new coefficients (real-time safe, delay lengths are untouched)
    #[inline]
    pub fn set_coefficients(&mut self, coefficients: ReverbCoefficients) {
        self.coefficients = coefficients;
    }

    pub fn coefficients(&self) -> &ReverbCoefficients {
        &self.coefficients
    }

    /// Process one block: `output = input*(1-wet) + wet*reverb(input)`
    ///
    /// `input` and `output` must have the same length.
    pub fn process(&mut self, input: &[f32], output: &mut [f32], wet: f32) {
        debug_assert_eq!(input.len(), output.len());
        let wet = wet.clamp(0.0, 1.0);
        let dry = 1.0 - wet;
        let c = self.coefficients;

        for (x, y) in input.iter().zip(output.iter_mut()) {
            let mut acc = 0.0f32;
            for (comb, &g) in self.combs.iter_mut().zip(c.comb_feedback.iter()) {
                acc += comb.process(*x, g, c.damping);
            }
            let mut diffused = acc * COMB_MIX;
            for ap in &mut self.allpasses {
                diffused = ap.process(diffused, c.allpass_feedback);
            }
            *y = *x * dry + diffused * wet;
        }
    }

    /// Clear all delay lines
    pub fn reset(&mut self) {
        for comb in &mut self.combs {
            comb.reset();
        }
        for ap in &mut self.allpasses {
            ap.reset();
        }
    }
}
