//! Fixed-ratio FIR decimator for the analysis path
//!
//! Converts the mic signal from the device rate down to the analysis rate
//! (48kHz -> 16kHz for the wake-word and speech-to-text models).
//!
//! The lowpass is a Blackman-windowed sinc computed once at construction. The
//! history uses a double-length ring so every output is one contiguous dot
//! product; nothing is allocated after `new`, and an output is emitted exactly
//! every `factor` input samples, so output length depends only on input length
//! and the carried phase.

use std::f64::consts::PI;

use crate::config::ConfigError;

/// Filter taps per unit of decimation factor
const TAPS_PER_FACTOR: usize = 24;

/// Passband edge as a fraction of the output Nyquist frequency
const CUTOFF_RATIO: f64 = 0.85;

pub struct Decimator {
    factor: usize,
    taps: Box<[f32]>,
    history: Box<[f32]>,
    pos: usize,
    phase: usize,
}

impl Decimator {
    /// Build a decimator from `input_rate` to `output_rate`
    ///
    /// The ratio must be a whole number.
    pub fn new(input_rate: u32, output_rate: u32) -> Result<Self, ConfigError> {
        if output_rate == 0 || input_rate < output_rate || input_rate % output_rate != 0 {
            return Err(ConfigError::AnalysisRatio {
                device: input_rate,
                analysis: output_rate,
            });
        }
        let factor = (input_rate / output_rate) as usize;
        let taps = design_lowpass(factor);
        let len = taps.len();
        Ok(Self {
            factor,
            taps,
            history: vec![0.0; len * 2].into_boxed_slice(),
            pos: 0,
            phase: 0,
        })
    }

    #[inline]
    pub fn factor(&self) -> usize {
        self.factor
    }

    pub fn num_taps(&self) -> usize {
        self.taps.len()
    }

    /// Group delay in input samples
    pub fn latency_samples(&self) -> usize {
        (self.taps.len() - 1) / 2
    }

    /// Number of outputs the next `input_len` samples will produce
    #[inline]
    pub fn output_len(&self, input_len: usize) -> usize {
        (self.phase + input_len) / self.factor
    }

    /// Upper bound on outputs for `input_len` samples from any phase
    #[inline]
    pub fn max_output_len(factor: usize, input_len: usize) -> usize {
        input_len.div_ceil(factor)
    }

    /// Decimate `input` into `output`, returning the number of samples written
    ///
    /// `output` must hold at least `output_len(input.len())` samples.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) -> usize {
        let n_taps = self.taps.len();
        let mut written = 0;

        for &x in input {
            self.history[self.pos] = x;
            self.history[self.pos + n_taps] = x;

            self.phase += 1;
            if self.phase == self.factor {
                self.phase = 0;
                // Oldest sample is at pos+1, newest at pos+n_taps; taps are symmetric
                let window = &self.history[self.pos + 1..=self.pos + n_taps];
                let y: f32 = window.iter().zip(self.taps.iter()).map(|(s, h)| s * h).sum();
                output[written] = y;
                written += 1;
            }

            self.pos += 1;
            if self.pos == n_taps {
                self.pos = 0;
            }
        }

        written
    }

    pub fn reset(&mut self) {
        self.history.fill(0.0);
        self.pos = 0;
        self.phase = 0;
    }
}

/// Windowed-sinc lowpass with unity DC gain
fn design_lowpass(factor: usize) -> Box<[f32]> {
    if factor == 1 {
        return vec![1.0].into_boxed_slice();
    }
    let n = TAPS_PER_FACTOR * factor + 1;
    let center = (n - 1) as f64 / 2.0;
    // Cutoff in cycles per input sample
    let fc = CUTOFF_RATIO * 0.5 / factor as f64;

    let mut taps: Vec<f64> = (0..n)
        .map(|i| {
            let t = i as f64 - center;
            let sinc = if t == 0.0 {
                2.0 * fc
            } else {
                (2.0 * PI * fc * t).sin() / (PI * t)
            };
            let w = 0.42 - 0.5 * (2.0 * PI * i as f64 / (n - 1) as f64).cos()
                + 0.08 * (4.0 * PI * i as f64 / (n - 1) as f64).cos();
            sinc * w
        })
        .collect();

    let sum: f64 = taps.iter().sum();
    for t in &mut taps {
        *t /= sum;
    }
    taps.into_iter().map(|t| t as f32).collect()
}
