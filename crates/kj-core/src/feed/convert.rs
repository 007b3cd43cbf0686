//! PCM conversion to engine-rate stereo (non-real-time)
//!
//! TTS renders 16-bit mono at 22050Hz and backing tracks arrive at whatever
//! rate the file has. Both are converted once, up front, on the producer's
//! thread with `rubato`'s FFT resampler; the audio thread only ever sees
//! blocks at the device rate.

use rubato::{FftFixedIn, Resampler};

use super::error::{FeedError, FeedResult};
use crate::types::{BlockError, StereoSample};

/// Resampler input chunk, in frames
const CHUNK_FRAMES: usize = 1024;

/// Converts interleaved PCM at one rate to stereo frames at another
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmConverter {
    source_rate: u32,
    channels: u16,
    target_rate: u32,
}

impl PcmConverter {
    pub fn new(source_rate: u32, channels: u16, target_rate: u32) -> FeedResult<Self> {
        if channels == 0 || channels > 2 {
            return Err(FeedError::Channels(channels));
        }
        if source_rate == 0 || target_rate == 0 {
            return Err(FeedError::ZeroSampleRate);
        }
        Ok(Self {
            source_rate,
            channels,
            target_rate,
        })
    }

    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Output length for `input_frames` of input, rounded up
    pub fn output_frames(&self, input_frames: usize) -> usize {
        let num = input_frames as u64 * self.target_rate as u64;
        num.div_ceil(self.source_rate as u64) as usize
    }

    /// Convert 16-bit PCM
    pub fn convert_i16(&self, interleaved: &[i16]) -> FeedResult<Vec<StereoSample>> {
        let samples: Vec<f32> = interleaved.iter().map(|&s| s as f32 / 32768.0).collect();
        self.convert_f32(&samples)
    }

    /// Convert float PCM; mono is copied to both sides
    pub fn convert_f32(&self, interleaved: &[f32]) -> FeedResult<Vec<StereoSample>> {
        let channels = self.channels as usize;
        if interleaved.len() % channels != 0 {
            return Err(BlockError::RaggedFrames {
                samples: interleaved.len(),
                channels: self.channels,
            }
            .into());
        }

        let planes: Vec<Vec<f32>> = (0..channels)
            .map(|c| interleaved.iter().skip(c).step_by(channels).copied().collect())
            .collect();

        let planes = if self.source_rate == self.target_rate || interleaved.is_empty() {
            planes
        } else {
            self.resample(&planes)?
        };
        Ok(to_stereo(&planes))
    }

    fn resample(&self, planes: &[Vec<f32>]) -> FeedResult<Vec<Vec<f32>>> {
        let frames = planes[0].len();
        let expected = self.output_frames(frames);

        let mut resampler = FftFixedIn::<f32>::new(
            self.source_rate as usize,
            self.target_rate as usize,
            CHUNK_FRAMES,
            2,
            planes.len(),
        )
        .map_err(|e| FeedError::Resampler(e.to_string()))?;

        // The resampler's own latency is trimmed from the front
        let delay = resampler.output_delay();
        let mut out: Vec<Vec<f32>> = vec![Vec::with_capacity(expected + delay); planes.len()];
        let mut pos = 0;

        while out[0].len() < expected + delay {
            let need = resampler.input_frames_next();
            let produced = if pos + need <= frames {
                let chunk: Vec<&[f32]> = planes.iter().map(|p| &p[pos..pos + need]).collect();
                pos += need;
                resampler.process(chunk.as_slice(), None)
            } else if pos < frames {
                let chunk: Vec<&[f32]> = planes.iter().map(|p| &p[pos..]).collect();
                pos = frames;
                resampler.process_partial(Some(chunk.as_slice()), None)
            } else {
                // Flush the tail out of the filter
                resampler.process_partial::<&[f32]>(None, None)
            }
            .map_err(|e| FeedError::Resampler(e.to_string()))?;

            for (dst, src) in out.iter_mut().zip(produced) {
                dst.extend_from_slice(&src);
            }
        }

        for plane in &mut out {
            plane.drain(..delay);
            plane.truncate(expected);
        }
        Ok(out)
    }
}

fn to_stereo(planes: &[Vec<f32>]) -> Vec<StereoSample> {
    match planes {
        [mono] => mono.iter().map(|&s| StereoSample::mono(s)).collect(),
        [left, right, ..] => left
            .iter()
            .zip(right)
            .map(|(&l, &r)| StereoSample::new(l, r))
            .collect(),
        [] => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(rate: u32, freq: f32, frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    fn rms(samples: impl Iterator<Item = f32>) -> f32 {
        let (sum, n) = samples.fold((0.0, 0usize), |(s, n), x| (s + x * x, n + 1));
        (sum / n.max(1) as f32).sqrt()
    }

    #[test]
    fn test_rejects_bad_formats() {
        assert!(matches!(PcmConverter::new(48000, 3, 48000), Err(FeedError::Channels(3))));
        assert!(matches!(PcmConverter::new(0, 1, 48000), Err(FeedError::ZeroSampleRate)));

        let stereo = PcmConverter::new(48000, 2, 48000).unwrap();
        assert!(matches!(
            stereo.convert_f32(&[0.1, 0.2, 0.3]),
            Err(FeedError::Block(BlockError::RaggedFrames { .. }))
        ));
    }

    #[test]
    fn test_same_rate_is_passthrough() {
        let mono = PcmConverter::new(48000, 1, 48000).unwrap();
        let out = mono.convert_f32(&[0.25, -0.5]).unwrap();
        assert_eq!(out, vec![StereoSample::mono(0.25), StereoSample::mono(-0.5)]);

        let stereo = PcmConverter::new(48000, 2, 48000).unwrap();
        let out = stereo.convert_f32(&[0.1, 0.2, 0.3, 0.4]).unwrap();
        assert_eq!(out, vec![StereoSample::new(0.1, 0.2), StereoSample::new(0.3, 0.4)]);
    }

    #[test]
    fn test_i16_scaling() {
        let converter = PcmConverter::new(22050, 1, 22050).unwrap();
        let out = converter.convert_i16(&[i16::MIN, 0, 16384]).unwrap();
        assert_eq!(out[0].left, -1.0);
        assert_eq!(out[1].left, 0.0);
        assert_eq!(out[2].left, 0.5);
    }

    #[test]
    fn test_tts_rate_upsampled_to_device_rate() {
        let converter = PcmConverter::new(22050, 1, 48000).unwrap();
        let input = sine(22050, 440.0, 22050);
        let out = converter.convert_f32(&input).unwrap();

        assert_eq!(out.len(), 48000, "one second in, one second out");
        let middle = &out[4800..43200];
        let expected = rms(input.iter().copied());
        let actual = rms(middle.iter().map(|s| s.left));
        assert!(
            (actual - expected).abs() < expected * 0.05,
            "level changed: {} vs {}",
            actual,
            expected
        );
        assert!(out.iter().all(|s| s.left == s.right));
    }

    #[test]
    fn test_output_length_rounds_up() {
        let converter = PcmConverter::new(44100, 2, 48000).unwrap();
        assert_eq!(converter.output_frames(44100), 48000);
        assert_eq!(converter.output_frames(1), 2);
        assert_eq!(converter.output_frames(0), 0);

        let input = sine(44100, 1000.0, 1000 * 2);
        let out = converter.convert_f32(&input).unwrap();
        assert_eq!(out.len(), converter.output_frames(1000));
    }
}
