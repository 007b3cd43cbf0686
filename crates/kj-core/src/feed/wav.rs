//! WAV files: backing tracks in, analysis audio out

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use super::convert::PcmConverter;
use super::error::FeedResult;
use crate::engine::AnalysisFrame;
use crate::types::StereoSample;

/// Decoded WAV contents as interleaved f32
#[derive(Debug, Clone, PartialEq)]
pub struct WavClip {
    samples: Vec<f32>,
    channels: u16,
    sample_rate: u32,
}

impl WavClip {
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        Self {
            samples,
            channels: channels.max(1),
            sample_rate,
        }
    }

    /// Read any integer or float WAV, scaled to [-1, 1]
    pub fn read(path: &Path) -> Result<Self> {
        let reader = WavReader::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        let spec = reader.spec();

        let samples = match spec.sample_format {
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .with_context(|| format!("Failed to decode {:?}", path))?,
            SampleFormat::Int => {
                let scale = 1.0 / (1u64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 * scale))
                    .collect::<Result<Vec<_>, _>>()
                    .with_context(|| format!("Failed to decode {:?}", path))?
            }
        };

        log::info!(
            "Read {:?}: {}ch {}Hz {}-bit, {:.1}s",
            path,
            spec.channels,
            spec.sample_rate,
            spec.bits_per_sample,
            samples.len() as f32 / spec.channels.max(1) as f32 / spec.sample_rate.max(1) as f32
        );
        Ok(Self::new(samples, spec.channels, spec.sample_rate))
    }

    /// Write as 32-bit float
    pub fn write(&self, path: &Path) -> Result<()> {
        let spec = WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer =
            WavWriter::create(path, spec).with_context(|| format!("Failed to create {:?}", path))?;
        for &sample in &self.samples {
            writer.write_sample(sample)?;
        }
        writer
            .finalize()
            .with_context(|| format!("Failed to finalize {:?}", path))?;
        Ok(())
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate.max(1) as f64)
    }

    /// Stereo frames at `target_rate`; channels past the second are dropped
    pub fn to_engine_frames(&self, target_rate: u32) -> FeedResult<Vec<StereoSample>> {
        if self.channels > 2 {
            let stereo: Vec<f32> = self
                .samples
                .chunks_exact(self.channels as usize)
                .flat_map(|frame| [frame[0], frame[1]])
                .collect();
            return PcmConverter::new(self.sample_rate, 2, target_rate)?.convert_f32(&stereo);
        }
        PcmConverter::new(self.sample_rate, self.channels, target_rate)?.convert_f32(&self.samples)
    }
}

/// Writes analysis frames to a 16-bit mono WAV, exactly as the models see them
pub struct AnalysisRecorder {
    writer: WavWriter<BufWriter<File>>,
    frames: usize,
}

impl AnalysisRecorder {
    pub fn create(path: &Path, sample_rate: u32) -> Result<Self> {
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer =
            WavWriter::create(path, spec).with_context(|| format!("Failed to create {:?}", path))?;
        Ok(Self { writer, frames: 0 })
    }

    pub fn write_frame(&mut self, frame: &AnalysisFrame) -> Result<()> {
        for sample in frame.to_i16() {
            self.writer
                .write_sample(sample)
                .context("Failed to write analysis audio")?;
        }
        self.frames += 1;
        Ok(())
    }

    /// Frames written so far
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Flush the header; returns the number of frames written
    pub fn finalize(self) -> Result<usize> {
        let frames = self.frames;
        self.writer
            .finalize()
            .context("Failed to finalize analysis recording")?;
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::engine::{AnalysisQueue, FrameAssembler};

    #[test]
    fn test_float_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        let clip = WavClip::new(vec![0.5, -0.25, 0.125, 0.0], 2, 44100);
        clip.write(&path).unwrap();

        let read = WavClip::read(&path).unwrap();
        assert_eq!(read, clip);
        assert_eq!(read.frames(), 2);
    }

    #[test]
    fn test_int16_is_scaled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tts.wav");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for s in [16384i16, -32768, 0] {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        let clip = WavClip::read(&path).unwrap();
        assert_eq!(clip.samples(), &[0.5, -1.0, 0.0]);
        assert_eq!(clip.sample_rate(), 22050);
    }

    #[test]
    fn test_missing_file_has_context() {
        let err = WavClip::read(Path::new("/nonexistent/track.wav")).unwrap_err();
        assert!(err.to_string().contains("Failed to open"), "{}", err);
    }

    #[test]
    fn test_multichannel_keeps_front_pair() {
        let clip = WavClip::new(vec![0.1, 0.2, 0.9, 0.3, 0.4, 0.9], 3, 48000);
        let frames = clip.to_engine_frames(48000).unwrap();
        assert_eq!(frames, vec![StereoSample::new(0.1, 0.2), StereoSample::new(0.3, 0.4)]);
    }

    #[test]
    fn test_analysis_recorder_writes_pcm16() {
        let queue = Arc::new(AnalysisQueue::new(4, 2, 16000));
        let mut assembler = FrameAssembler::new(Arc::clone(&queue));
        assembler.push(&[0.5, -0.5, 0.0, 0.25, 0.5, 0.5, 0.5, 0.5]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analysis.wav");
        let mut recorder = AnalysisRecorder::create(&path, 16000).unwrap();
        while let Some(frame) = queue.poll() {
            recorder.write_frame(&frame).unwrap();
        }
        assert_eq!(recorder.finalize().unwrap(), 2);

        let reader = WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        assert_eq!(reader.spec().bits_per_sample, 16);
        assert_eq!(reader.len(), 8);
    }
}
