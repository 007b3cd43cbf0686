//! Run-time monitor configuration
//!
//! `ModeConfig` is the single value that `Engine::configure` accepts. It is
//! validated here, then published to the audio thread as an immutable snapshot.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use crate::audio::DeviceId;
use crate::dsp::{ReverbCoefficients, ReverbParams};
use crate::types::{DEFAULT_PERIOD_FRAMES, DEFAULT_SAMPLE_RATE, MAX_PERIOD_FRAMES, MIN_PERIOD_FRAMES};

/// Lowest device sample rate the engine will open
pub const MIN_SAMPLE_RATE: u32 = 8000;

/// Highest device sample rate the engine will open
pub const MAX_SAMPLE_RATE: u32 = 192000;

/// Upper bound for the software mic gain (+12 dB)
pub const MAX_MIC_GAIN: f32 = 4.0;

/// How the singer hears themselves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorMode {
    /// The interface monitors the mic directly; the engine adds nothing to the bus
    #[default]
    Hardware,
    /// The engine routes the mic through gain and reverb into the bus
    Software,
}

impl fmt::Display for MonitorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorMode::Hardware => write!(f, "hardware"),
            MonitorMode::Software => write!(f, "software"),
        }
    }
}

impl FromStr for MonitorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hardware" | "hw" => Ok(MonitorMode::Hardware),
            "software" | "sw" => Ok(MonitorMode::Software),
            other => Err(format!("unknown monitor mode '{}'", other)),
        }
    }
}

/// Monitor configuration, settable at start-up and through `configure`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeConfig {
    pub monitor_mode: MonitorMode,
    /// Linear gain applied to the mic in software monitoring
    pub mic_gain: f32,
    /// Reverb wet ratio in [0, 1]
    pub reverb_wet: f32,
    /// True while TTS is speaking; overrides `monitor_mode`
    pub muted_for_speech: bool,
    /// Capture device (None = system default)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_device: Option<DeviceId>,
    /// Playback device (None = system default)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playback_device: Option<DeviceId>,
    pub period_frames: u32,
    pub sample_rate: u32,
    pub reverb: ReverbParams,
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            monitor_mode: MonitorMode::default(),
            mic_gain: 1.0,
            reverb_wet: 0.3,
            muted_for_speech: false,
            capture_device: None,
            playback_device: None,
            period_frames: DEFAULT_PERIOD_FRAMES,
            sample_rate: DEFAULT_SAMPLE_RATE,
            reverb: ReverbParams::default(),
        }
    }
}

impl ModeConfig {
    /// Software monitoring with the given gain and wet ratio
    pub fn software(mic_gain: f32, reverb_wet: f32) -> Self {
        Self {
            monitor_mode: MonitorMode::Software,
            mic_gain,
            reverb_wet,
            ..Default::default()
        }
    }

    pub fn with_period(mut self, period_frames: u32) -> Self {
        self.period_frames = period_frames;
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Check every field and derive the reverb coefficients
    ///
    /// `analysis_rate` is needed because the decimator only supports whole ratios.
    pub fn validate(&self, analysis_rate: u32) -> Result<ReverbCoefficients, ConfigError> {
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&self.sample_rate) {
            return Err(ConfigError::SampleRate(self.sample_rate));
        }
        if analysis_rate == 0
            || self.sample_rate < analysis_rate
            || self.sample_rate % analysis_rate != 0
        {
            return Err(ConfigError::AnalysisRatio {
                device: self.sample_rate,
                analysis: analysis_rate,
            });
        }
        if !(MIN_PERIOD_FRAMES..=MAX_PERIOD_FRAMES).contains(&self.period_frames) {
            return Err(ConfigError::PeriodSize {
                frames: self.period_frames,
                min: MIN_PERIOD_FRAMES,
                max: MAX_PERIOD_FRAMES,
            });
        }
        if !self.mic_gain.is_finite() || !(0.0..=MAX_MIC_GAIN).contains(&self.mic_gain) {
            return Err(ConfigError::MicGain(self.mic_gain));
        }
        if !self.reverb_wet.is_finite() || !(0.0..=1.0).contains(&self.reverb_wet) {
            return Err(ConfigError::ReverbWet(self.reverb_wet));
        }
        for device in [&self.capture_device, &self.playback_device].into_iter().flatten() {
            if device.name.trim().is_empty() {
                return Err(ConfigError::Device("device name is empty".to_string()));
            }
        }
        self.reverb.coefficients(self.sample_rate)
    }

    /// True if switching from `self` to `other` needs the transport reopened
    pub fn transport_differs(&self, other: &ModeConfig) -> Option<&'static str> {
        if self.sample_rate != other.sample_rate {
            Some("sample rate")
        } else if self.period_frames != other.period_frames {
            Some("period size")
        } else if self.capture_device != other.capture_device {
            Some("capture device")
        } else if self.playback_device != other.playback_device {
            Some("playback device")
        } else {
            None
        }
    }
}
