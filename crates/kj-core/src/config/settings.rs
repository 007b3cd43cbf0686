//! Engine settings file
//!
//! The YAML file at `~/.auto-kj/engine.yaml` holds everything needed to open
//! the engine. Environment variables are applied on top of the file so a
//! launcher can pick devices without rewriting it.

use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use super::mode::{ModeConfig, MonitorMode};
use crate::audio::{Backend, DeviceId, JackServerConfig};
use crate::types::ANALYSIS_SAMPLE_RATE;

/// Analysis frame length in samples (80ms at 16kHz, what the wake-word model eats)
pub const DEFAULT_ANALYSIS_FRAME_LEN: usize = 1280;

/// Fixed capacities chosen at `open`; nothing on the audio thread grows past these
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineLimits {
    /// Maximum concurrently registered sources
    pub max_sources: usize,
    /// Per-source queue depth, in periods
    pub source_queue_blocks: usize,
    /// Sample rate of the analysis path
    pub analysis_rate: u32,
    /// Samples per analysis frame
    pub analysis_frame_len: usize,
    /// Analysis frames held before the oldest is dropped
    pub analysis_queue_frames: usize,
    /// Gain applied to lower-priority sources while a higher one is playing
    pub duck_gain: f32,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_sources: 8,
            source_queue_blocks: 64,
            analysis_rate: ANALYSIS_SAMPLE_RATE,
            analysis_frame_len: DEFAULT_ANALYSIS_FRAME_LEN,
            analysis_queue_frames: 64,
            duck_gain: 0.3,
        }
    }
}

impl EngineLimits {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_sources == 0 {
            return Err(ConfigError::Limits("max_sources must be at least 1".to_string()));
        }
        if self.source_queue_blocks < 2 {
            return Err(ConfigError::Limits(
                "source_queue_blocks must be at least 2".to_string(),
            ));
        }
        if self.analysis_frame_len == 0 || self.analysis_queue_frames == 0 {
            return Err(ConfigError::Limits(
                "analysis frame length and queue depth must be non-zero".to_string(),
            ));
        }
        if !self.duck_gain.is_finite() || !(0.0..=1.0).contains(&self.duck_gain) {
            return Err(ConfigError::Limits(format!(
                "duck_gain must be in [0, 1], got {}",
                self.duck_gain
            )));
        }
        Ok(())
    }
}

/// Complete engine settings as stored on disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub mode: ModeConfig,
    pub limits: EngineLimits,
    pub backend: Backend,
    /// Spawn jackd and zita-a2j before connecting (JACK backend only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jack_server: Option<JackServerConfig>,
}

/// Environment variables understood by [`EngineSettings::apply_env_overrides`]
pub const ENV_CAPTURE_DEVICE: &str = "AUTOKJ_CAPTURE_DEVICE";
pub const ENV_PLAYBACK_DEVICE: &str = "AUTOKJ_PLAYBACK_DEVICE";
pub const ENV_SAMPLE_RATE: &str = "AUTOKJ_SAMPLE_RATE";
pub const ENV_PERIOD: &str = "AUTOKJ_PERIOD";
pub const ENV_MONITOR_MODE: &str = "AUTOKJ_MONITOR_MODE";
pub const ENV_MIC_GAIN: &str = "AUTOKJ_MIC_GAIN";
pub const ENV_REVERB_WET: &str = "AUTOKJ_REVERB_WET";

impl EngineSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.limits.validate()?;
        self.mode.validate(self.limits.analysis_rate)?;
        if let Some(server) = &self.jack_server {
            server.validate()?;
        }
        Ok(())
    }

    /// Apply `AUTOKJ_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup
    ///
    /// Values that fail to parse are logged and ignored; range checks happen in
    /// `validate`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup(ENV_CAPTURE_DEVICE) {
            log::info!("{} override: capture device '{}'", ENV_CAPTURE_DEVICE, name);
            self.mode.capture_device = Some(parse_device(&name));
        }
        if let Some(name) = lookup(ENV_PLAYBACK_DEVICE) {
            log::info!("{} override: playback device '{}'", ENV_PLAYBACK_DEVICE, name);
            self.mode.playback_device = Some(parse_device(&name));
        }
        if let Some(rate) = parse_var::<u32, _>(&lookup, ENV_SAMPLE_RATE) {
            self.mode.sample_rate = rate;
        }
        if let Some(period) = parse_var::<u32, _>(&lookup, ENV_PERIOD) {
            self.mode.period_frames = period;
        }
        if let Some(mode) = parse_var::<MonitorMode, _>(&lookup, ENV_MONITOR_MODE) {
            self.mode.monitor_mode = mode;
        }
        if let Some(gain) = parse_var::<f32, _>(&lookup, ENV_MIC_GAIN) {
            self.mode.mic_gain = gain;
        }
        if let Some(wet) = parse_var::<f32, _>(&lookup, ENV_REVERB_WET) {
            self.mode.reverb_wet = wet;
        }
    }
}

/// Host labels as printed by device enumeration
const HOST_LABELS: [&str; 5] = ["ALSA", "JACK", "WASAPI", "CoreAudio", "Asio"];

/// `HOST:name` selects a device on a specific cpal host, anything else is a bare name
fn parse_device(value: &str) -> DeviceId {
    match value.split_once(':') {
        Some((host, name)) if HOST_LABELS.contains(&host) && !name.is_empty() => {
            DeviceId::with_host(name, host)
        }
        _ => DeviceId::new(value),
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => {
            log::info!("{} override: {}", key, raw.trim());
            Some(value)
        }
        Err(e) => {
            log::warn!("Ignoring {}='{}': {}", key, raw, e);
            None
        }
    }
}
