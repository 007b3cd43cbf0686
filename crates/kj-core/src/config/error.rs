//! Configuration validation errors

use thiserror::Error;

/// A configuration that cannot be applied
///
/// Returned by `configure` and at start-up. These are fatal for the
/// configuration that produced them and are never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Unsupported sample rate: {0}Hz")]
    SampleRate(u32),

    #[error("Device rate {device}Hz is not a whole multiple of the analysis rate {analysis}Hz")]
    AnalysisRatio { device: u32, analysis: u32 },

    #[error("Period size {frames} outside {min}..={max} frames")]
    PeriodSize { frames: u32, min: u32, max: u32 },

    #[error("Mic gain {0} must be finite and between 0 and 4")]
    MicGain(f32),

    #[error("Reverb wet ratio {0} must be between 0 and 1")]
    ReverbWet(f32),

    #[error("Source gain {0} must be finite and between 0 and 1.5")]
    SourceGain(f32),

    #[error("Invalid device: {0}")]
    Device(String),

    #[error("Reverb would not decay: {0}")]
    UnstableFilter(String),

    #[error("Invalid JACK server settings: {0}")]
    JackServer(String),

    #[error("Invalid engine limits: {0}")]
    Limits(String),

    #[error("Period size cannot grow to {frames} frames while {sources} sources are registered")]
    PeriodGrowth { frames: u32, sources: usize },

    #[error("{0} cannot change while the transport is running")]
    RequiresRestart(&'static str),
}
