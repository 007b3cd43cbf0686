//! Transport and device error types

use thiserror::Error;

/// Errors from opening or running the capture/playback transport
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("No audio devices found")]
    NoDevices,

    #[error("No default {0} device")]
    NoDefaultDevice(&'static str),

    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to get device config: {0}")]
    DeviceConfig(String),

    #[error("Failed to build {direction} stream: {message}")]
    StreamBuild {
        direction: &'static str,
        message: String,
    },

    #[error("Failed to start audio stream: {0}")]
    StreamPlay(String),

    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("JACK error: {0}")]
    Jack(String),

    /// jackd or zita-a2j could not be launched or never became ready
    #[error("Audio server error: {0}")]
    Server(String),

    #[error("{0} backend is not available in this build")]
    BackendUnavailable(&'static str),
}

pub type AudioResult<T> = Result<T, AudioError>;
