//! Transport configuration
//!
//! Which backend carries the engine's periods and which devices it opens.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::jack_server::JackServerConfig;
use crate::config::ModeConfig;

/// Audio device identifier
///
/// Includes both the device name and the host backend (JACK, ALSA, etc.)
/// so a device can be picked from a specific host on systems with several.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceId {
    /// Device name as reported by the system
    pub name: String,
    /// Audio host label (e.g., "JACK", "ALSA", "CoreAudio")
    /// If None, every available host is searched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl DeviceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: None,
        }
    }

    pub fn with_host(name: &str, host: &str) -> Self {
        Self {
            name: name.to_string(),
            host: Some(host.to_string()),
        }
    }

    /// Get a display label that includes the host if available
    pub fn display_label(&self) -> String {
        match &self.host {
            Some(host) => format!("[{}] {}", host, self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_label())
    }
}

/// Which transport drives the processing callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// cpal capture and playback streams (any platform)
    #[default]
    Cpal,
    /// Native JACK client (Linux, `jack-backend` feature)
    Jack,
    /// No devices: the caller runs each period
    Virtual,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Cpal => write!(f, "cpal"),
            Backend::Jack => write!(f, "jack"),
            Backend::Virtual => write!(f, "virtual"),
        }
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpal" => Ok(Backend::Cpal),
            "jack" => Ok(Backend::Jack),
            "virtual" | "none" => Ok(Backend::Virtual),
            other => Err(format!("unknown backend '{}'", other)),
        }
    }
}

/// What a transport has to open
#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    pub backend: Backend,
    pub sample_rate: u32,
    pub period_frames: u32,
    pub capture_device: Option<DeviceId>,
    pub playback_device: Option<DeviceId>,
    /// Launch jackd / zita-a2j first (JACK backend only)
    pub jack_server: Option<JackServerConfig>,
}

impl TransportConfig {
    pub fn from_mode(backend: Backend, mode: &ModeConfig) -> Self {
        Self {
            backend,
            sample_rate: mode.sample_rate,
            period_frames: mode.period_frames,
            capture_device: mode.capture_device.clone(),
            playback_device: mode.playback_device.clone(),
            jack_server: None,
        }
    }

    pub fn with_jack_server(mut self, server: Option<JackServerConfig>) -> Self {
        self.jack_server = server;
        self
    }

    /// One period in milliseconds
    pub fn period_ms(&self) -> f32 {
        (self.period_frames as f32 / self.sample_rate as f32) * 1000.0
    }
}
