//! jackd and zita-a2j process management
//!
//! On the karaoke rig the playback interface is driven by `jackd` and the USB
//! mic is bridged in with `zita-a2j`. When configured, the engine launches both
//! before connecting its JACK client and tears them down when it closes.
//!
//! Start-up sequence:
//! 1. `jackd -R -d alsa -P <playback> -r <rate> -p <period> -n 2 -S`
//! 2. Probe with a throw-away client until the server accepts connections
//! 3. `zita-a2j -d <mic> -r <rate> -p <period>`, then give it a moment to register ports

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Seconds to wait for jackd when nothing else is configured
const DEFAULT_STARTUP_TIMEOUT_SECS: f32 = 10.0;

/// Client name used to probe for a running server
pub const PROBE_CLIENT_NAME: &str = "auto-kj-probe";

/// Settings for launching the JACK server and the mic bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JackServerConfig {
    /// ALSA playback device handed to jackd (e.g. "hw:1,0")
    pub playback_device: String,
    /// ALSA capture device bridged in by zita-a2j; None skips the bridge
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mic_device: Option<String>,
    /// Number of periods per buffer for jackd's ALSA driver
    pub periods_per_buffer: u32,
    /// Seconds to wait for jackd to accept clients
    pub startup_timeout_secs: f32,
}

impl Default for JackServerConfig {
    fn default() -> Self {
        Self {
            playback_device: "hw:0".to_string(),
            mic_device: None,
            periods_per_buffer: 2,
            startup_timeout_secs: DEFAULT_STARTUP_TIMEOUT_SECS,
        }
    }
}

impl JackServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.startup_timeout_secs.is_finite() || self.startup_timeout_secs < 0.0 {
            return Err(ConfigError::JackServer(format!(
                "startup timeout {}s must be finite and non-negative",
                self.startup_timeout_secs
            )));
        }
        if self.periods_per_buffer < 2 {
            return Err(ConfigError::JackServer(format!(
                "jackd needs at least 2 periods per buffer, got {}",
                self.periods_per_buffer
            )));
        }
        Ok(())
    }

    /// Saturates to the default for values `Duration` cannot hold
    pub fn startup_timeout(&self) -> Duration {
        Duration::try_from_secs_f32(self.startup_timeout_secs.max(0.0))
            .unwrap_or(Duration::from_secs_f32(DEFAULT_STARTUP_TIMEOUT_SECS))
    }

    /// Arguments for jackd, realtime with the ALSA driver in playback-only mode
    pub fn jackd_args(&self, sample_rate: u32, period_frames: u32) -> Vec<String> {
        vec![
            "-R".to_string(),
            "-d".to_string(),
            "alsa".to_string(),
            "-P".to_string(),
            self.playback_device.clone(),
            "-r".to_string(),
            sample_rate.to_string(),
            "-p".to_string(),
            period_frames.to_string(),
            "-n".to_string(),
            self.periods_per_buffer.to_string(),
            "-S".to_string(),
        ]
    }

    /// Arguments for zita-a2j, or None when no mic bridge is configured
    pub fn zita_args(&self, sample_rate: u32, period_frames: u32) -> Option<Vec<String>> {
        let mic = self.mic_device.as_ref()?;
        Some(vec![
            "-d".to_string(),
            mic.clone(),
            "-r".to_string(),
            sample_rate.to_string(),
            "-p".to_string(),
            period_frames.to_string(),
        ])
    }
}

#[cfg(all(target_os = "linux", feature = "jack-backend"))]
pub use running::JackServer;

#[cfg(all(target_os = "linux", feature = "jack-backend"))]
mod running {
    use std::process::{Child, Command, Stdio};
    use std::time::Instant;

    use jack::{Client, ClientOptions};

    use super::*;
    use crate::audio::error::{AudioError, AudioResult};

    /// How often the server is probed while starting
    const PROBE_INTERVAL: Duration = Duration::from_millis(200);

    /// Settle time after launching zita-a2j, before its ports are looked up
    const ZITA_SETTLE: Duration = Duration::from_millis(500);

    /// How long a child gets to exit after SIGTERM before it is killed
    const TERMINATE_GRACE: Duration = Duration::from_secs(3);

    /// Running jackd (and optional zita-a2j); both are stopped on drop
    pub struct JackServer {
        jackd: Option<Child>,
        zita: Option<Child>,
    }

    impl JackServer {
        /// Launch jackd, wait until it accepts clients, then launch the mic bridge
        pub fn start(
            config: &JackServerConfig,
            sample_rate: u32,
            period_frames: u32,
        ) -> AudioResult<Self> {
            let jackd = Command::new("jackd")
                .args(config.jackd_args(sample_rate, period_frames))
                .env("JACK_NO_AUDIO_RESERVATION", "1")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
                .map_err(|e| AudioError::Server(format!("Failed to launch jackd: {}", e)))?;
            log::info!(
                "jackd started (playback={}, {}Hz, period={})",
                config.playback_device,
                sample_rate,
                period_frames
            );

            let mut server = Self {
                jackd: Some(jackd),
                zita: None,
            };
            server.wait_until_ready(config.startup_timeout())?;

            if let Some(args) = config.zita_args(sample_rate, period_frames) {
                let zita = Command::new("zita-a2j")
                    .args(args)
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .spawn()
                    .map_err(|e| AudioError::Server(format!("Failed to launch zita-a2j: {}", e)))?;
                server.zita = Some(zita);
                log::info!(
                    "zita-a2j started (mic={})",
                    config.mic_device.as_deref().unwrap_or_default()
                );
                std::thread::sleep(ZITA_SETTLE);
            }

            Ok(server)
        }

        fn wait_until_ready(&mut self, timeout: Duration) -> AudioResult<()> {
            let deadline = Instant::now() + timeout;
            while Instant::now() < deadline {
                if let Some(jackd) = self.jackd.as_mut() {
                    if let Ok(Some(status)) = jackd.try_wait() {
                        return Err(AudioError::Server(format!("jackd exited early ({})", status)));
                    }
                }
                if let Ok((client, _)) = Client::new(PROBE_CLIENT_NAME, ClientOptions::NO_START_SERVER) {
                    drop(client);
                    log::info!("JACK server ready");
                    return Ok(());
                }
                std::thread::sleep(PROBE_INTERVAL);
            }
            Err(AudioError::Server(format!(
                "JACK server did not start within {:.1}s",
                timeout.as_secs_f32()
            )))
        }

        /// Stop the bridge, then the server
        pub fn shutdown(&mut self) {
            for (name, child) in [("zita-a2j", self.zita.take()), ("jackd", self.jackd.take())] {
                if let Some(child) = child {
                    terminate(name, child);
                }
            }
        }
    }

    impl Drop for JackServer {
        fn drop(&mut self) {
            self.shutdown();
        }
    }

    /// SIGTERM, wait up to the grace period, then SIGKILL
    fn terminate(name: &str, mut child: Child) {
        if let Ok(Some(_)) = child.try_wait() {
            return;
        }
        // SAFETY: plain kill(2) on a pid we spawned and have not yet reaped
        unsafe {
            libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
        }
        let deadline = Instant::now() + TERMINATE_GRACE;
        while Instant::now() < deadline {
            match child.try_wait() {
                Ok(Some(_)) => {
                    log::info!("{} stopped", name);
                    return;
                }
                Ok(None) => std::thread::sleep(Duration::from_millis(50)),
                Err(e) => {
                    log::warn!("Could not wait for {}: {}", name, e);
                    break;
                }
            }
        }
        log::warn!("{} did not exit after SIGTERM, killing", name);
        let _ = child.kill();
        let _ = child.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jackd_command_line() {
        let config = JackServerConfig {
            playback_device: "hw:1,0".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.jackd_args(48000, 256).join(" "),
            "-R -d alsa -P hw:1,0 -r 48000 -p 256 -n 2 -S"
        );
    }

    #[test]
    fn test_zita_command_line() {
        let mut config = JackServerConfig::default();
        assert!(config.zita_args(48000, 256).is_none());

        config.mic_device = Some("hw:2".to_string());
        assert_eq!(
            config.zita_args(48000, 128).unwrap().join(" "),
            "-d hw:2 -r 48000 -p 128"
        );
    }

    #[test]
    fn test_unbounded_startup_timeout() {
        let config: JackServerConfig = serde_yaml::from_str("startup_timeout_secs: .inf\n").unwrap();
        assert_eq!(config.startup_timeout(), Duration::from_secs(10));
        assert!(matches!(config.validate(), Err(ConfigError::JackServer(_))));

        let config = JackServerConfig {
            startup_timeout_secs: -1.0,
            ..Default::default()
        };
        assert_eq!(config.startup_timeout(), Duration::ZERO);
        assert!(config.validate().is_err());
        assert!(JackServerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_yaml_defaults() {
        let config: JackServerConfig = serde_yaml::from_str("playback_device: hw:USB\n").unwrap();
        assert_eq!(config.playback_device, "hw:USB");
        assert_eq!(config.periods_per_buffer, 2);
        assert_eq!(config.startup_timeout(), Duration::from_secs(10));
    }
}
