//! Monitor mode state machine and snapshot publication
//!
//! ```text
//!            configure(software)
//!   HARDWARE ───────────────────► SOFTWARE
//!      ▲  ◄─────────────────────    │
//!      │     configure(hardware)    │
//!      │                            │
//!      └──── MUTED_FOR_SPEECH ◄─────┘
//!        set_muted_for_speech(true/false)
//! ```
//!
//! The state is derived from the configuration: `muted_for_speech` wins, otherwise
//! `monitor_mode` decides. Muting only flips the flag, so unmuting restores the
//! previous mode with exactly the same gain and wet ratio.
//!
//! Speech sessions are counted. The first one to begin mutes the mic and the
//! last one to end restores whatever muted state was requested in between, so
//! overlapping sessions can finish in any order. While any session is active an
//! unmute from `configure` or `set_muted_for_speech` only changes that restore
//! target.
//!
//! Every change builds a new immutable [`ModeSnapshot`] and swaps it into a
//! `basedrop::SharedCell`. The audio thread's `get()` never waits on the writer;
//! a superseded snapshot is freed by the GC thread.

use std::fmt;
use std::sync::Arc;

use basedrop::{Shared, SharedCell};

use super::gc::gc_handle;
use crate::config::{ConfigError, ModeConfig, MonitorMode};
use crate::dsp::ReverbCoefficients;

/// Which paths are live in the current period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    /// The interface monitors the mic; the engine's monitor path is silent
    HardwareMonitor,
    /// Mic goes through gain and reverb into the bus
    SoftwareMonitor,
    /// TTS is speaking; the mic is kept off the bus so it cannot be re-captured
    MutedForSpeech,
}

impl EngineMode {
    pub fn from_config(config: &ModeConfig) -> Self {
        if config.muted_for_speech {
            EngineMode::MutedForSpeech
        } else {
            match config.monitor_mode {
                MonitorMode::Hardware => EngineMode::HardwareMonitor,
                MonitorMode::Software => EngineMode::SoftwareMonitor,
            }
        }
    }

    /// True if the mic reaches the bus
    #[inline]
    pub fn monitors_mic(&self) -> bool {
        matches!(self, EngineMode::SoftwareMonitor)
    }
}

impl fmt::Display for EngineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineMode::HardwareMonitor => "HARDWARE_MONITOR",
            EngineMode::SoftwareMonitor => "SOFTWARE_MONITOR",
            EngineMode::MutedForSpeech => "MUTED_FOR_SPEECH",
        };
        f.write_str(name)
    }
}

/// Immutable view of the configuration for one or more periods
#[derive(Debug, Clone, PartialEq)]
pub struct ModeSnapshot {
    pub config: ModeConfig,
    pub state: EngineMode,
    /// Increases with every publication
    pub generation: u64,
    pub reverb: ReverbCoefficients,
}

impl ModeSnapshot {
    /// Gain applied to the mic in this snapshot (unity unless software monitoring)
    #[inline]
    pub fn monitor_gain(&self) -> f32 {
        if self.state.monitors_mic() {
            self.config.mic_gain
        } else {
            1.0
        }
    }
}

/// Single writer for the mode snapshot
pub struct ModeController {
    cell: Arc<SharedCell<ModeSnapshot>>,
    current: ModeConfig,
    reverb: ReverbCoefficients,
    generation: u64,
    analysis_rate: u32,
    /// Active speech sessions
    speakers: usize,
    /// Muted flag to publish when the last speaker ends
    restore_muted: bool,
}

impl ModeController {
    pub fn new(config: ModeConfig, analysis_rate: u32) -> Result<Self, ConfigError> {
        let reverb = config.validate(analysis_rate)?;
        let snapshot = ModeSnapshot {
            state: EngineMode::from_config(&config),
            config: config.clone(),
            generation: 1,
            reverb,
        };
        let cell = Arc::new(SharedCell::new(Shared::new(&gc_handle(), snapshot)));
        log::info!("Monitor mode initialised as {}", EngineMode::from_config(&config));
        Ok(Self {
            cell,
            current: config,
            reverb,
            generation: 1,
            analysis_rate,
            speakers: 0,
            restore_muted: false,
        })
    }

    /// Cell the audio thread reads from
    pub fn reader(&self) -> Arc<SharedCell<ModeSnapshot>> {
        Arc::clone(&self.cell)
    }

    pub fn config(&self) -> &ModeConfig {
        &self.current
    }

    pub fn state(&self) -> EngineMode {
        EngineMode::from_config(&self.current)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn speakers(&self) -> usize {
        self.speakers
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> Shared<ModeSnapshot> {
        self.cell.get()
    }

    /// Validate and publish a whole new configuration
    ///
    /// With `running` set, changes that need the transport reopened are refused.
    pub fn configure(&mut self, mut config: ModeConfig, running: bool) -> Result<EngineMode, ConfigError> {
        let reverb = config.validate(self.analysis_rate)?;
        if running {
            if let Some(what) = self.current.transport_differs(&config) {
                return Err(ConfigError::RequiresRestart(what));
            }
        }
        if self.speakers > 0 {
            self.restore_muted = config.muted_for_speech;
            config.muted_for_speech = true;
        }
        self.publish(config, reverb);
        Ok(self.state())
    }

    /// Enter or leave `MUTED_FOR_SPEECH`, keeping every other setting
    pub fn set_muted_for_speech(&mut self, muted: bool) -> EngineMode {
        if self.speakers > 0 {
            self.restore_muted = muted;
            return self.state();
        }
        self.publish_muted(muted)
    }

    /// A speech session starts; the first one mutes the mic
    pub fn begin_speech(&mut self) -> EngineMode {
        self.speakers += 1;
        if self.speakers == 1 {
            self.restore_muted = self.current.muted_for_speech;
            return self.publish_muted(true);
        }
        self.state()
    }

    /// A speech session ends; the last one restores the muted state
    pub fn end_speech(&mut self) -> EngineMode {
        match self.speakers {
            0 => self.state(),
            1 => {
                self.speakers = 0;
                self.publish_muted(self.restore_muted)
            }
            _ => {
                self.speakers -= 1;
                self.state()
            }
        }
    }

    fn publish_muted(&mut self, muted: bool) -> EngineMode {
        if self.current.muted_for_speech == muted {
            return self.state();
        }
        let mut config = self.current.clone();
        config.muted_for_speech = muted;
        self.publish(config, self.reverb);
        self.state()
    }

    fn publish(&mut self, config: ModeConfig, reverb: ReverbCoefficients) {
        let previous = self.state();
        let next = EngineMode::from_config(&config);

        self.generation += 1;
        let snapshot = ModeSnapshot {
            config: config.clone(),
            state: next,
            generation: self.generation,
            reverb,
        };
        self.cell.set(Shared::new(&gc_handle(), snapshot));
        self.current = config;
        self.reverb = reverb;

        if previous != next {
            log::info!("Monitor mode {} -> {}", previous, next);
        } else {
            log::debug!("Mode snapshot {} published ({})", self.generation, next);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> ModeController {
        ModeController::new(ModeConfig::default(), 16000).unwrap()
    }

    #[test]
    fn test_state_is_derived_from_config() {
        let mut config = ModeConfig::software(1.0, 0.3);
        assert_eq!(EngineMode::from_config(&config), EngineMode::SoftwareMonitor);
        config.muted_for_speech = true;
        assert_eq!(EngineMode::from_config(&config), EngineMode::MutedForSpeech);
        assert_eq!(EngineMode::from_config(&ModeConfig::default()), EngineMode::HardwareMonitor);
    }

    #[test]
    fn test_snapshot_matches_configure() {
        let mut mode = controller();
        let reader = mode.reader();

        let requested = ModeConfig::software(1.7, 0.65);
        assert_eq!(mode.configure(requested.clone(), true).unwrap(), EngineMode::SoftwareMonitor);

        let seen = reader.get();
        assert_eq!(seen.config, requested);
        assert_eq!(seen.state, EngineMode::SoftwareMonitor);
        assert_eq!(seen.generation, mode.generation());
        assert_eq!(seen.monitor_gain(), 1.7);
    }

    #[test]
    fn test_mute_roundtrip_restores_mode() {
        let mut mode = controller();
        mode.configure(ModeConfig::software(2.5, 0.4), false).unwrap();
        let before = mode.snapshot();

        assert_eq!(mode.set_muted_for_speech(true), EngineMode::MutedForSpeech);
        let muted = mode.snapshot();
        assert_eq!(muted.state, EngineMode::MutedForSpeech);
        assert_eq!(muted.monitor_gain(), 1.0);

        assert_eq!(mode.set_muted_for_speech(false), EngineMode::SoftwareMonitor);
        let after = mode.snapshot();
        assert_eq!(after.config, before.config);
        assert_eq!(after.reverb, before.reverb);
        assert!(after.generation > before.generation);
    }

    #[test]
    fn test_repeated_mute_does_not_republish() {
        let mut mode = controller();
        mode.set_muted_for_speech(true);
        let generation = mode.generation();
        mode.set_muted_for_speech(true);
        assert_eq!(mode.generation(), generation);
    }

    #[test]
    fn test_overlapping_speakers_end_in_any_order() {
        let mut mode = controller();
        mode.configure(ModeConfig::software(1.2, 0.3), false).unwrap();

        assert_eq!(mode.begin_speech(), EngineMode::MutedForSpeech);
        assert_eq!(mode.begin_speech(), EngineMode::MutedForSpeech);
        // First session finishes while the second is still talking
        assert_eq!(mode.end_speech(), EngineMode::MutedForSpeech);
        assert_eq!(mode.snapshot().state, EngineMode::MutedForSpeech);
        assert_eq!(mode.end_speech(), EngineMode::SoftwareMonitor);
        assert_eq!(mode.speakers(), 0);
        // Unbalanced end is ignored
        assert_eq!(mode.end_speech(), EngineMode::SoftwareMonitor);
    }

    #[test]
    fn test_unmute_during_speech_waits_for_last_speaker() {
        let mut mode = controller();
        mode.set_muted_for_speech(true);
        mode.begin_speech();

        assert_eq!(mode.set_muted_for_speech(false), EngineMode::MutedForSpeech);
        assert_eq!(
            mode.configure(ModeConfig::software(1.0, 0.5), false).unwrap(),
            EngineMode::MutedForSpeech
        );
        assert!(mode.snapshot().config.muted_for_speech);

        assert_eq!(mode.end_speech(), EngineMode::SoftwareMonitor);
        assert_eq!(mode.config().reverb_wet, 0.5);
    }

    #[test]
    fn test_invalid_config_keeps_previous_snapshot() {
        let mut mode = controller();
        let before = mode.snapshot();
        assert!(mode.configure(ModeConfig::software(1.0, 2.0), false).is_err());
        assert_eq!(*mode.snapshot(), *before);
    }

    #[test]
    fn test_transport_changes_need_restart_while_running() {
        let mut mode = controller();
        let err = mode
            .configure(ModeConfig::default().with_period(128), true)
            .unwrap_err();
        assert_eq!(err, ConfigError::RequiresRestart("period size"));
        assert!(mode.configure(ModeConfig::default().with_period(128), false).is_ok());
        assert_eq!(mode.config().period_frames, 128);
    }
}
