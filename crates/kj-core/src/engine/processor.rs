//! Per-period processing, owned by the audio thread
//!
//! ```text
//!  capture ──┬──► decimator ──► frame assembler ──► analysis queue
//!            │
//!            └──► gain ──► reverb ──┐
//!                                   ▼
//!  source lanes ──────────────► bus mixer ──► soft clip ──► playback
//! ```
//!
//! `process` runs without locks, allocation or I/O: control messages come in
//! through the command ring, the configuration through the snapshot cell, and
//! every buffer was sized to `MAX_PERIOD_FRAMES` in `new`.

use std::sync::{Arc, Mutex};

use basedrop::SharedCell;

use super::analysis::{AnalysisQueue, FrameAssembler};
use super::command::EngineCommand;
use super::master_clipper::MasterClipper;
use super::mixer::BusMixer;
use super::mode::{EngineMode, ModeSnapshot};
use super::stats::EngineStats;
use crate::config::ConfigError;
use crate::dsp::{Decimator, Reverb};
use crate::types::{StereoBuffer, StereoSample, MAX_PERIOD_FRAMES};

pub struct EngineProcessor {
    mode: Arc<SharedCell<ModeSnapshot>>,
    commands: rtrb::Consumer<EngineCommand>,
    mixer: BusMixer,
    reverb: Reverb,
    decimator: Decimator,
    assembler: FrameAssembler,
    clipper: MasterClipper,
    stats: Arc<EngineStats>,
    sample_rate: u32,
    analysis_rate: u32,
    applied_generation: u64,

    mic: Box<[f32]>,
    monitor_in: Box<[f32]>,
    monitor_out: Box<[f32]>,
    decimated: Box<[f32]>,
    bus: StereoBuffer,
}

/// Everything the processor needs at construction
pub struct ProcessorParts {
    pub mode: Arc<SharedCell<ModeSnapshot>>,
    pub commands: rtrb::Consumer<EngineCommand>,
    pub analysis: Arc<AnalysisQueue>,
    pub stats: Arc<EngineStats>,
    pub clipper: MasterClipper,
    pub max_sources: usize,
    pub duck_gain: f32,
}

impl EngineProcessor {
    pub fn new(parts: ProcessorParts) -> Result<Self, ConfigError> {
        let snapshot = parts.mode.get();
        let sample_rate = snapshot.config.sample_rate;
        let analysis_rate = parts.analysis.sample_rate();
        let decimator = Decimator::new(sample_rate, analysis_rate)?;
        let max = MAX_PERIOD_FRAMES as usize;

        Ok(Self {
            reverb: Reverb::new(sample_rate, snapshot.reverb),
            decimated: vec![0.0; Decimator::max_output_len(decimator.factor(), max)].into_boxed_slice(),
            decimator,
            assembler: FrameAssembler::new(parts.analysis),
            mixer: BusMixer::new(parts.max_sources, parts.duck_gain),
            clipper: parts.clipper,
            stats: parts.stats,
            commands: parts.commands,
            sample_rate,
            analysis_rate,
            applied_generation: snapshot.generation,
            mode: parts.mode,
            mic: vec![0.0; max].into_boxed_slice(),
            monitor_in: vec![0.0; max].into_boxed_slice(),
            monitor_out: vec![0.0; max].into_boxed_slice(),
            bus: StereoBuffer::with_capacity(max),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn active_sources(&self) -> usize {
        self.mixer.active_sources()
    }

    /// Match the DSP to the current snapshot before the transport starts (non-RT)
    ///
    /// Delay lines depend on the sample rate, so a rate change made while stopped
    /// rebuilds the reverb and decimator here rather than on the audio thread.
    pub fn prepare(&mut self) -> Result<(), ConfigError> {
        let snapshot = self.mode.get();
        let rate = snapshot.config.sample_rate;
        if rate != self.sample_rate {
            log::info!("Rebuilding DSP for {}Hz (was {}Hz)", rate, self.sample_rate);
            self.decimator = Decimator::new(rate, self.analysis_rate)?;
            self.reverb = Reverb::new(rate, snapshot.reverb);
            self.sample_rate = rate;
        } else {
            self.reverb.set_coefficients(snapshot.reverb);
            self.reverb.reset();
            self.decimator.reset();
        }
        self.assembler.reset();
        self.applied_generation = snapshot.generation;
        self.apply_commands();
        Ok(())
    }

    /// Apply queued install/remove messages
    ///
    /// Replaced lanes are dropped here; `Owned` defers their deallocation.
    pub fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            match command {
                EngineCommand::InstallSource { slot, lane } => {
                    drop(self.mixer.install(slot, lane));
                }
                EngineCommand::RemoveSource { slot } => {
                    drop(self.mixer.remove(slot));
                }
            }
        }
    }

    /// Run one period
    ///
    /// `capture` is the period's mono mic input; `None` means the transport
    /// missed it, which is counted as an underrun and treated as silence. A
    /// shorter slice is padded with silence. Returns the `n_frames` bus frames.
    pub fn process(&mut self, n_frames: usize, capture: Option<&[f32]>) -> &[StereoSample] {
        let n = n_frames.min(MAX_PERIOD_FRAMES as usize);

        self.apply_commands();

        let snapshot = self.mode.get();
        if snapshot.generation != self.applied_generation {
            if *self.reverb.coefficients() != snapshot.reverb {
                self.reverb.set_coefficients(snapshot.reverb);
            }
            self.applied_generation = snapshot.generation;
        }

        // Capture
        let mic = &mut self.mic[..n];
        match capture {
            Some(input) => {
                let len = input.len().min(n);
                mic[..len].copy_from_slice(&input[..len]);
                mic[len..].fill(0.0);
            }
            None => {
                self.stats.record_underrun();
                mic.fill(0.0);
            }
        }
        let peak = mic.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        self.stats.record_peak(peak);

        // Analysis path: raw mic, independent of monitor mode
        let produced = self.decimator.process(mic, &mut self.decimated);
        let dropped = self.assembler.push(&self.decimated[..produced]);
        self.stats.record_analysis_drops(dropped);

        // Monitor path
        let monitor_in = &mut self.monitor_in[..n];
        match snapshot.state {
            EngineMode::SoftwareMonitor => {
                let gain = snapshot.monitor_gain();
                for (dst, src) in monitor_in.iter_mut().zip(mic.iter()) {
                    *dst = *src * gain;
                }
            }
            // The reverb still runs on silence so an old tail decays instead of resuming later
            EngineMode::HardwareMonitor | EngineMode::MutedForSpeech => monitor_in.fill(0.0),
        }
        let monitor_out = &mut self.monitor_out[..n];
        self.reverb
            .process(monitor_in, monitor_out, snapshot.config.reverb_wet);

        self.bus.set_len_from_capacity(n);
        let bus = self.bus.as_mut_slice();
        if snapshot.state.monitors_mic() {
            for (dst, &m) in bus.iter_mut().zip(monitor_out.iter()) {
                *dst = StereoSample::mono(m);
            }
        } else {
            bus.fill(StereoSample::silence());
        }

        // Sources, then clip
        self.mixer.mix(bus);
        self.clipper.process(bus);

        self.stats.record_period();
        self.bus.as_slice()
    }
}

/// Where a processor waits while no transport is running
pub type ProcessorHome = Arc<Mutex<Option<EngineProcessor>>>;

/// Transport-side ownership of the processor
///
/// Moved into the real-time callback when a transport starts. When the transport
/// is torn down the callback (and this slot) is dropped off the audio thread,
/// and the processor goes back to its home so a later `start` keeps every
/// installed source.
pub struct ProcessorSlot {
    processor: Option<EngineProcessor>,
    home: ProcessorHome,
}

impl ProcessorSlot {
    pub fn new(processor: EngineProcessor, home: ProcessorHome) -> Self {
        Self {
            processor: Some(processor),
            home,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.processor.as_ref().map_or(0, EngineProcessor::sample_rate)
    }

    #[inline]
    pub fn process(&mut self, n_frames: usize, capture: Option<&[f32]>) -> &[StereoSample] {
        match self.processor.as_mut() {
            Some(processor) => processor.process(n_frames, capture),
            None => &[],
        }
    }
}

impl Drop for ProcessorSlot {
    fn drop(&mut self) {
        if let Some(processor) = self.processor.take() {
            let mut home = self.home.lock().unwrap_or_else(|e| e.into_inner());
            *home = Some(processor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModeConfig, MonitorMode};
    use crate::engine::command::{command_channel, command_capacity};
    use crate::engine::gc::gc_handle;
    use crate::engine::mode::ModeController;
    use crate::engine::source::{SourcePriority, SourceRegistry};
    use crate::types::AudioBlock;
    use basedrop::Owned;

    struct Rig {
        mode: ModeController,
        processor: EngineProcessor,
        commands: rtrb::Producer<EngineCommand>,
        registry: SourceRegistry,
        analysis: Arc<AnalysisQueue>,
        stats: Arc<EngineStats>,
    }

    fn rig(config: ModeConfig) -> Rig {
        let mode = ModeController::new(config, 16000).unwrap();
        let (commands, rx) = command_channel(command_capacity(4));
        let analysis = Arc::new(AnalysisQueue::new(1280, 8, 16000));
        let clipper = MasterClipper::new();
        let stats = Arc::new(EngineStats::new(clipper.clip_indicator()));
        let processor = EngineProcessor::new(ProcessorParts {
            mode: mode.reader(),
            commands: rx,
            analysis: Arc::clone(&analysis),
            stats: Arc::clone(&stats),
            clipper,
            max_sources: 4,
            duck_gain: 0.3,
        })
        .unwrap();
        Rig {
            mode,
            processor,
            commands,
            registry: SourceRegistry::new(4),
            analysis,
            stats,
        }
    }

    fn sine(n: usize, amp: f32) -> Vec<f32> {
        (0..n)
            .map(|i| amp * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 48000.0).sin())
            .collect()
    }

    #[test]
    fn test_hardware_mode_adds_no_mic() {
        let mut rig = rig(ModeConfig::default());
        let input = sine(128, 0.8);
        for _ in 0..10 {
            let out = rig.processor.process(128, Some(&input));
            assert!(out.iter().all(|s| s.left.to_bits() == 0 && s.right.to_bits() == 0));
        }
    }

    #[test]
    fn test_software_dry_is_gain_times_input() {
        let mut rig = rig(ModeConfig::software(1.5, 0.0));
        let input = sine(128, 0.4);
        let out = rig.processor.process(128, Some(&input));
        for (o, i) in out.iter().zip(&input) {
            assert_eq!(o.left, i * 1.5);
            assert_eq!(o.right, i * 1.5);
        }
    }

    #[test]
    fn test_software_fully_wet_has_no_dry_signal() {
        let mut rig = rig(ModeConfig::software(1.0, 1.0));
        let mut impulse = vec![0.0f32; 128];
        impulse[0] = 0.5;
        // Shortest comb is ~29.7ms, far beyond one 128-frame period
        let out = rig.processor.process(128, Some(&impulse));
        assert!(out.iter().all(|s| s.left == 0.0));
    }

    #[test]
    fn test_muted_mode_silences_mic_but_keeps_analysis() {
        let mut config = ModeConfig::software(1.0, 0.3);
        config.muted_for_speech = true;
        let mut rig = rig(config);
        let input = sine(128, 0.5);
        for _ in 0..40 {
            let out = rig.processor.process(128, Some(&input));
            assert!(out.iter().all(|s| *s == StereoSample::silence()));
        }
        // 40 periods of 128 at 48kHz = 1706 samples at 16kHz -> one 1280 frame
        let frame = rig.analysis.poll().unwrap();
        assert_eq!(frame.len(), 1280);
        assert_eq!(frame.sample_rate(), 16000);
    }

    #[test]
    fn test_missing_capture_counts_underrun() {
        let mut rig = rig(ModeConfig::software(1.0, 0.0));
        let out = rig.processor.process(64, None);
        assert!(out.iter().all(|s| *s == StereoSample::silence()));
        let stats = rig.stats.take_snapshot();
        assert_eq!(stats.underrun_count, 1);
        assert_eq!(stats.periods_processed, 1);
    }

    #[test]
    fn test_snapshot_change_applies_next_period() {
        let mut rig = rig(ModeConfig::default());
        let input = vec![0.25f32; 64];
        assert_eq!(rig.processor.process(64, Some(&input))[10].left, 0.0);

        rig.mode.configure(ModeConfig::software(2.0, 0.0), true).unwrap();
        assert_eq!(rig.processor.process(64, Some(&input))[10].left, 0.5);

        rig.mode.set_muted_for_speech(true);
        assert_eq!(rig.processor.process(64, Some(&input))[10].left, 0.0);

        rig.mode.set_muted_for_speech(false);
        assert_eq!(rig.processor.process(64, Some(&input))[10].left, 0.5);
        assert_eq!(rig.mode.config().monitor_mode, MonitorMode::Software);
    }

    #[test]
    fn test_installed_source_reaches_bus() {
        let mut rig = rig(ModeConfig::default());
        let (handle, lane) = rig.registry.register("track", SourcePriority::Normal, 1024).unwrap();
        assert!(rig
            .commands
            .push(EngineCommand::InstallSource {
                slot: handle.slot(),
                lane: Owned::new(&gc_handle(), lane),
            })
            .is_ok());
        rig.registry
            .push(handle, &AudioBlock::mono(vec![0.2; 64], 48000, 0).unwrap())
            .unwrap();

        let out = rig.processor.process(64, Some(&[0.0; 64]));
        assert!(out.iter().all(|s| *s == StereoSample::mono(0.2)));
        assert_eq!(rig.processor.active_sources(), 1);

        assert!(rig.commands.push(EngineCommand::RemoveSource { slot: handle.slot() }).is_ok());
        rig.processor.process(64, Some(&[0.0; 64]));
        assert_eq!(rig.processor.active_sources(), 0);
    }

    #[test]
    fn test_peak_tracks_capture() {
        let mut rig = rig(ModeConfig::default());
        let mut input = vec![0.1f32; 64];
        input[7] = -0.6;
        rig.processor.process(64, Some(&input));
        assert_eq!(rig.stats.take_snapshot().peak_input_level, 0.6);
    }

    #[test]
    fn test_dropped_slot_returns_processor_home() {
        let rig = rig(ModeConfig::default());
        let home: ProcessorHome = Arc::new(Mutex::new(None));
        let mut slot = ProcessorSlot::new(rig.processor, Arc::clone(&home));
        assert_eq!(slot.process(32, Some(&[0.0; 32])).len(), 32);
        assert!(home.lock().unwrap().is_none());

        drop(slot);
        assert!(home.lock().unwrap().is_some());
    }

    #[test]
    fn test_prepare_rebuilds_for_new_rate() {
        let mut rig = rig(ModeConfig::default());
        rig.mode
            .configure(ModeConfig::default().with_sample_rate(96000), false)
            .unwrap();
        rig.processor.prepare().unwrap();
        assert_eq!(rig.processor.sample_rate(), 96000);
    }
}
