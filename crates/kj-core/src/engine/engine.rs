//! The engine root: lifecycle and the public API
//!
//! ```text
//!            open ──► Stopped ◄──────┐
//!                       │  start     │ stop
//!                       ▼            │
//!                    Running ────────┘
//!                       │ close (from either state)
//!                       ▼
//!                     Closed
//! ```
//!
//! `Engine` is `Send + Sync` and meant to be shared (usually in an `Arc`) by the
//! TTS producer, the backing-track player, the wake-word consumer and the
//! control surface. Each of those touches a different part of it:
//!
//! - **Sources** (`register_source`, `push`, `unregister`): the registry lock,
//!   then a lock-free ring per source
//! - **Mode** (`configure`, `set_muted_for_speech`): the control lock, then a
//!   snapshot swap the audio thread picks up on its next period
//! - **Analysis** (`poll_analysis`): lock-free queue, never blocks
//! - **Stats**: relaxed atomics
//!
//! Lock order is sources → control → parked processor.
//! The audio thread never takes either lock.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use basedrop::Owned;

use super::analysis::{AnalysisFrame, AnalysisQueue};
use super::command::{command_capacity, command_channel, EngineCommand};
use super::error::{EngineError, EngineResult};
use super::gc::gc_handle;
use super::master_clipper::MasterClipper;
use super::mode::{EngineMode, ModeController};
use super::processor::{EngineProcessor, ProcessorHome, ProcessorParts, ProcessorSlot};
use super::source::{SourceHandle, SourcePriority, SourceRegistry, MAX_SOURCE_GAIN};
use super::stats::{EngineStats, StatsSnapshot};
use crate::audio::{
    find_device, start_transport, Backend, DeviceId, Direction, JackServerConfig, TransportConfig,
    TransportHandle, VirtualTransport,
};
use crate::config::{ConfigError, EngineLimits, EngineSettings, ModeConfig};
use crate::types::{AudioBlock, BlockError, StereoSample};

/// Where the engine is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Stopped,
    Running,
    Closed,
}

impl EngineState {
    pub fn label(&self) -> &'static str {
        match self {
            EngineState::Stopped => "stopped",
            EngineState::Running => "running",
            EngineState::Closed => "closed",
        }
    }
}

/// Registry and the API end of the command ring, locked together so commands
/// are queued in registration order
struct SourceSide {
    registry: SourceRegistry,
    commands: rtrb::Producer<EngineCommand>,
}

struct ControlSide {
    state: EngineState,
    mode: ModeController,
    backend: Backend,
    jack_server: Option<JackServerConfig>,
    transport: Option<TransportHandle>,
}

/// Live-monitor audio engine
pub struct Engine {
    sources: Mutex<SourceSide>,
    control: Mutex<ControlSide>,
    /// The processor while no transport owns it
    parked: ProcessorHome,
    analysis: Arc<AnalysisQueue>,
    stats: Arc<EngineStats>,
    limits: EngineLimits,
    /// Mirrors the mode config so `push` doesn't need the control lock
    sample_rate: AtomicU32,
    period_frames: AtomicU32,
}

impl Engine {
    /// Validate the settings and build every buffer the audio thread will use
    ///
    /// No device is opened until [`Engine::start`].
    pub fn open(settings: EngineSettings) -> EngineResult<Self> {
        settings.validate()?;
        let limits = settings.limits.clone();

        let mode = ModeController::new(settings.mode.clone(), limits.analysis_rate)?;
        let analysis = Arc::new(AnalysisQueue::new(
            limits.analysis_frame_len,
            limits.analysis_queue_frames,
            limits.analysis_rate,
        ));
        let clipper = MasterClipper::new();
        let stats = Arc::new(EngineStats::new(clipper.clip_indicator()));
        let (commands, command_rx) = command_channel(command_capacity(limits.max_sources));

        let processor = EngineProcessor::new(ProcessorParts {
            mode: mode.reader(),
            commands: command_rx,
            analysis: Arc::clone(&analysis),
            stats: Arc::clone(&stats),
            clipper,
            max_sources: limits.max_sources,
            duck_gain: limits.duck_gain,
        })?;

        log::info!(
            "Engine opened: {} backend, {}Hz, {} frames/period, up to {} sources",
            settings.backend,
            settings.mode.sample_rate,
            settings.mode.period_frames,
            limits.max_sources
        );

        Ok(Self {
            sources: Mutex::new(SourceSide {
                registry: SourceRegistry::new(limits.max_sources),
                commands,
            }),
            control: Mutex::new(ControlSide {
                state: EngineState::Stopped,
                mode,
                backend: settings.backend,
                jack_server: settings.jack_server,
                transport: None,
            }),
            parked: Arc::new(Mutex::new(Some(processor))),
            analysis,
            stats,
            sample_rate: AtomicU32::new(settings.mode.sample_rate),
            period_frames: AtomicU32::new(settings.mode.period_frames),
            limits,
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Open the configured devices and start processing
    pub fn start(&self) -> EngineResult<()> {
        let mut control = self.lock_control();
        let backend = control.backend;
        self.start_locked(&mut control, backend)
    }

    /// Start with the in-process transport and return its driver
    ///
    /// Each `run_period` call on the returned handle is one audio callback.
    pub fn start_virtual(&self) -> EngineResult<VirtualTransport> {
        let mut control = self.lock_control();
        self.start_locked(&mut control, Backend::Virtual)?;
        control
            .transport
            .as_ref()
            .and_then(TransportHandle::as_virtual)
            .cloned()
            .ok_or(EngineError::Lifecycle {
                operation: "start_virtual",
                state: "stopped",
            })
    }

    fn start_locked(&self, control: &mut ControlSide, backend: Backend) -> EngineResult<()> {
        match control.state {
            EngineState::Stopped => {}
            state => {
                return Err(EngineError::Lifecycle {
                    operation: "start",
                    state: state.label(),
                })
            }
        }

        let mut processor = self.lock_parked().take().ok_or(EngineError::Lifecycle {
            operation: "start",
            state: "still stopping",
        })?;
        if let Err(e) = processor.prepare() {
            *self.lock_parked() = Some(processor);
            return Err(e.into());
        }

        let config = TransportConfig::from_mode(backend, control.mode.config())
            .with_jack_server(control.jack_server.clone());
        let slot = ProcessorSlot::new(processor, Arc::clone(&self.parked));

        // On failure the slot has already sent the processor home
        let transport = start_transport(&config, slot, Arc::clone(&self.stats))?;
        log::info!(
            "Engine started: {} transport, {}Hz, {} frames ({:.1}ms), mode {}",
            transport.backend(),
            transport.sample_rate(),
            transport.period_frames(),
            transport.latency_ms(),
            control.mode.state()
        );
        control.transport = Some(transport);
        control.state = EngineState::Running;
        Ok(())
    }

    /// Stop the transport; sources and their queued audio are kept
    ///
    /// Stopping a stopped engine does nothing.
    pub fn stop(&self) -> EngineResult<()> {
        let mut control = self.lock_control();
        match control.state {
            EngineState::Running => {
                Self::stop_locked(&mut control);
                if self.lock_parked().is_none() {
                    log::error!("Transport stopped without returning the processor");
                }
                Ok(())
            }
            EngineState::Stopped => Ok(()),
            EngineState::Closed => Err(EngineError::Lifecycle {
                operation: "stop",
                state: "closed",
            }),
        }
    }

    fn stop_locked(control: &mut ControlSide) {
        if let Some(transport) = control.transport.take() {
            let backend = transport.backend();
            transport.stop();
            log::info!("Engine stopped ({} transport)", backend);
        }
        control.state = EngineState::Stopped;
    }

    /// Stop if running and refuse everything except `stats` and `poll_analysis`
    pub fn close(&self) {
        let mut control = self.lock_control();
        if control.state == EngineState::Closed {
            return;
        }
        Self::stop_locked(&mut control);
        control.state = EngineState::Closed;
        log::info!("Engine closed");
    }

    pub fn state(&self) -> EngineState {
        self.lock_control().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    // ─────────────────────────────────────────────────────────────────────
    // Mode
    // ─────────────────────────────────────────────────────────────────────

    /// Validate and apply a new configuration
    ///
    /// While running, sample rate, period and device changes are refused with
    /// `RequiresRestart`. The period cannot grow while sources are registered,
    /// since their queues were sized for the old one. Everything else takes
    /// effect on the next period.
    pub fn configure(&self, config: ModeConfig) -> EngineResult<EngineMode> {
        // Held so no source registers against the old period mid-change
        let sources = self.lock_sources();
        let mut control = self.lock_control();
        let running = match control.state {
            EngineState::Closed => {
                return Err(EngineError::Lifecycle {
                    operation: "configure",
                    state: "closed",
                })
            }
            state => state == EngineState::Running,
        };

        if control.backend == Backend::Cpal {
            let current = control.mode.config();
            if config.capture_device != current.capture_device {
                check_device(config.capture_device.as_ref(), Direction::Input)?;
            }
            if config.playback_device != current.playback_device {
                check_device(config.playback_device.as_ref(), Direction::Output)?;
            }
        }

        if !sources.registry.is_empty() && config.period_frames > control.mode.config().period_frames {
            return Err(ConfigError::PeriodGrowth {
                frames: config.period_frames,
                sources: sources.registry.len(),
            }
            .into());
        }

        let sample_rate = config.sample_rate;
        let period_frames = config.period_frames;
        let mode = control.mode.configure(config, running)?;
        self.sample_rate.store(sample_rate, Ordering::Release);
        self.period_frames.store(period_frames, Ordering::Release);
        Ok(mode)
    }

    /// Enter or leave `MutedForSpeech`; leaving restores the previous monitor mode
    pub fn set_muted_for_speech(&self, muted: bool) -> EngineResult<EngineMode> {
        let mut control = self.lock_control();
        if control.state == EngineState::Closed {
            return Err(EngineError::Lifecycle {
                operation: "set_muted_for_speech",
                state: "closed",
            });
        }
        Ok(control.mode.set_muted_for_speech(muted))
    }

    /// Count a speaker in; the first one mutes the mic
    ///
    /// Every call must be paired with [`Engine::end_speech`]. Sessions may end
    /// in any order; the mic only comes back when the last one ends.
    pub fn begin_speech(&self) -> EngineResult<EngineMode> {
        let mut control = self.lock_control();
        if control.state == EngineState::Closed {
            return Err(EngineError::Lifecycle {
                operation: "begin_speech",
                state: "closed",
            });
        }
        Ok(control.mode.begin_speech())
    }

    /// Count a speaker out; the last one restores the monitor mode
    pub fn end_speech(&self) -> EngineMode {
        self.lock_control().mode.end_speech()
    }

    pub fn mode(&self) -> EngineMode {
        self.lock_control().mode.state()
    }

    /// The configuration currently published to the audio thread
    pub fn config(&self) -> ModeConfig {
        self.lock_control().mode.config().clone()
    }

    /// Current settings, including run-time configuration changes
    pub fn settings(&self) -> EngineSettings {
        let control = self.lock_control();
        EngineSettings {
            mode: control.mode.config().clone(),
            limits: self.limits.clone(),
            backend: control.backend,
            jack_server: control.jack_server.clone(),
        }
    }

    pub fn limits(&self) -> &EngineLimits {
        &self.limits
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Acquire)
    }

    pub fn period_frames(&self) -> u32 {
        self.period_frames.load(Ordering::Acquire)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Sources
    // ─────────────────────────────────────────────────────────────────────

    /// Claim a source slot
    ///
    /// The source's queue holds `source_queue_blocks` periods at the current
    /// period size. It starts being mixed on the next period.
    pub fn register_source(&self, id: &str, priority: SourcePriority) -> EngineResult<SourceHandle> {
        self.ensure_open("register_source")?;
        let mut sources = self.lock_sources();
        let capacity = self.limits.source_queue_blocks * self.period_frames() as usize;

        if sources.commands.is_full() {
            return Err(EngineError::CommandQueueFull);
        }
        let (handle, lane) = sources.registry.register(id, priority, capacity)?;
        let lane = Owned::new(&gc_handle(), lane);
        if sources
            .commands
            .push(EngineCommand::InstallSource {
                slot: handle.slot(),
                lane,
            })
            .is_err()
        {
            let _ = sources.registry.unregister(handle);
            return Err(EngineError::CommandQueueFull);
        }
        self.drain_if_parked();

        log::info!(
            "Registered source '{}' as {} ({:?} priority, {} frame queue)",
            id,
            handle,
            priority,
            capacity
        );
        Ok(handle)
    }

    /// Remove a source; whatever it still had queued is discarded
    pub fn unregister(&self, handle: SourceHandle) -> EngineResult<()> {
        let mut sources = self.lock_sources();
        sources.registry.name(handle)?;
        if sources.commands.is_full() {
            return Err(EngineError::CommandQueueFull);
        }
        let name = sources.registry.unregister(handle)?;
        if sources
            .commands
            .push(EngineCommand::RemoveSource {
                slot: handle.slot(),
            })
            .is_err()
        {
            // Not reachable: one slot was free above and the lock is held
            log::error!("Command queue filled while removing {}", handle);
        }
        self.drain_if_parked();

        log::info!("Unregistered source '{}' ({})", name, handle);
        Ok(())
    }

    /// Queue one block for a source, all or nothing
    ///
    /// Fails with `Backpressure` when the whole block does not fit; the queue is
    /// left as it was and the caller may retry later.
    pub fn push(&self, handle: SourceHandle, block: &AudioBlock) -> EngineResult<()> {
        let engine_rate = self.sample_rate();
        if block.sample_rate() != engine_rate {
            return Err(BlockError::RateMismatch {
                block: block.sample_rate(),
                engine: engine_rate,
            }
            .into());
        }
        self.lock_sources().registry.push(handle, block)
    }

    /// Queue stereo frames already at the engine rate
    pub fn push_frames(&self, handle: SourceHandle, frames: &[StereoSample]) -> EngineResult<()> {
        self.lock_sources().registry.push_frames(handle, frames)
    }

    /// Frames still waiting to be mixed for this source
    pub fn queued_frames(&self, handle: SourceHandle) -> EngineResult<usize> {
        self.lock_sources().registry.queued_frames(handle)
    }

    /// Queue capacity of this source in frames
    pub fn source_capacity(&self, handle: SourceHandle) -> EngineResult<usize> {
        self.lock_sources().registry.capacity(handle)
    }

    /// Linear gain for a source, ramped over the next period
    pub fn set_source_gain(&self, handle: SourceHandle, gain: f32) -> EngineResult<()> {
        if !gain.is_finite() || !(0.0..=MAX_SOURCE_GAIN).contains(&gain) {
            return Err(ConfigError::SourceGain(gain).into());
        }
        let sources = self.lock_sources();
        sources.registry.control(handle)?.set_gain(gain);
        Ok(())
    }

    pub fn set_source_muted(&self, handle: SourceHandle, muted: bool) -> EngineResult<()> {
        let sources = self.lock_sources();
        sources.registry.control(handle)?.set_muted(muted);
        Ok(())
    }

    pub fn source_count(&self) -> usize {
        self.lock_sources().registry.len()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Analysis and stats
    // ─────────────────────────────────────────────────────────────────────

    /// Next analysis frame, oldest first; never blocks
    pub fn poll_analysis(&self) -> Option<AnalysisFrame> {
        self.analysis.poll()
    }

    /// Frames waiting to be polled
    pub fn pending_analysis(&self) -> usize {
        self.analysis.len()
    }

    pub fn analysis_sample_rate(&self) -> u32 {
        self.analysis.sample_rate()
    }

    pub fn analysis_frame_len(&self) -> usize {
        self.analysis.frame_len()
    }

    /// Counters since `open`; the input peak and clip flag reset on every call
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.take_snapshot()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────

    fn ensure_open(&self, operation: &'static str) -> EngineResult<()> {
        if self.lock_control().state == EngineState::Closed {
            return Err(EngineError::Lifecycle {
                operation,
                state: "closed",
            });
        }
        Ok(())
    }

    /// Apply queued commands now if no transport owns the processor
    ///
    /// Keeps the command ring from filling while the engine is stopped.
    fn drain_if_parked(&self) {
        if let Some(processor) = self.lock_parked().as_mut() {
            processor.apply_commands();
        }
    }

    fn lock_sources(&self) -> MutexGuard<'_, SourceSide> {
        self.sources.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_control(&self) -> MutexGuard<'_, ControlSide> {
        self.control.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_parked(&self) -> MutexGuard<'_, Option<EngineProcessor>> {
        self.parked.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.close();
    }
}

/// Device names must resolve before they are accepted
fn check_device(id: Option<&DeviceId>, direction: Direction) -> Result<(), ConfigError> {
    match id {
        Some(id) => find_device(id, direction)
            .map(|_| ())
            .map_err(|e| ConfigError::Device(e.to_string())),
        None => Ok(()),
    }
}
