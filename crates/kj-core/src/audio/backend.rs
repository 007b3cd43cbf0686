//! Transport selection
//!
//! Every backend follows the same contract:
//! - The processor is moved into the real-time callback; nothing else touches it
//! - Missed capture is played as silence and counted, never waited for
//! - Dropping or stopping the transport returns the processor to the engine
//!
//! ```text
//!           ┌── Cpal    (capture stream ─ring─► playback stream)
//! start ────┼── Jack    (one process callback, Linux + jack-backend)
//!           └── Virtual (caller runs each period)
//! ```

use std::sync::Arc;

use super::config::{Backend, TransportConfig};
use super::virtual_backend::VirtualTransport;
use crate::engine::{EngineResult, EngineStats, ProcessorSlot};

/// A running transport
pub enum TransportHandle {
    Cpal(super::cpal_backend::CpalTransport),

    #[cfg(all(target_os = "linux", feature = "jack-backend"))]
    Jack(super::jack_backend::JackTransport),

    Virtual(VirtualTransport),
}

impl TransportHandle {
    pub fn backend(&self) -> Backend {
        match self {
            TransportHandle::Cpal(_) => Backend::Cpal,
            #[cfg(all(target_os = "linux", feature = "jack-backend"))]
            TransportHandle::Jack(_) => Backend::Jack,
            TransportHandle::Virtual(_) => Backend::Virtual,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        match self {
            TransportHandle::Cpal(t) => t.sample_rate(),
            #[cfg(all(target_os = "linux", feature = "jack-backend"))]
            TransportHandle::Jack(t) => t.sample_rate(),
            TransportHandle::Virtual(t) => t.sample_rate(),
        }
    }

    pub fn period_frames(&self) -> u32 {
        match self {
            TransportHandle::Cpal(t) => t.period_frames(),
            #[cfg(all(target_os = "linux", feature = "jack-backend"))]
            TransportHandle::Jack(t) => t.period_frames(),
            TransportHandle::Virtual(t) => t.period_frames(),
        }
    }

    /// Audio latency of one period in milliseconds
    pub fn latency_ms(&self) -> f32 {
        (self.period_frames() as f32 / self.sample_rate() as f32) * 1000.0
    }

    /// The caller-driven handle, if this is the virtual transport
    pub fn as_virtual(&self) -> Option<&VirtualTransport> {
        match self {
            TransportHandle::Virtual(t) => Some(t),
            _ => None,
        }
    }

    /// Stop streaming; returns once the processor is back with the engine
    pub fn stop(self) {
        match self {
            TransportHandle::Cpal(t) => drop(t),
            #[cfg(all(target_os = "linux", feature = "jack-backend"))]
            TransportHandle::Jack(mut t) => t.stop(),
            TransportHandle::Virtual(t) => t.stop(),
        }
    }
}

/// Start the transport named in `config`
///
/// On failure the slot is dropped, which returns the processor to the engine.
pub fn start_transport(
    config: &TransportConfig,
    slot: ProcessorSlot,
    stats: Arc<EngineStats>,
) -> EngineResult<TransportHandle> {
    match config.backend {
        Backend::Cpal => super::cpal_backend::start(config, slot, stats).map(TransportHandle::Cpal),

        #[cfg(all(target_os = "linux", feature = "jack-backend"))]
        Backend::Jack => super::jack_backend::start(config, slot, stats).map(TransportHandle::Jack),

        #[cfg(not(all(target_os = "linux", feature = "jack-backend")))]
        Backend::Jack => {
            drop((slot, stats));
            Err(super::error::AudioError::BackendUnavailable("JACK").into())
        }

        Backend::Virtual => {
            drop(stats);
            let transport = VirtualTransport::new(slot, config.sample_rate, config.period_frames);
            log::info!(
                "Virtual transport started ({}Hz, {} frames)",
                config.sample_rate,
                config.period_frames
            );
            Ok(TransportHandle::Virtual(transport))
        }
    }
}
