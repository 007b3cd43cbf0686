//! In-process transport with no devices
//!
//! The caller plays the part of the audio thread: every `run_period` call is
//! one callback. Used for tests, offline rendering and machines without a
//! sound card.

use std::sync::{Arc, Mutex};

use crate::engine::{EngineError, EngineResult, ProcessorSlot};
use crate::types::StereoSample;

/// Handle for driving the engine one period at a time
///
/// Cheap to clone. Once the engine stops, every call fails with a lifecycle error.
#[derive(Clone)]
pub struct VirtualTransport {
    slot: Arc<Mutex<Option<ProcessorSlot>>>,
    sample_rate: u32,
    period_frames: u32,
}

impl VirtualTransport {
    pub(crate) fn new(slot: ProcessorSlot, sample_rate: u32, period_frames: u32) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(slot))),
            sample_rate,
            period_frames,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn period_frames(&self) -> u32 {
        self.period_frames
    }

    pub fn is_running(&self) -> bool {
        self.lock().is_some()
    }

    /// Run one period of the configured size
    ///
    /// `capture` is the mono mic input; `None` simulates a capture period the
    /// device never delivered.
    pub fn run_period(&self, capture: Option<&[f32]>) -> EngineResult<Vec<StereoSample>> {
        let mut output = Vec::with_capacity(self.period_frames as usize);
        self.run_period_into(capture, &mut output)?;
        Ok(output)
    }

    /// Like `run_period`, appending the bus output to `output`
    pub fn run_period_into(
        &self,
        capture: Option<&[f32]>,
        output: &mut Vec<StereoSample>,
    ) -> EngineResult<()> {
        let mut guard = self.lock();
        let slot = guard.as_mut().ok_or(EngineError::Lifecycle {
            operation: "run_period",
            state: "stopped",
        })?;
        output.extend_from_slice(slot.process(self.period_frames as usize, capture));
        Ok(())
    }

    /// Detach the processor; it returns to the engine when the slot drops
    pub(crate) fn stop(&self) {
        let slot = self.lock().take();
        drop(slot);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<ProcessorSlot>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for VirtualTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualTransport")
            .field("sample_rate", &self.sample_rate)
            .field("period_frames", &self.period_frames)
            .field("running", &self.is_running())
            .finish()
    }
}
