//! Audio engine - sources, bus mixer, monitor path and analysis
//!
//! This module contains the real-time core of the karaoke monitor:
//! - Engine: owned root with the open/start/stop/close lifecycle and public API
//! - EngineProcessor: the per-period pipeline moved onto the audio thread
//! - BusMixer: sums source queues with priority ducking and gain ramps
//! - ModeController: hardware/software/muted-for-speech state and snapshots
//! - AnalysisQueue: fixed-size 16kHz mic frames for wake-word and STT

mod analysis;
mod command;
mod engine;
mod error;
mod gc;
mod master_clipper;
mod mixer;
mod mode;
mod processor;
mod source;
mod stats;

pub use analysis::{AnalysisFrame, AnalysisQueue, FrameAssembler};
pub use command::{command_capacity, command_channel, EngineCommand};
pub use engine::{Engine, EngineState};
pub use error::{EngineError, EngineResult};
pub use gc::gc_handle;
pub use master_clipper::{MasterClipper, DEFAULT_KNEE};
pub use mixer::BusMixer;
pub use mode::{EngineMode, ModeController, ModeSnapshot};
pub use processor::{EngineProcessor, ProcessorHome, ProcessorParts, ProcessorSlot};
pub use source::{
    SourceControl, SourceHandle, SourceLane, SourcePriority, SourceRegistry, MAX_SOURCE_GAIN,
};
pub use stats::{EngineStats, StatsSnapshot};
