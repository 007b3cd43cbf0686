//! kj-core - live mic monitoring engine for auto-kj
//!
//! Captures the singer's mic, optionally monitors it through gain and reverb,
//! mixes karaoke tracks and TTS prompts onto one playback bus, and hands a
//! 16kHz copy of the mic to the wake-word and speech-to-text consumers.

pub mod audio;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod feed;
pub mod types;

pub use engine::{
    AnalysisFrame, Engine, EngineError, EngineMode, EngineResult, SourceHandle, SourcePriority,
    StatsSnapshot,
};
pub use types::*;
