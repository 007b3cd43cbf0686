//! Producer helpers for TTS prompts and backing tracks
//!
//! Everything here runs on producer threads, never on the audio thread:
//! - [`PcmConverter`]: any-rate mono/stereo PCM to engine-rate stereo
//! - [`BlockFeeder`]: period-sized pushes with backpressure retry and cancel
//! - [`SpeechSession`]: registers a speech source and mutes the mic for its lifetime
//! - [`WavClip`] / [`AnalysisRecorder`]: WAV in and out

mod convert;
mod error;
mod feeder;
mod speech;
mod wav;

pub use convert::PcmConverter;
pub use error::{FeedError, FeedResult};
pub use feeder::{BlockFeeder, FeedOutcome};
pub use speech::SpeechSession;
pub use wav::{AnalysisRecorder, WavClip};
