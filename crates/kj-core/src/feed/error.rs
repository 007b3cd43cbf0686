//! Producer-side errors

use thiserror::Error;

use crate::engine::EngineError;
use crate::types::BlockError;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Unsupported channel count {0} (mono or stereo only)")]
    Channels(u16),

    #[error("Sample rate must be non-zero")]
    ZeroSampleRate,

    #[error("Resampler error: {0}")]
    Resampler(String),

    #[error("Invalid audio block: {0}")]
    Block(#[from] BlockError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

pub type FeedResult<T> = Result<T, FeedError>;
