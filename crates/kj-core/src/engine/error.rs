//! Errors returned by the public engine API

use thiserror::Error;

use crate::audio::AudioError;
use crate::config::ConfigError;
use crate::types::BlockError;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Rejected configuration; fatal for that configuration, never retried
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Every source slot is taken
    #[error("Source capacity exhausted: {max} sources already registered")]
    Capacity { max: usize },

    /// The source's queue cannot take the whole block; nothing was enqueued
    #[error("Source queue is full")]
    Backpressure,

    /// Handle was never issued or its source has been unregistered
    #[error("Unknown source handle")]
    UnknownSource,

    #[error("Invalid audio block: {0}")]
    BlockFormat(#[from] BlockError),

    /// Operation not allowed in the current lifecycle state
    #[error("Cannot {operation} while the engine is {state}")]
    Lifecycle {
        operation: &'static str,
        state: &'static str,
    },

    /// The audio thread has not drained earlier control messages
    #[error("Command queue to the audio thread is full")]
    CommandQueueFull,

    #[error("Audio device error: {0}")]
    Audio(#[from] AudioError),
}

impl EngineError {
    /// Recoverable errors the caller can retry later
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Backpressure | EngineError::CommandQueueFull)
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
