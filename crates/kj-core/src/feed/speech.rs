//! Speaking interval guard for TTS
//!
//! While the assistant talks, the mic must stay off the bus or the speaker
//! output gets re-captured and heard as the singer. A `SpeechSession` brackets
//! that interval: it registers a high-priority source (which ducks the backing
//! track) and counts itself in as a speaker; dropping it removes the source and
//! counts it out. The mic stays muted until the last overlapping session ends.
//!
//! ```ignore
//! let session = SpeechSession::begin(&engine, "tts")?;
//! session.speak(&frames, Some(cancel), Duration::from_secs(30))?;
//! // dropped: source unregistered, monitor mode restored
//! ```

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use super::error::FeedResult;
use super::feeder::{BlockFeeder, FeedOutcome};
use crate::engine::{Engine, EngineResult, SourceHandle, SourcePriority};
use crate::types::StereoSample;

pub struct SpeechSession<'a> {
    engine: &'a Engine,
    handle: SourceHandle,
    ended: bool,
}

impl<'a> SpeechSession<'a> {
    /// Register the speech source and mute the mic
    pub fn begin(engine: &'a Engine, name: &str) -> EngineResult<Self> {
        let handle = engine.register_source(name, SourcePriority::High)?;
        if let Err(e) = engine.begin_speech() {
            let _ = engine.unregister(handle);
            return Err(e);
        }
        log::info!("Speech session '{}' started ({})", name, handle);
        Ok(Self {
            engine,
            handle,
            ended: false,
        })
    }

    pub fn handle(&self) -> SourceHandle {
        self.handle
    }

    /// Feeder for queueing speech into this session's source
    pub fn feeder(&self) -> BlockFeeder<'a> {
        BlockFeeder::new(self.engine, self.handle)
    }

    /// Queue `frames` and wait until they have been played
    ///
    /// Returns early when `cancel` is raised. Whatever is still queued is
    /// discarded when the session ends.
    pub fn speak(
        &self,
        frames: &[StereoSample],
        cancel: Option<Arc<AtomicBool>>,
        drain_timeout: Duration,
    ) -> FeedResult<FeedOutcome> {
        let mut feeder = self.feeder();
        if let Some(cancel) = cancel {
            feeder = feeder.with_cancel(cancel);
        }
        let outcome = feeder.feed(frames)?;
        if !outcome.is_cancelled() && !feeder.wait_drained(drain_timeout)? {
            log::warn!("Speech on {} still queued after {:?}", self.handle, drain_timeout);
        }
        Ok(outcome)
    }

    /// End the session now and report any error
    pub fn finish(mut self) -> EngineResult<()> {
        self.end()
    }

    fn end(&mut self) -> EngineResult<()> {
        if self.ended {
            return Ok(());
        }
        self.ended = true;
        let removed = self.engine.unregister(self.handle);
        let mode = self.engine.end_speech();
        log::info!("Speech session {} ended, monitor mode {}", self.handle, mode);
        removed
    }
}

impl Drop for SpeechSession<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.end() {
            log::warn!("Failed to end speech session {}: {}", self.handle, e);
        }
    }
}
