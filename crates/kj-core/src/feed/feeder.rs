//! Push long buffers into a source one block at a time
//!
//! A TTS utterance or a backing track is far larger than a source queue. The
//! feeder splits it into period-sized blocks and pushes them in order; when the
//! queue is full it sleeps about half a period and retries, so the producer is
//! paced by the audio thread instead of spinning.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::error::FeedResult;
use crate::engine::{Engine, SourceHandle};
use crate::types::{AudioBlock, StereoSample};

/// How a `feed` call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// Every frame was queued
    Completed { frames: usize },
    /// The cancel flag was raised; `frames` were queued before that
    Cancelled { frames: usize },
}

impl FeedOutcome {
    pub fn frames(&self) -> usize {
        match *self {
            FeedOutcome::Completed { frames } | FeedOutcome::Cancelled { frames } => frames,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, FeedOutcome::Cancelled { .. })
    }
}

pub struct BlockFeeder<'a> {
    engine: &'a Engine,
    handle: SourceHandle,
    block_frames: usize,
    retry_interval: Duration,
    cancel: Option<Arc<AtomicBool>>,
    sequence: u64,
}

impl<'a> BlockFeeder<'a> {
    /// Feeder for `handle` with blocks of one engine period
    pub fn new(engine: &'a Engine, handle: SourceHandle) -> Self {
        let period = engine.period_frames().max(1);
        let rate = engine.sample_rate().max(1);
        Self {
            engine,
            handle,
            block_frames: period as usize,
            retry_interval: Duration::from_secs_f64(period as f64 / rate as f64 / 2.0),
            cancel: None,
            sequence: 0,
        }
    }

    /// Stop feeding (between blocks) once `cancel` is set
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_block_frames(mut self, frames: usize) -> Self {
        self.block_frames = frames.max(1);
        self
    }

    pub fn handle(&self) -> SourceHandle {
        self.handle
    }

    /// Sequence number the next block will carry
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    /// Queue all of `frames`, waiting out backpressure
    ///
    /// Blocks already queued stay queued when cancelled; `Engine::unregister`
    /// discards them.
    pub fn feed(&mut self, frames: &[StereoSample]) -> FeedResult<FeedOutcome> {
        let rate = self.engine.sample_rate();
        let mut fed = 0;

        for chunk in frames.chunks(self.block_frames) {
            let block = AudioBlock::stereo(chunk, rate, self.sequence)?;
            loop {
                if self.is_cancelled() {
                    log::debug!("Feed to {} cancelled after {} frames", self.handle, fed);
                    return Ok(FeedOutcome::Cancelled { frames: fed });
                }
                match self.engine.push(self.handle, &block) {
                    Ok(()) => break,
                    Err(e) if e.is_transient() => thread::sleep(self.retry_interval),
                    Err(e) => return Err(e.into()),
                }
            }
            self.sequence += 1;
            fed += chunk.len();
        }

        Ok(FeedOutcome::Completed { frames: fed })
    }

    /// Wait until the source's queue is empty
    ///
    /// Returns false on timeout or cancellation.
    pub fn wait_drained(&self, timeout: Duration) -> FeedResult<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.engine.queued_frames(self.handle)? == 0 {
                return Ok(true);
            }
            if self.is_cancelled() || Instant::now() >= deadline {
                return Ok(false);
            }
            thread::sleep(self.retry_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::Backend;
    use crate::config::{EngineSettings, ModeConfig};
    use crate::engine::{EngineError, SourcePriority};
    use crate::feed::FeedError;

    const PERIOD: usize = 128;

    fn small_engine() -> Engine {
        let mut settings = EngineSettings {
            mode: ModeConfig::default().with_period(PERIOD as u32),
            backend: Backend::Virtual,
            ..Default::default()
        };
        settings.limits.source_queue_blocks = 2;
        Engine::open(settings).unwrap()
    }

    #[test]
    fn test_feed_paced_by_audio_thread() {
        let engine = small_engine();
        let handle = engine.register_source("track", SourcePriority::Normal).unwrap();
        let transport = engine.start_virtual().unwrap();
        let done = AtomicBool::new(false);
        let frames = vec![StereoSample::mono(0.1); 40 * PERIOD];

        let heard = thread::scope(|s| {
            let audio = s.spawn(|| {
                let mut heard = 0;
                let silence = [0.0f32; PERIOD];
                while !done.load(Ordering::Acquire) {
                    let out = transport.run_period(Some(&silence)).unwrap();
                    heard += out.iter().filter(|f| (f.left - 0.1).abs() < 1e-6).count();
                    thread::sleep(Duration::from_micros(200));
                }
                heard
            });

            let mut feeder = BlockFeeder::new(&engine, handle);
            let outcome = feeder.feed(&frames).unwrap();
            assert_eq!(outcome, FeedOutcome::Completed { frames: 40 * PERIOD });
            assert_eq!(feeder.sequence(), 40);
            assert!(feeder.wait_drained(Duration::from_secs(5)).unwrap());

            done.store(true, Ordering::Release);
            audio.join().unwrap()
        });

        assert_eq!(heard, 40 * PERIOD, "every frame mixed exactly once");
        assert_eq!(engine.stats().underrun_count, 0);
    }

    #[test]
    fn test_cancel_stops_between_blocks() {
        let engine = small_engine();
        let handle = engine.register_source("tts", SourcePriority::High).unwrap();
        let cancel = Arc::new(AtomicBool::new(false));
        let frames = vec![StereoSample::mono(0.1); 10 * PERIOD];

        // Nothing is draining the queue, so the feeder stalls after two blocks
        let outcome = thread::scope(|s| {
            let flag = Arc::clone(&cancel);
            s.spawn(move || {
                thread::sleep(Duration::from_millis(20));
                flag.store(true, Ordering::Release);
            });
            BlockFeeder::new(&engine, handle)
                .with_cancel(Arc::clone(&cancel))
                .feed(&frames)
                .unwrap()
        });

        assert!(outcome.is_cancelled());
        assert_eq!(outcome.frames(), 2 * PERIOD);
        assert_eq!(engine.queued_frames(handle).unwrap(), 2 * PERIOD);
    }

    #[test]
    fn test_wait_drained_times_out_without_consumer() {
        let engine = small_engine();
        let handle = engine.register_source("track", SourcePriority::Normal).unwrap();
        let mut feeder = BlockFeeder::new(&engine, handle).with_block_frames(64);
        feeder.feed(&[StereoSample::mono(0.2); 100]).unwrap();
        assert_eq!(feeder.sequence(), 2);
        assert!(!feeder.wait_drained(Duration::from_millis(10)).unwrap());
    }

    #[test]
    fn test_unknown_source_is_an_error() {
        let engine = small_engine();
        let handle = engine.register_source("gone", SourcePriority::Normal).unwrap();
        engine.unregister(handle).unwrap();

        let result = BlockFeeder::new(&engine, handle).feed(&[StereoSample::mono(0.1); 8]);
        assert!(matches!(result, Err(FeedError::Engine(EngineError::UnknownSource))));
    }
}
