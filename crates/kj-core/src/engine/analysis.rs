//! Analysis frames for the wake-word and speech-to-text consumers
//!
//! ```text
//!  audio thread                                    consumer thread
//!  ┌──────────────┐   pop buffer   ┌──────────┐
//!  │FrameAssembler│◄───────────────│   pool   │◄──── AnalysisFrame::drop
//!  │ (fills 1280) │                └──────────┘
//!  └──────┬───────┘   force_push   ┌──────────┐   pop
//!         └───────────────────────►│  ready   │─────────► poll_analysis()
//!                (oldest dropped)  └──────────┘
//! ```
//!
//! Frame buffers are allocated once. The audio thread only moves boxes between
//! two `crossbeam` `ArrayQueue`s; when the ready queue is full the oldest frame
//! is displaced (and its buffer recycled) and the drop is counted.

use std::sync::Arc;
use std::time::Duration;

use crossbeam::queue::ArrayQueue;

/// Spare buffers beyond the ready queue depth, for frames the consumer is holding
const POOL_SLACK: usize = 4;

/// A fixed-size chunk of mono audio at the analysis rate
pub struct AnalysisFrame {
    samples: Option<Box<[f32]>>,
    sample_rate: u32,
    sequence: u64,
    pool: Arc<ArrayQueue<Box<[f32]>>>,
}

impl AnalysisFrame {
    #[inline]
    pub fn samples(&self) -> &[f32] {
        self.samples.as_deref().unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.samples().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples().is_empty()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Position of this frame in the analysis stream (gaps mean dropped frames)
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.len() as f64 / self.sample_rate as f64)
    }

    /// 16-bit PCM as the wake-word and transcription models expect
    pub fn to_i16(&self) -> Vec<i16> {
        self.samples()
            .iter()
            .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16)
            .collect()
    }
}

impl Drop for AnalysisFrame {
    fn drop(&mut self) {
        if let Some(buffer) = self.samples.take() {
            // Pool is sized for every buffer, so this only fails if it was replaced
            let _ = self.pool.push(buffer);
        }
    }
}

impl std::fmt::Debug for AnalysisFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisFrame")
            .field("len", &self.len())
            .field("sample_rate", &self.sample_rate)
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// Bounded hand-off between the audio thread and the analysis consumer
pub struct AnalysisQueue {
    ready: ArrayQueue<AnalysisFrame>,
    pool: Arc<ArrayQueue<Box<[f32]>>>,
    frame_len: usize,
    sample_rate: u32,
}

impl AnalysisQueue {
    pub fn new(frame_len: usize, depth: usize, sample_rate: u32) -> Self {
        let buffers = depth + POOL_SLACK;
        let pool = ArrayQueue::new(buffers);
        for _ in 0..buffers {
            let _ = pool.push(vec![0.0f32; frame_len].into_boxed_slice());
        }
        Self {
            ready: ArrayQueue::new(depth),
            pool: Arc::new(pool),
            frame_len,
            sample_rate,
        }
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frames waiting for the consumer
    pub fn len(&self) -> usize {
        self.ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ready.is_empty()
    }

    /// Oldest unread frame, if any (never blocks)
    pub fn poll(&self) -> Option<AnalysisFrame> {
        self.ready.pop()
    }

    fn acquire(&self) -> Option<Box<[f32]>> {
        self.pool.pop()
    }

    /// Returns true if an unread frame had to be dropped to make room
    fn publish(&self, samples: Box<[f32]>, sequence: u64) -> bool {
        let frame = AnalysisFrame {
            samples: Some(samples),
            sample_rate: self.sample_rate,
            sequence,
            pool: Arc::clone(&self.pool),
        };
        // The displaced frame's buffer goes straight back to the pool
        self.ready.force_push(frame).is_some()
    }
}

/// Audio-thread side: accumulates decimated samples into whole frames
pub struct FrameAssembler {
    queue: Arc<AnalysisQueue>,
    current: Option<Box<[f32]>>,
    filled: usize,
    /// Samples discarded while no buffer was available
    skipped: usize,
    sequence: u64,
}

impl FrameAssembler {
    pub fn new(queue: Arc<AnalysisQueue>) -> Self {
        Self {
            queue,
            current: None,
            filled: 0,
            skipped: 0,
            sequence: 0,
        }
    }

    /// Append samples, publishing every completed frame
    ///
    /// Returns the number of frames lost, either displaced from a full queue
    /// or never built because the consumer holds every buffer.
    pub fn push(&mut self, mut samples: &[f32]) -> u64 {
        let frame_len = self.queue.frame_len;
        let mut dropped = 0;

        while !samples.is_empty() {
            if self.current.is_none() {
                self.current = self.queue.acquire();
                self.filled = 0;
                if self.current.is_some() && self.skipped > 0 {
                    // The partially skipped frame is lost
                    self.skipped = 0;
                    self.sequence += 1;
                    dropped += 1;
                }
            }

            let Some(buffer) = self.current.as_mut() else {
                // No buffer: count whole frames' worth of skipped audio
                let take = samples.len().min(frame_len - self.skipped);
                self.skipped += take;
                samples = &samples[take..];
                if self.skipped == frame_len {
                    self.skipped = 0;
                    self.sequence += 1;
                    dropped += 1;
                }
                continue;
            };

            let take = samples.len().min(frame_len - self.filled);
            buffer[self.filled..self.filled + take].copy_from_slice(&samples[..take]);
            self.filled += take;
            samples = &samples[take..];

            if self.filled == frame_len {
                if let Some(full) = self.current.take() {
                    if self.queue.publish(full, self.sequence) {
                        dropped += 1;
                    }
                }
                self.sequence += 1;
                self.filled = 0;
            }
        }

        dropped
    }

    /// Forget any partial frame
    pub fn reset(&mut self) {
        self.filled = 0;
        self.skipped = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize, start: usize) -> Vec<f32> {
        (start..start + len).map(|i| i as f32).collect()
    }

    #[test]
    fn test_frames_have_fixed_size_and_order() {
        let queue = Arc::new(AnalysisQueue::new(100, 8, 16000));
        let mut assembler = FrameAssembler::new(Arc::clone(&queue));

        // 43-sample chunks do not divide 100; frames must still be exact
        let input = ramp(430, 0);
        for chunk in input.chunks(43) {
            assert_eq!(assembler.push(chunk), 0);
        }

        for expected_seq in 0..4 {
            let frame = queue.poll().unwrap();
            assert_eq!(frame.len(), 100);
            assert_eq!(frame.sample_rate(), 16000);
            assert_eq!(frame.sequence(), expected_seq);
            assert_eq!(frame.samples()[0], (expected_seq * 100) as f32);
        }
        assert!(queue.poll().is_none());
    }

    #[test]
    fn test_full_queue_drops_oldest() {
        let queue = Arc::new(AnalysisQueue::new(10, 3, 16000));
        let mut assembler = FrameAssembler::new(Arc::clone(&queue));

        let mut dropped = 0;
        for i in 0..5 {
            dropped += assembler.push(&ramp(10, i * 10));
        }
        assert_eq!(dropped, 2);
        assert_eq!(queue.len(), 3);

        // Survivors are the newest three, oldest first
        let seqs: Vec<u64> = std::iter::from_fn(|| queue.poll()).map(|f| f.sequence()).collect();
        assert_eq!(seqs, vec![2, 3, 4]);
    }

    #[test]
    fn test_buffers_are_recycled() {
        let queue = Arc::new(AnalysisQueue::new(16, 2, 16000));
        let mut assembler = FrameAssembler::new(Arc::clone(&queue));

        // Far more frames than buffers exist; a live consumer never loses any
        for i in 0..100 {
            assert_eq!(assembler.push(&ramp(16, i * 16)), 0);
            let frame = queue.poll().unwrap();
            assert_eq!(frame.sequence(), i as u64);
        }
    }

    #[test]
    fn test_held_frames_exhaust_the_pool() {
        let queue = Arc::new(AnalysisQueue::new(8, 1, 16000));
        let mut assembler = FrameAssembler::new(Arc::clone(&queue));

        // Consumer hoards every frame it polls
        let mut held = Vec::new();
        let mut dropped = 0;
        for i in 0..(1 + POOL_SLACK + 3) {
            dropped += assembler.push(&ramp(8, i * 8));
            if let Some(frame) = queue.poll() {
                held.push(frame);
            }
        }
        assert_eq!(held.len(), 1 + POOL_SLACK);
        assert_eq!(dropped, 3);

        // Releasing frames lets assembly resume with the sequence gap visible
        held.clear();
        assert_eq!(assembler.push(&ramp(8, 0)), 0);
        let frame = queue.poll().unwrap();
        assert_eq!(frame.sequence(), (1 + POOL_SLACK + 3) as u64);
    }

    #[test]
    fn test_to_i16_scales_and_clamps() {
        let queue = Arc::new(AnalysisQueue::new(4, 1, 16000));
        let mut assembler = FrameAssembler::new(Arc::clone(&queue));
        assembler.push(&[0.0, 0.5, -1.0, 2.0]);
        let frame = queue.poll().unwrap();
        assert_eq!(frame.to_i16(), vec![0, 16383, -32767, 32767]);
        assert_eq!(frame.duration(), Duration::from_micros(250));
    }
}
