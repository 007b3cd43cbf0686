//! CPAL transport
//!
//! cpal has no duplex streams, so capture and playback run as two streams that
//! meet in a lock-free ring:
//!
//! ```text
//! ┌──────────────────┐   mono f32    ┌──────────────────┐
//! │  Input Stream    │──────────────►│   Capture Ring   │
//! │ (channel 0 only) │  overflow =   │  (SPSC, 8 periods)│
//! └──────────────────┘   overrun     └────────┬─────────┘
//!                                             │ read n
//!                                             ▼
//!                                   ┌───────────────────┐
//!                                   │  Output Stream    │
//!                                   │ (owns processor)  │──► playback
//!                                   └───────────────────┘
//! ```
//!
//! The output callback is the engine's period clock. It pulls one period of
//! capture per callback; a short read after the first full one is an underrun
//! and the gap is played as silence. Backlog beyond two periods is discarded
//! so drift between the two devices can't build up monitor latency.

use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};

use super::config::TransportConfig;
use super::device::{open_device, Direction};
use super::error::AudioError;
use crate::config::ConfigError;
use crate::engine::{EngineResult, EngineStats, ProcessorSlot};
use crate::types::MAX_PERIOD_FRAMES;

/// Capture ring size, in periods
const CAPTURE_RING_PERIODS: usize = 8;

/// Capture backlog kept before the excess is skipped, in periods
const MAX_BACKLOG_PERIODS: usize = 2;

/// Running capture and playback streams
///
/// `cpal::Stream` is not `Send`, so the streams are built and owned by a small
/// host thread that parks until told to stop. Dropping this stops both streams;
/// the processor goes back to the engine before `stop` returns.
pub struct CpalTransport {
    stop_tx: Option<mpsc::Sender<()>>,
    host: Option<JoinHandle<()>>,
    sample_rate: u32,
    period_frames: u32,
}

impl CpalTransport {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn period_frames(&self) -> u32 {
        self.period_frames
    }

    pub fn stop(&mut self) {
        drop(self.stop_tx.take());
        if let Some(host) = self.host.take() {
            if host.join().is_err() {
                log::error!("Audio stream thread panicked");
            }
        }
    }
}

impl Drop for CpalTransport {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Open both devices at the configured rate and period and start streaming
pub fn start(
    config: &TransportConfig,
    slot: ProcessorSlot,
    stats: Arc<EngineStats>,
) -> EngineResult<CpalTransport> {
    let (ready_tx, ready_rx) = mpsc::channel::<EngineResult<()>>();
    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let host_config = config.clone();

    let host = thread::Builder::new()
        .name("kj-cpal-streams".to_string())
        .spawn(move || match open_streams(&host_config, slot, stats) {
            Ok(streams) => {
                let _ = ready_tx.send(Ok(()));
                // Blocks until the transport is stopped (sender dropped)
                let _ = stop_rx.recv();
                drop(streams);
                log::info!("Audio streams stopped");
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
            }
        })
        .map_err(|e| AudioError::StreamPlay(format!("Failed to spawn stream thread: {}", e)))?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(CpalTransport {
            stop_tx: Some(stop_tx),
            host: Some(host),
            sample_rate: config.sample_rate,
            period_frames: config.period_frames,
        }),
        Ok(Err(e)) => {
            let _ = host.join();
            Err(e)
        }
        Err(_) => {
            let _ = host.join();
            Err(AudioError::StreamPlay("stream thread exited during start-up".to_string()).into())
        }
    }
}

fn open_streams(
    config: &TransportConfig,
    slot: ProcessorSlot,
    stats: Arc<EngineStats>,
) -> EngineResult<(Stream, Stream)> {
    let input_device = open_device(config.capture_device.as_ref(), Direction::Input)?;
    let output_device = open_device(config.playback_device.as_ref(), Direction::Output)?;

    let input_name = input_device.name().unwrap_or_else(|_| "Unknown".to_string());
    let output_name = output_device.name().unwrap_or_else(|_| "Unknown".to_string());
    log::info!("Capture device: {}", input_name);
    log::info!("Playback device: {}", output_name);

    let input_ranges = input_device
        .supported_input_configs()
        .map_err(|e| AudioError::DeviceConfig(e.to_string()))?;
    let input_supported = pick_config(input_ranges, config.sample_rate, 1).ok_or_else(|| {
        ConfigError::Device(format!(
            "capture device '{}' cannot run at {}Hz",
            input_name, config.sample_rate
        ))
    })?;

    let output_ranges = output_device
        .supported_output_configs()
        .map_err(|e| AudioError::DeviceConfig(e.to_string()))?;
    let output_supported = pick_config(output_ranges, config.sample_rate, 2)
        .or_else(|| {
            let ranges = output_device.supported_output_configs().ok()?;
            pick_config(ranges, config.sample_rate, 1)
        })
        .ok_or_else(|| {
            ConfigError::Device(format!(
                "playback device '{}' cannot run at {}Hz",
                output_name, config.sample_rate
            ))
        })?;

    let buffer_size = cpal::BufferSize::Fixed(config.period_frames);
    let input_config = StreamConfig {
        channels: input_supported.channels(),
        sample_rate: input_supported.sample_rate(),
        buffer_size,
    };
    let output_config = StreamConfig {
        channels: output_supported.channels(),
        sample_rate: output_supported.sample_rate(),
        buffer_size,
    };

    log::info!(
        "Audio config: capture {}ch {:?}, playback {}ch {:?}, {}Hz, {} frames (~{:.1}ms)",
        input_config.channels,
        input_supported.sample_format(),
        output_config.channels,
        output_supported.sample_format(),
        config.sample_rate,
        config.period_frames,
        config.period_ms()
    );

    let period = config.period_frames as usize;
    let (producer, consumer) = rtrb::RingBuffer::<f32>::new(period * CAPTURE_RING_PERIODS);

    let input = match input_supported.sample_format() {
        SampleFormat::F32 => build_input::<f32>(&input_device, &input_config, producer, Arc::clone(&stats))?,
        SampleFormat::I16 => build_input::<i16>(&input_device, &input_config, producer, Arc::clone(&stats))?,
        SampleFormat::U16 => build_input::<u16>(&input_device, &input_config, producer, Arc::clone(&stats))?,
        other => return Err(AudioError::UnsupportedFormat(other.to_string()).into()),
    };

    let playback = PlaybackState::new(slot, consumer, period, stats);
    let output = match output_supported.sample_format() {
        SampleFormat::F32 => build_output::<f32>(&output_device, &output_config, playback)?,
        SampleFormat::I16 => build_output::<i16>(&output_device, &output_config, playback)?,
        SampleFormat::U16 => build_output::<u16>(&output_device, &output_config, playback)?,
        other => return Err(AudioError::UnsupportedFormat(other.to_string()).into()),
    };

    input
        .play()
        .map_err(|e| AudioError::StreamPlay(format!("capture: {}", e)))?;
    output
        .play()
        .map_err(|e| AudioError::StreamPlay(format!("playback: {}", e)))?;

    log::info!("Audio streams started");
    Ok((input, output))
}

/// Rank sample formats: native float first, then the common integer formats
fn format_rank(format: SampleFormat) -> Option<u8> {
    match format {
        SampleFormat::F32 => Some(0),
        SampleFormat::I16 => Some(1),
        SampleFormat::U16 => Some(2),
        _ => None,
    }
}

/// Best supported config at exactly `sample_rate` with at least `min_channels`
///
/// Prefers f32, then the fewest channels that satisfy the minimum.
fn pick_config<I>(ranges: I, sample_rate: u32, min_channels: u16) -> Option<cpal::SupportedStreamConfig>
where
    I: IntoIterator<Item = cpal::SupportedStreamConfigRange>,
{
    ranges
        .into_iter()
        .filter(|r| r.channels() >= min_channels)
        .filter(|r| (r.min_sample_rate().0..=r.max_sample_rate().0).contains(&sample_rate))
        .filter_map(|r| format_rank(r.sample_format()).map(|rank| (rank, r)))
        .min_by_key(|(rank, r)| (*rank, r.channels()))
        .map(|(_, r)| r.with_sample_rate(cpal::SampleRate(sample_rate)))
}

fn build_input<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: rtrb::Producer<f32>,
    stats: Arc<EngineStats>,
) -> EngineResult<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels as usize;
    let error_stats = Arc::clone(&stats);

    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _info: &cpal::InputCallbackInfo| {
                let frames = data.len() / channels;
                let writable = frames.min(producer.slots());
                let written = match producer.write_chunk_uninit(writable) {
                    Ok(chunk) => chunk.fill_from_iter(
                        data.chunks_exact(channels).map(|frame| frame[0].to_sample::<f32>()),
                    ),
                    Err(_) => 0,
                };
                if written < frames {
                    stats.record_overrun();
                }
            },
            move |err| {
                log::error!("Capture stream error: {}", err);
                error_stats.record_overrun();
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuild {
            direction: "capture",
            message: e.to_string(),
        })?;

    Ok(stream)
}

/// Everything the playback callback owns
struct PlaybackState {
    slot: ProcessorSlot,
    capture: rtrb::Consumer<f32>,
    /// One callback chunk of capture, pre-allocated
    mic: Box<[f32]>,
    period: usize,
    /// Set once a full period of capture has arrived
    primed: bool,
    stats: Arc<EngineStats>,
}

impl PlaybackState {
    fn new(
        slot: ProcessorSlot,
        capture: rtrb::Consumer<f32>,
        period: usize,
        stats: Arc<EngineStats>,
    ) -> Self {
        Self {
            slot,
            capture,
            mic: vec![0.0; MAX_PERIOD_FRAMES as usize].into_boxed_slice(),
            period,
            primed: false,
            stats,
        }
    }

    /// Pull `n` frames of capture into `mic`, returning how many arrived
    fn read_capture(&mut self, n: usize) -> usize {
        let available = self.capture.slots();
        let backlog = n.max(self.period) * MAX_BACKLOG_PERIODS;
        if available > n + backlog {
            if let Ok(stale) = self.capture.read_chunk(available - n) {
                stale.commit_all();
            }
        }

        let take = self.capture.slots().min(n);
        match self.capture.read_chunk(take) {
            Ok(chunk) => {
                let (first, second) = chunk.as_slices();
                self.mic[..first.len()].copy_from_slice(first);
                self.mic[first.len()..take].copy_from_slice(second);
                chunk.commit_all();
                take
            }
            Err(_) => 0,
        }
    }

    fn fill<T>(&mut self, data: &mut [T], channels: usize)
    where
        T: SizedSample + FromSample<f32>,
    {
        let max = MAX_PERIOD_FRAMES as usize;
        for block in data.chunks_mut(max * channels) {
            let n = block.len() / channels;
            let got = self.read_capture(n);
            if got == n {
                self.primed = true;
            } else if self.primed {
                self.stats.record_underrun();
            }

            let out = self.slot.process(n, Some(&self.mic[..got]));
            for (frame, sample) in block.chunks_exact_mut(channels).zip(out.iter()) {
                if channels == 1 {
                    frame[0] = T::from_sample((sample.left + sample.right) * 0.5);
                    continue;
                }
                frame[0] = T::from_sample(sample.left);
                frame[1] = T::from_sample(sample.right);
                for ch in frame.iter_mut().skip(2) {
                    *ch = T::EQUILIBRIUM;
                }
            }
        }
    }
}

fn build_output<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut state: PlaybackState,
) -> EngineResult<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let error_stats = Arc::clone(&state.stats);

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _info: &cpal::OutputCallbackInfo| {
                state.fill(data, channels);
            },
            move |err| {
                log::error!("Playback stream error: {}", err);
                error_stats.record_underrun();
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuild {
            direction: "playback",
            message: e.to_string(),
        })?;

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use basedrop::Owned;
    use cpal::{SampleRate, SupportedBufferSize, SupportedStreamConfigRange};

    use crate::config::ModeConfig;
    use crate::engine::{
        command_capacity, command_channel, gc_handle, AnalysisQueue, EngineCommand, EngineProcessor,
        MasterClipper, ModeController, ProcessorParts, SourcePriority, SourceRegistry,
    };
    use crate::types::StereoSample;

    const PERIOD: usize = 64;

    /// Playback side of a cpal transport without any device behind it
    struct Rig {
        playback: PlaybackState,
        capture: rtrb::Producer<f32>,
        commands: rtrb::Producer<EngineCommand>,
        registry: SourceRegistry,
        stats: Arc<EngineStats>,
        _mode: ModeController,
    }

    fn rig(config: ModeConfig) -> Rig {
        let mode = ModeController::new(config.with_period(PERIOD as u32), 16000).unwrap();
        let (commands, rx) = command_channel(command_capacity(2));
        let clipper = MasterClipper::new();
        let stats = Arc::new(EngineStats::new(clipper.clip_indicator()));
        let mut processor = EngineProcessor::new(ProcessorParts {
            mode: mode.reader(),
            commands: rx,
            analysis: Arc::new(AnalysisQueue::new(1280, 4, 16000)),
            stats: Arc::clone(&stats),
            clipper,
            max_sources: 2,
            duck_gain: 0.3,
        })
        .unwrap();
        processor.prepare().unwrap();

        let slot = ProcessorSlot::new(processor, Arc::new(Mutex::new(None)));
        let (capture, consumer) = rtrb::RingBuffer::new(PERIOD * CAPTURE_RING_PERIODS);
        Rig {
            playback: PlaybackState::new(slot, consumer, PERIOD, Arc::clone(&stats)),
            capture,
            commands,
            registry: SourceRegistry::new(2),
            stats,
            _mode: mode,
        }
    }

    /// Monitor path is the mic, unchanged
    fn passthrough() -> Rig {
        rig(ModeConfig::software(1.0, 0.0))
    }

    fn capture(rig: &mut Rig, value: f32, frames: usize) {
        for _ in 0..frames {
            rig.capture.push(value).unwrap();
        }
    }

    #[test]
    fn test_missing_capture_before_priming_is_not_an_underrun() {
        let mut rig = passthrough();
        let mut out = vec![1.0f32; PERIOD * 2];
        rig.playback.fill(&mut out, 2);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(rig.stats.underrun_count(), 0);
    }

    #[test]
    fn test_short_capture_after_priming_counts_underrun_and_pads_silence() {
        let mut rig = passthrough();
        capture(&mut rig, 0.5, PERIOD);
        let mut out = vec![0.0f32; PERIOD * 2];
        rig.playback.fill(&mut out, 2);
        assert!(out.iter().all(|&s| s == 0.5), "full period should pass the mic through");
        assert_eq!(rig.stats.underrun_count(), 0);

        capture(&mut rig, 0.25, 16);
        rig.playback.fill(&mut out, 2);
        assert_eq!(rig.stats.underrun_count(), 1);
        assert!(out[..32].iter().all(|&s| s == 0.25));
        assert!(out[32..].iter().all(|&s| s == 0.0), "missing frames must be silent");

        // Nothing at all is one more underrun
        rig.playback.fill(&mut out, 2);
        assert_eq!(rig.stats.underrun_count(), 2);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_capture_backlog_is_skipped() {
        let mut rig = passthrough();
        // Four stale periods, then the newest one
        capture(&mut rig, 0.1, PERIOD * 4);
        capture(&mut rig, 0.7, PERIOD);

        let mut out = vec![0.0f32; PERIOD * 2];
        rig.playback.fill(&mut out, 2);
        assert!(out.iter().all(|&s| s == 0.7), "only the newest period should be played");
        assert_eq!(rig.capture.slots(), PERIOD * CAPTURE_RING_PERIODS);
    }

    #[test]
    fn test_backlog_within_limit_is_kept() {
        let mut rig = passthrough();
        capture(&mut rig, 0.1, PERIOD);
        capture(&mut rig, 0.2, PERIOD * MAX_BACKLOG_PERIODS);

        let mut out = vec![0.0f32; PERIOD * 2];
        rig.playback.fill(&mut out, 2);
        assert!(out.iter().all(|&s| s == 0.1));
        assert_eq!(
            rig.capture.slots(),
            PERIOD * (CAPTURE_RING_PERIODS - MAX_BACKLOG_PERIODS)
        );
    }

    #[test]
    fn test_mono_device_gets_downmix() {
        let mut rig = rig(ModeConfig::default());
        let (handle, lane) = rig
            .registry
            .register("track", SourcePriority::Normal, PERIOD * 2)
            .unwrap();
        let lane = Owned::new(&gc_handle(), lane);
        assert!(rig
            .commands
            .push(EngineCommand::InstallSource {
                slot: handle.slot(),
                lane,
            })
            .is_ok());
        rig.registry
            .push_frames(handle, &vec![StereoSample::new(0.6, 0.2); PERIOD])
            .unwrap();
        capture(&mut rig, 0.0, PERIOD);

        let mut out = vec![0.0f32; PERIOD];
        rig.playback.fill(&mut out, 1);
        assert!(out.iter().all(|&s| (s - 0.4).abs() < 1e-6), "got {}", out[0]);
    }

    #[test]
    fn test_extra_output_channels_are_silent() {
        let mut rig = passthrough();
        capture(&mut rig, 0.5, PERIOD);
        let mut out = vec![1i16; PERIOD * 4];
        rig.playback.fill(&mut out, 4);
        for frame in out.chunks_exact(4) {
            assert_eq!(frame[0], frame[1]);
            assert!(frame[0] > 16000);
            assert_eq!(&frame[2..], &[0, 0]);
        }
    }

    fn range(channels: u16, min: u32, max: u32, format: SampleFormat) -> SupportedStreamConfigRange {
        SupportedStreamConfigRange::new(
            channels,
            SampleRate(min),
            SampleRate(max),
            SupportedBufferSize::Unknown,
            format,
        )
    }

    #[test]
    fn test_pick_config_prefers_float_at_exact_rate() {
        let ranges = vec![
            range(2, 44100, 48000, SampleFormat::I16),
            range(2, 8000, 96000, SampleFormat::F32),
            range(8, 8000, 96000, SampleFormat::F32),
        ];
        let picked = pick_config(ranges, 48000, 2).unwrap();
        assert_eq!(picked.sample_format(), SampleFormat::F32);
        assert_eq!(picked.channels(), 2);
        assert_eq!(picked.sample_rate().0, 48000);
    }

    #[test]
    fn test_pick_config_rejects_unsupported_rate() {
        let ranges = vec![range(2, 44100, 44100, SampleFormat::F32)];
        assert!(pick_config(ranges, 48000, 2).is_none());
    }

    #[test]
    fn test_pick_config_respects_channel_minimum() {
        let ranges = vec![range(1, 8000, 48000, SampleFormat::F32)];
        assert!(pick_config(ranges.clone(), 48000, 2).is_none());
        assert_eq!(pick_config(ranges, 48000, 1).unwrap().channels(), 1);
    }
}
