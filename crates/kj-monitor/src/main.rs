//! kj-monitor - run the auto-kj monitor engine from the command line
//!
//! Opens the configured devices, monitors the mic, and optionally:
//! 1. Plays a backing track through a normal-priority source
//! 2. Plays a clip as speech (high priority, mic muted while it plays)
//! 3. Writes the 16kHz analysis stream to a WAV file
//!
//! Stats are logged every few seconds. Set RUST_LOG=debug for more detail.

mod cli;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use kj_core::audio::{get_devices, Backend, Direction, VirtualTransport};
use kj_core::config::load_settings;
use kj_core::engine::{Engine, SourcePriority, StatsSnapshot};
use kj_core::feed::{AnalysisRecorder, BlockFeeder, SpeechSession, WavClip};
use kj_core::StereoSample;

use cli::{Args, USAGE};

/// How often the main loop drains analysis frames
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How often stats are logged
const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// How long to wait for queued audio to play out after a feed completes
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    let args = match Args::parse(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            std::process::exit(2);
        }
    };
    if args.help {
        println!("{}", USAGE);
        return Ok(());
    }

    // Initialize logger - set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if args.list_devices {
        return list_devices();
    }

    let mut settings = load_settings(args.config.as_deref());
    args.apply(&mut settings);
    let backend = settings.backend;

    let engine = Engine::open(settings).context("Failed to open the engine")?;
    let rate = engine.sample_rate();

    // Decode up front so a bad file fails before any device is opened
    let track = args.play.as_deref().map(|p| load_clip(p, rate)).transpose()?;
    let speech = args.speak_wav.as_deref().map(|p| load_clip(p, rate)).transpose()?;
    let mut recorder = args
        .dump_analysis
        .as_deref()
        .map(|p| AnalysisRecorder::create(p, engine.analysis_sample_rate()))
        .transpose()?;

    let virtual_transport = if backend == Backend::Virtual {
        Some(engine.start_virtual()?)
    } else {
        engine.start().context("Failed to start audio")?;
        None
    };

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                        auto-kj monitor                       ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!(
        "  {} backend, {}Hz, {} frames, mode {}",
        backend,
        rate,
        engine.period_frames(),
        engine.mode()
    );

    let stop = Arc::new(AtomicBool::new(false));
    let nothing_to_play = track.is_none() && speech.is_none();
    if args.duration.is_none() && nothing_to_play {
        println!("  Press Enter to stop");
        let stop = Arc::clone(&stop);
        // Detached: a blocked stdin read must not hold up shutdown
        thread::spawn(move || {
            let mut line = String::new();
            let _ = std::io::stdin().read_line(&mut line);
            stop.store(true, Ordering::Release);
        });
    }

    let result = thread::scope(|s| {
        if let Some(transport) = virtual_transport.clone() {
            let stop = &stop;
            s.spawn(move || run_virtual_clock(&transport, stop));
        }

        let mut workers = Vec::new();
        if let Some(frames) = track.as_deref() {
            let (engine, stop) = (&engine, &stop);
            workers.push(("backing track", s.spawn(move || play_track(engine, frames, stop))));
        }
        if let Some(frames) = speech.as_deref() {
            let (engine, stop, delay) = (&engine, &stop, args.speak_delay());
            workers.push(("speech", s.spawn(move || speak(engine, frames, delay, stop))));
        }

        let result = monitor_loop(&engine, &args, &stop, recorder.as_mut(), || {
            !workers.is_empty() && workers.iter().all(|(_, h)| h.is_finished())
        });
        stop.store(true, Ordering::Release);

        for (name, worker) in workers {
            match worker.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::error!("{} failed: {:#}", name, e),
                Err(_) => log::error!("{} thread panicked", name),
            }
        }
        result
    });

    engine.stop()?;
    if let Some(recorder) = recorder {
        let frames = recorder.finalize()?;
        log::info!("Wrote {} analysis frames", frames);
    }
    log_stats(&engine.stats());
    result
}

/// Drain analysis frames and log stats until the run is over
fn monitor_loop<F>(
    engine: &Engine,
    args: &Args,
    stop: &AtomicBool,
    mut recorder: Option<&mut AnalysisRecorder>,
    workers_done: F,
) -> Result<()>
where
    F: Fn() -> bool,
{
    let started = Instant::now();
    let mut last_stats = started;

    loop {
        while let Some(frame) = engine.poll_analysis() {
            if let Some(recorder) = recorder.as_deref_mut() {
                recorder.write_frame(&frame)?;
            }
        }

        let finished = match args.duration {
            Some(limit) => started.elapsed() >= limit,
            None => workers_done(),
        };
        if finished || stop.load(Ordering::Acquire) {
            return Ok(());
        }

        if last_stats.elapsed() >= STATS_INTERVAL {
            log_stats(&engine.stats());
            last_stats = Instant::now();
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn load_clip(path: &Path, rate: u32) -> Result<Vec<StereoSample>> {
    let clip = WavClip::read(path)?;
    clip.to_engine_frames(rate)
        .with_context(|| format!("Failed to convert {:?} to {}Hz", path, rate))
}

fn play_track(engine: &Engine, frames: &[StereoSample], stop: &Arc<AtomicBool>) -> Result<()> {
    let handle = engine.register_source("backing-track", SourcePriority::Normal)?;
    let mut feeder = BlockFeeder::new(engine, handle).with_cancel(Arc::clone(stop));
    let outcome = feeder.feed(frames)?;
    if !outcome.is_cancelled() {
        feeder.wait_drained(DRAIN_TIMEOUT)?;
    }
    engine.unregister(handle)?;
    log::info!(
        "Backing track {} after {:.1}s",
        if outcome.is_cancelled() { "stopped" } else { "finished" },
        outcome.frames() as f32 / engine.sample_rate() as f32
    );
    Ok(())
}

fn speak(engine: &Engine, frames: &[StereoSample], delay: Duration, stop: &Arc<AtomicBool>) -> Result<()> {
    let start = Instant::now();
    while start.elapsed() < delay {
        if stop.load(Ordering::Acquire) {
            return Ok(());
        }
        thread::sleep(POLL_INTERVAL);
    }

    let session = SpeechSession::begin(engine, "speech")?;
    let outcome = session.speak(frames, Some(Arc::clone(stop)), DRAIN_TIMEOUT * 6)?;
    session.finish()?;
    log::info!("Speech clip done ({} frames)", outcome.frames());
    Ok(())
}

/// Stand-in for a device clock when running without audio hardware
fn run_virtual_clock(transport: &VirtualTransport, stop: &AtomicBool) {
    let frames = transport.period_frames() as usize;
    let period = Duration::from_secs_f64(frames as f64 / transport.sample_rate() as f64);
    let silence = vec![0.0f32; frames];
    let mut output = Vec::with_capacity(frames);
    let mut next = Instant::now();

    while !stop.load(Ordering::Acquire) {
        output.clear();
        if transport.run_period_into(Some(&silence), &mut output).is_err() {
            break;
        }
        next += period;
        if let Some(wait) = next.checked_duration_since(Instant::now()) {
            thread::sleep(wait);
        }
    }
}

fn log_stats(stats: &StatsSnapshot) {
    log::info!(
        "periods {} | underruns {} | overruns {} | analysis drops {} | peak {:.1} dBFS{}",
        stats.periods_processed,
        stats.underrun_count,
        stats.overrun_count,
        stats.analysis_drop_count,
        stats.peak_input_dbfs(),
        if stats.clip_active { " | clipping" } else { "" }
    );
}

fn list_devices() -> Result<()> {
    for direction in [Direction::Input, Direction::Output] {
        println!("{} devices:", direction.label());
        let devices = get_devices(direction)
            .with_context(|| format!("Failed to list {} devices", direction.label()))?;
        for device in devices {
            println!("  {}  [{}]", device, device.id.display_label());
        }
        println!();
    }
    Ok(())
}
