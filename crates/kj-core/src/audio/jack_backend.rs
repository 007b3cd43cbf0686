//! Native JACK transport for Linux
//!
//! One client, `auto-kj`, with a mono `mic_in` port and a stereo pair of
//! outputs. JACK delivers capture and playback in the same process callback, so
//! there is no capture ring and no drift.
//!
//! ```text
//!  zita-a2j:capture_1 ──► auto-kj:mic_in
//!                              │
//!                       ┌──────▼──────┐
//!                       │  processor  │  (owned by the JACK RT thread)
//!                       └──┬───────┬──┘
//!          auto-kj:out_left      auto-kj:out_right ──► system:playback_1/2
//! ```
//!
//! The server's rate and period are fixed by jackd; if they differ from the
//! configuration the transport refuses to start. Xruns reported by the server
//! are counted as underruns.

use std::sync::Arc;

use jack::{AudioIn, AudioOut, Client, ClientOptions, Control, Port, PortFlags, ProcessScope};

use super::config::TransportConfig;
use super::error::AudioError;
use super::jack_server::JackServer;
use crate::config::ConfigError;
use crate::engine::{EngineResult, EngineStats, ProcessorSlot};
use crate::types::MAX_PERIOD_FRAMES;

/// JACK client name
pub const CLIENT_NAME: &str = "auto-kj";

/// JACK port names
const MIC_IN: &str = "mic_in";
const OUT_LEFT: &str = "out_left";
const OUT_RIGHT: &str = "out_right";

/// Running JACK client (and the server, if the engine launched it)
pub struct JackTransport {
    client: Option<jack::AsyncClient<JackNotifications, JackProcess>>,
    /// Dropped after the client so the server outlives it
    server: Option<JackServer>,
    sample_rate: u32,
    period_frames: u32,
}

impl JackTransport {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn period_frames(&self) -> u32 {
        self.period_frames
    }

    /// Deactivate the client and stop a managed server
    pub fn stop(&mut self) {
        if let Some(client) = self.client.take() {
            match client.deactivate() {
                // The process handler (and its processor slot) is dropped here
                Ok((client, _notifications, process)) => {
                    drop(process);
                    drop(client);
                    log::info!("JACK client deactivated");
                }
                Err(e) => log::error!("Failed to deactivate JACK client: {}", e),
            }
        }
        if let Some(mut server) = self.server.take() {
            server.shutdown();
        }
    }
}

impl Drop for JackTransport {
    fn drop(&mut self) {
        self.stop();
    }
}

/// JACK process handler: owns the processor, no locks
struct JackProcess {
    mic_in: Port<AudioIn>,
    out_left: Port<AudioOut>,
    out_right: Port<AudioOut>,
    slot: ProcessorSlot,
}

impl jack::ProcessHandler for JackProcess {
    fn process(&mut self, _client: &Client, ps: &ProcessScope) -> Control {
        let mic = self.mic_in.as_slice(ps);
        let left = self.out_left.as_mut_slice(ps);
        let right = self.out_right.as_mut_slice(ps);

        let max = MAX_PERIOD_FRAMES as usize;
        for ((mic, left), right) in mic
            .chunks(max)
            .zip(left.chunks_mut(max))
            .zip(right.chunks_mut(max))
        {
            let out = self.slot.process(mic.len(), Some(mic));
            for ((l, r), sample) in left.iter_mut().zip(right.iter_mut()).zip(out.iter()) {
                *l = sample.left;
                *r = sample.right;
            }
        }

        Control::Continue
    }
}

/// JACK notification handler (runs off the RT thread)
struct JackNotifications {
    stats: Arc<EngineStats>,
}

impl jack::NotificationHandler for JackNotifications {
    fn sample_rate(&mut self, _client: &Client, srate: jack::Frames) -> Control {
        log::info!("JACK sample rate is {}Hz", srate);
        Control::Continue
    }

    fn xrun(&mut self, _client: &Client) -> Control {
        self.stats.record_underrun();
        log::warn!("JACK xrun");
        Control::Continue
    }

    fn shutdown(&mut self, _status: jack::ClientStatus, reason: &str) {
        log::error!("JACK server shut down: {}", reason);
    }
}

/// Connect to (or launch) the JACK server and start processing
pub fn start(
    config: &TransportConfig,
    slot: ProcessorSlot,
    stats: Arc<EngineStats>,
) -> EngineResult<JackTransport> {
    let server = match &config.jack_server {
        Some(server_config) => Some(JackServer::start(
            server_config,
            config.sample_rate,
            config.period_frames,
        )?),
        None => None,
    };

    let (client, _status) = Client::new(CLIENT_NAME, ClientOptions::NO_START_SERVER)
        .map_err(|e| AudioError::Jack(format!("Failed to create JACK client: {}", e)))?;
    let client_name = client.name().to_string();

    let sample_rate = client.sample_rate() as u32;
    let period_frames = client.buffer_size();
    if sample_rate != config.sample_rate || period_frames != config.period_frames {
        return Err(ConfigError::Device(format!(
            "JACK server runs at {}Hz / {} frames but the engine is configured for {}Hz / {} frames",
            sample_rate, period_frames, config.sample_rate, config.period_frames
        ))
        .into());
    }

    log::info!(
        "JACK client '{}' created ({}Hz, {} frames, {:.1}ms)",
        client_name,
        sample_rate,
        period_frames,
        config.period_ms()
    );

    let register_err = |e: jack::Error| AudioError::Jack(format!("Failed to register port: {}", e));
    let mic_in = client.register_port(MIC_IN, AudioIn::default()).map_err(register_err)?;
    let out_left = client.register_port(OUT_LEFT, AudioOut::default()).map_err(register_err)?;
    let out_right = client.register_port(OUT_RIGHT, AudioOut::default()).map_err(register_err)?;

    let process = JackProcess {
        mic_in,
        out_left,
        out_right,
        slot,
    };
    let async_client = client
        .activate_async(JackNotifications { stats }, process)
        .map_err(|e| AudioError::Jack(format!("Failed to activate JACK client: {}", e)))?;

    log::info!("JACK client activated");
    connect_ports(async_client.as_client(), &client_name, config);

    Ok(JackTransport {
        client: Some(async_client),
        server,
        sample_rate,
        period_frames,
    })
}

/// Wire the mic bridge into `mic_in` and the outputs to the playback ports
///
/// Missing ports are logged, not fatal: the rig may be patched by hand.
fn connect_ports(client: &Client, client_name: &str, config: &TransportConfig) {
    let mic_in = format!("{}:{}", client_name, MIC_IN);
    let capture_pattern = config
        .capture_device
        .as_ref()
        .map(|d| d.name.clone())
        .unwrap_or_else(|| "zita-a2j".to_string());

    let mut sources = client.ports(Some(&capture_pattern), None, PortFlags::IS_OUTPUT);
    if sources.is_empty() {
        sources = client.ports(Some("system:capture_.*"), None, PortFlags::IS_OUTPUT);
    }
    match sources.first() {
        Some(source) => match client.connect_ports_by_name(source, &mic_in) {
            Ok(()) => log::info!("Connected {} -> {}", source, mic_in),
            Err(e) => log::warn!("Could not connect {} -> {}: {}", source, mic_in, e),
        },
        None => log::warn!("No capture port found for {}", mic_in),
    }

    let playback_pattern = config
        .playback_device
        .as_ref()
        .map(|d| d.name.clone())
        .unwrap_or_else(|| "system:playback_.*".to_string());
    let mut sinks = client.ports(Some(&playback_pattern), None, PortFlags::IS_INPUT);
    sinks.sort();
    if sinks.is_empty() {
        log::warn!("No JACK playback ports match '{}'", playback_pattern);
        return;
    }

    // A mono sink gets both sides
    let left_sink = &sinks[0];
    let right_sink = sinks.get(1).unwrap_or(left_sink);
    for (port, sink) in [(OUT_LEFT, left_sink), (OUT_RIGHT, right_sink)] {
        let ours = format!("{}:{}", client_name, port);
        match client.connect_ports_by_name(&ours, sink) {
            Ok(()) => log::info!("Connected {} -> {}", ours, sink),
            Err(e) => log::warn!("Could not connect {} -> {}: {}", ours, sink, e),
        }
    }
}
