//! Capture/playback transports for the engine
//!
//! Provides one processing contract over several backends:
//! - **cpal**: separate capture and playback streams on any platform
//! - **JACK** (Linux, `jack-backend` feature): a native client with `mic_in`,
//!   `out_left` and `out_right` ports, optionally launching jackd and zita-a2j
//! - **virtual**: no devices; the caller runs each period (tests, offline use)
//!
//! # Architecture
//!
//! The audio thread owns the engine's processor exclusively:
//!
//! - **Control threads**: publish mode snapshots and source commands lock-free
//! - **Audio thread**: drains commands, runs one period, writes the device buffer
//! - **Atomics**: counters are read back through `Engine::stats()`
//!
//! # Example Usage
//!
//! ```ignore
//! use kj_core::audio::{get_devices, Direction};
//!
//! for device in get_devices(Direction::Input)? {
//!     println!("{} -> {}", device, device.id.display_label());
//! }
//! ```

mod backend;
mod config;
mod cpal_backend;
mod device;
mod error;
mod jack_server;
mod virtual_backend;

#[cfg(all(target_os = "linux", feature = "jack-backend"))]
mod jack_backend;

pub use backend::{start_transport, TransportHandle};
pub use config::{Backend, DeviceId, TransportConfig};
pub use cpal_backend::CpalTransport;
pub use device::{find_device, get_devices, open_device, AudioDevice, Direction};
pub use error::{AudioError, AudioResult};
pub use jack_server::{JackServerConfig, PROBE_CLIENT_NAME};
pub use virtual_backend::VirtualTransport;

#[cfg(all(target_os = "linux", feature = "jack-backend"))]
pub use jack_backend::{JackTransport, CLIENT_NAME as JACK_CLIENT_NAME};

#[cfg(all(target_os = "linux", feature = "jack-backend"))]
pub use jack_server::JackServer;
