//! Audio device enumeration and lookup
//!
//! Devices are enumerated from ALL available audio hosts (JACK, ALSA,
//! PulseAudio, etc.) so a capture interface and a playback interface can be
//! picked independently.
//!
//! On Linux with JACK running, JACK typically shows only one "device" (the JACK
//! server itself) while ALSA shows the individual hardware devices.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Host, HostId};

use super::config::DeviceId;
use super::error::{AudioError, AudioResult};

/// Capture or playback side of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    pub fn label(&self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }
}

/// Get a human-readable name for a host ID
fn host_name(host_id: HostId) -> String {
    let name = format!("{:?}", host_id);
    match name.as_str() {
        "Alsa" => "ALSA".to_string(),
        "Jack" => "JACK".to_string(),
        "Wasapi" => "WASAPI".to_string(),
        _ => name,
    }
}

/// Get a host by its name string
fn get_host_by_name(name: &str) -> Option<Host> {
    cpal::available_hosts()
        .into_iter()
        .find(|id| host_name(*id) == name)
        .and_then(|id| cpal::host_from_id(id).ok())
}

fn devices_of(host: &Host, direction: Direction) -> Option<Vec<cpal::Device>> {
    let devices = match direction {
        Direction::Input => host.input_devices().map(|d| d.collect()),
        Direction::Output => host.output_devices().map(|d| d.collect()),
    };
    match devices {
        Ok(d) => Some(d),
        Err(e) => {
            log::debug!("Could not enumerate {} devices: {}", direction.label(), e);
            None
        }
    }
}

/// Information about an audio device
#[derive(Debug, Clone)]
pub struct AudioDevice {
    /// Device identifier for configuration (includes host info)
    pub id: DeviceId,
    pub name: String,
    /// Host backend name (e.g., "ALSA", "JACK")
    pub host: String,
    pub direction: Direction,
    /// Whether this is the system default device for its host
    pub is_default: bool,
    /// Supported sample rates (common ones)
    pub sample_rates: Vec<u32>,
    pub max_channels: u16,
}

impl std::fmt::Display for AudioDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.host, self.name)?;
        if self.is_default {
            write!(f, " (default)")?;
        }
        Ok(())
    }
}

/// Every device that can capture (`Input`) or play back (`Output`), across all hosts
pub fn get_devices(direction: Direction) -> AudioResult<Vec<AudioDevice>> {
    let mut all_devices: Vec<AudioDevice> = Vec::new();

    for host_id in cpal::available_hosts() {
        let host = match cpal::host_from_id(host_id) {
            Ok(h) => h,
            Err(e) => {
                log::debug!("Could not initialize host {:?}: {}", host_id, e);
                continue;
            }
        };
        let host_label = host_name(host_id);

        let default_name = match direction {
            Direction::Input => host.default_input_device(),
            Direction::Output => host.default_output_device(),
        }
        .and_then(|d| d.name().ok());

        let Some(devices) = devices_of(&host, direction) else {
            continue;
        };

        for device in devices {
            let Ok(name) = device.name() else {
                continue;
            };

            let ranges: Vec<(u16, u32, u32)> = match direction {
                Direction::Input => device.supported_input_configs().map(|c| {
                    c.map(|r| (r.channels(), r.min_sample_rate().0, r.max_sample_rate().0))
                        .collect()
                }),
                Direction::Output => device.supported_output_configs().map(|c| {
                    c.map(|r| (r.channels(), r.min_sample_rate().0, r.max_sample_rate().0))
                        .collect()
                }),
            }
            .unwrap_or_default();

            if ranges.is_empty() {
                continue;
            }

            let mut sample_rates: Vec<u32> = Vec::new();
            let mut max_channels: u16 = 0;
            for &(channels, min, max) in &ranges {
                max_channels = max_channels.max(channels);
                for rate in [16000, 22050, 44100, 48000, 88200, 96000, 192000] {
                    if (min..=max).contains(&rate) && !sample_rates.contains(&rate) {
                        sample_rates.push(rate);
                    }
                }
            }
            sample_rates.sort_unstable();

            all_devices.push(AudioDevice {
                id: DeviceId::with_host(&name, &host_label),
                is_default: default_name.as_ref() == Some(&name),
                name,
                host: host_label.clone(),
                direction,
                sample_rates,
                max_channels,
            });
        }
    }

    if all_devices.is_empty() {
        return Err(AudioError::NoDevices);
    }

    // Default devices first, then by host, then by name
    all_devices.sort_by(|a, b| {
        b.is_default
            .cmp(&a.is_default)
            .then_with(|| a.host.cmp(&b.host))
            .then_with(|| a.name.cmp(&b.name))
    });

    log::debug!(
        "Enumerated {} {} devices",
        all_devices.len(),
        direction.label()
    );
    Ok(all_devices)
}

/// Find a device by its ID
///
/// Uses the host named in the DeviceId if there is one, otherwise searches
/// every available host.
pub fn find_device(id: &DeviceId, direction: Direction) -> AudioResult<cpal::Device> {
    let matches = |d: &cpal::Device| d.name().ok().as_deref() == Some(id.name.as_str());

    if let Some(host) = id.host.as_deref().and_then(get_host_by_name) {
        return devices_of(&host, direction)
            .and_then(|devices| devices.into_iter().find(matches))
            .ok_or_else(|| AudioError::DeviceNotFound(id.display_label()));
    }

    for host_id in cpal::available_hosts() {
        let Ok(host) = cpal::host_from_id(host_id) else {
            continue;
        };
        if let Some(device) = devices_of(&host, direction).and_then(|d| d.into_iter().find(matches)) {
            return Ok(device);
        }
    }

    Err(AudioError::DeviceNotFound(id.display_label()))
}

/// The requested device, or the default host's default for that direction
pub fn open_device(id: Option<&DeviceId>, direction: Direction) -> AudioResult<cpal::Device> {
    match id {
        Some(id) => find_device(id, direction),
        None => {
            let host = cpal::default_host();
            match direction {
                Direction::Input => host.default_input_device(),
                Direction::Output => host.default_output_device(),
            }
            .ok_or(AudioError::NoDefaultDevice(direction.label()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_enumeration() {
        // Hosts without audio hardware report NoDevices
        for direction in [Direction::Input, Direction::Output] {
            match get_devices(direction) {
                Ok(devices) => {
                    for device in &devices {
                        assert_eq!(device.direction, direction);
                        assert!(device.max_channels > 0, "{} has no channels", device);
                    }
                }
                Err(AudioError::NoDevices) => {}
                Err(e) => println!("Error enumerating devices: {}", e),
            }
        }
    }

    #[test]
    fn test_unknown_device_is_not_found() {
        let id = DeviceId::with_host("no-such-device-kj", "ALSA");
        assert!(find_device(&id, Direction::Output).is_err());
    }
}
