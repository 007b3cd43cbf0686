//! Command line flags
//!
//! Flags override the settings file, which overrides the defaults.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use kj_core::audio::{Backend, DeviceId};
use kj_core::config::{EngineSettings, MonitorMode};

pub const USAGE: &str = "\
Usage: kj-monitor [OPTIONS]

Options:
  --config <path>          Settings file (default ~/.auto-kj/engine.yaml)
  --backend <name>         cpal, jack or virtual
  --hardware               Hardware monitoring (interface monitors the mic)
  --software               Software monitoring through gain and reverb
  --gain <x>               Software mic gain (0-4)
  --wet <x>                Reverb wet ratio (0-1)
  --rate <hz>              Device sample rate
  --period <frames>        Frames per period
  --capture <name>         Capture device name
  --playback <name>        Playback device name
  --play <wav>             Backing track to play
  --speak-wav <wav>        Clip to play as speech (mic muted while it plays)
  --speak-at <secs>        Delay before the speech clip (default 2)
  --dump-analysis <wav>    Write the 16kHz analysis audio to a file
  --duration <secs>        Stop after this long (default: when playback ends)
  --list-devices           Print capture and playback devices and exit
  -h, --help               Show this help";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    pub config: Option<PathBuf>,
    pub backend: Option<Backend>,
    pub monitor_mode: Option<MonitorMode>,
    pub mic_gain: Option<f32>,
    pub reverb_wet: Option<f32>,
    pub sample_rate: Option<u32>,
    pub period_frames: Option<u32>,
    pub capture_device: Option<String>,
    pub playback_device: Option<String>,
    pub play: Option<PathBuf>,
    pub speak_wav: Option<PathBuf>,
    pub speak_at: Option<Duration>,
    pub dump_analysis: Option<PathBuf>,
    pub duration: Option<Duration>,
    pub list_devices: bool,
    pub help: bool,
}

impl Args {
    pub fn parse<I>(args: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Args::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            let mut value = |name: &str| {
                args.next()
                    .ok_or_else(|| format!("{} needs a value", name))
            };
            match arg.as_str() {
                "--config" => parsed.config = Some(PathBuf::from(value(&arg)?)),
                "--backend" => parsed.backend = Some(parse_value(&arg, &value(&arg)?)?),
                "--hardware" => parsed.monitor_mode = Some(MonitorMode::Hardware),
                "--software" => parsed.monitor_mode = Some(MonitorMode::Software),
                "--gain" => parsed.mic_gain = Some(parse_value(&arg, &value(&arg)?)?),
                "--wet" => parsed.reverb_wet = Some(parse_value(&arg, &value(&arg)?)?),
                "--rate" => parsed.sample_rate = Some(parse_value(&arg, &value(&arg)?)?),
                "--period" => parsed.period_frames = Some(parse_value(&arg, &value(&arg)?)?),
                "--capture" => parsed.capture_device = Some(value(&arg)?),
                "--playback" => parsed.playback_device = Some(value(&arg)?),
                "--play" => parsed.play = Some(PathBuf::from(value(&arg)?)),
                "--speak-wav" => parsed.speak_wav = Some(PathBuf::from(value(&arg)?)),
                "--speak-at" => parsed.speak_at = Some(parse_secs(&arg, &value(&arg)?)?),
                "--dump-analysis" => parsed.dump_analysis = Some(PathBuf::from(value(&arg)?)),
                "--duration" => parsed.duration = Some(parse_secs(&arg, &value(&arg)?)?),
                "--list-devices" => parsed.list_devices = true,
                "-h" | "--help" => parsed.help = true,
                other => return Err(format!("Unknown option '{}'", other)),
            }
        }

        Ok(parsed)
    }

    /// Apply the flags on top of loaded settings
    pub fn apply(&self, settings: &mut EngineSettings) {
        if let Some(backend) = self.backend {
            settings.backend = backend;
        }
        if let Some(mode) = self.monitor_mode {
            settings.mode.monitor_mode = mode;
        }
        if let Some(gain) = self.mic_gain {
            settings.mode.mic_gain = gain;
        }
        if let Some(wet) = self.reverb_wet {
            settings.mode.reverb_wet = wet;
        }
        if let Some(rate) = self.sample_rate {
            settings.mode.sample_rate = rate;
        }
        if let Some(period) = self.period_frames {
            settings.mode.period_frames = period;
        }
        if let Some(name) = &self.capture_device {
            settings.mode.capture_device = Some(DeviceId::new(name.as_str()));
        }
        if let Some(name) = &self.playback_device {
            settings.mode.playback_device = Some(DeviceId::new(name.as_str()));
        }
    }

    pub fn speak_delay(&self) -> Duration {
        self.speak_at.unwrap_or(Duration::from_secs(2))
    }
}

fn parse_value<T>(flag: &str, value: &str) -> Result<T, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| format!("Invalid value '{}' for {}: {}", value, flag, e))
}

fn parse_secs(flag: &str, value: &str) -> Result<Duration, String> {
    let secs: f64 = parse_value(flag, value)?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(format!("{} must be a non-negative number of seconds", flag));
    }
    Ok(Duration::from_secs_f64(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args, String> {
        Args::parse(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_full_command_line() {
        let args = parse(&[
            "--software", "--gain", "1.5", "--wet", "0.4", "--backend", "jack", "--period", "128",
            "--play", "song.wav", "--duration", "2.5", "--dump-analysis", "mic.wav",
        ])
        .unwrap();

        assert_eq!(args.monitor_mode, Some(MonitorMode::Software));
        assert_eq!(args.mic_gain, Some(1.5));
        assert_eq!(args.reverb_wet, Some(0.4));
        assert_eq!(args.backend, Some(Backend::Jack));
        assert_eq!(args.period_frames, Some(128));
        assert_eq!(args.play, Some(PathBuf::from("song.wav")));
        assert_eq!(args.duration, Some(Duration::from_millis(2500)));
        assert_eq!(args.dump_analysis, Some(PathBuf::from("mic.wav")));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse(&["--gain"]).unwrap_err().contains("needs a value"));
        assert!(parse(&["--gain", "loud"]).unwrap_err().contains("Invalid value"));
        assert!(parse(&["--duration", "-1"]).is_err());
        assert!(parse(&["--bogus"]).unwrap_err().contains("Unknown option"));
    }

    #[test]
    fn test_flags_override_settings() {
        let mut settings = EngineSettings::default();
        let args = parse(&["--software", "--wet", "0.1", "--capture", "USB Mic", "--rate", "96000"]).unwrap();
        args.apply(&mut settings);

        assert_eq!(settings.mode.monitor_mode, MonitorMode::Software);
        assert_eq!(settings.mode.reverb_wet, 0.1);
        assert_eq!(settings.mode.sample_rate, 96000);
        assert_eq!(settings.mode.capture_device, Some(DeviceId::new("USB Mic")));
        // Untouched fields keep their loaded values
        assert_eq!(settings.mode.mic_gain, EngineSettings::default().mode.mic_gain);
        assert_eq!(args.speak_delay(), Duration::from_secs(2));
    }
}
