//! Engine configuration
//!
//! - [`ModeConfig`]: the run-time monitor surface accepted by `Engine::configure`
//! - [`EngineSettings`]: everything needed to open the engine, stored as YAML
//! - [`ConfigError`]: why a configuration was rejected
//!
//! # Usage
//!
//! ```ignore
//! use kj_core::config::{load_settings, save_config, default_settings_path};
//!
//! // ~/.auto-kj/engine.yaml plus AUTOKJ_* environment overrides
//! let settings = load_settings(None);
//! settings.validate()?;
//!
//! save_config(&settings, &default_settings_path())?;
//! ```

mod error;
mod io;
mod mode;
mod paths;
mod settings;

pub use error::ConfigError;
pub use io::{load_config, load_settings, save_config};
pub use mode::{ModeConfig, MonitorMode, MAX_MIC_GAIN, MAX_SAMPLE_RATE, MIN_SAMPLE_RATE};
pub use paths::{auto_kj_dir, default_settings_path, SETTINGS_FILE};
pub use settings::{
    EngineLimits, EngineSettings, DEFAULT_ANALYSIS_FRAME_LEN, ENV_CAPTURE_DEVICE, ENV_MIC_GAIN,
    ENV_MONITOR_MODE, ENV_PERIOD, ENV_PLAYBACK_DEVICE, ENV_REVERB_WET, ENV_SAMPLE_RATE,
};
