//! YAML settings I/O
//!
//! A missing or unreadable file never stops the engine from starting: the
//! loader falls back to defaults and says so in the log.

use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::paths::default_settings_path;
use super::settings::EngineSettings;

/// Load a YAML file into `T`, or `T::default()` if it is missing or invalid
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        log::info!("No settings at {:?}, using defaults", path);
        return T::default();
    }

    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            log::warn!("Could not read {:?}: {}, using defaults", path, e);
            return T::default();
        }
    };

    match serde_yaml::from_str::<T>(&contents) {
        Ok(config) => {
            log::info!("Loaded settings from {:?}", path);
            config
        }
        Err(e) => {
            log::warn!("Could not parse {:?}: {}, using defaults", path, e);
            T::default()
        }
    }
}

/// Write `config` as YAML, creating parent directories as needed
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create settings directory {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize settings")?;
    std::fs::write(path, yaml).with_context(|| format!("Failed to write {:?}", path))?;

    log::info!("Saved settings to {:?}", path);
    Ok(())
}

/// Load engine settings from `path` (or the default location) and apply `AUTOKJ_*` overrides
pub fn load_settings(path: Option<&Path>) -> EngineSettings {
    let mut settings: EngineSettings = match path {
        Some(path) => load_config(path),
        None => load_config(&default_settings_path()),
    };
    settings.apply_env_overrides();
    settings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorMode;

    #[test]
    fn test_missing_file_gives_defaults() {
        let settings: EngineSettings = load_config(Path::new("/nonexistent/auto-kj/engine.yaml"));
        assert_eq!(settings, EngineSettings::default());
    }

    #[test]
    fn test_invalid_yaml_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");
        std::fs::write(&path, "mode: [this is not a mapping").unwrap();

        let settings: EngineSettings = load_config(&path);
        assert_eq!(settings, EngineSettings::default());
    }

    #[test]
    fn test_settings_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("engine.yaml");

        let mut settings = EngineSettings::default();
        settings.mode.monitor_mode = MonitorMode::Software;
        settings.mode.reverb_wet = 0.45;
        settings.limits.max_sources = 3;

        save_config(&settings, &path).unwrap();
        let loaded: EngineSettings = load_config(&path);

        assert_eq!(loaded, settings);
    }
}
