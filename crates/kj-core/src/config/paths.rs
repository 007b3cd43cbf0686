//! Standard locations for auto-kj files

use std::path::PathBuf;

/// Settings file name inside the auto-kj directory
pub const SETTINGS_FILE: &str = "engine.yaml";

/// `~/.auto-kj`, shared with the song cache
pub fn auto_kj_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".auto-kj")
}

/// `~/.auto-kj/engine.yaml`
pub fn default_settings_path() -> PathBuf {
    auto_kj_dir().join(SETTINGS_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_path_layout() {
        let path = default_settings_path();
        assert!(path.ends_with(".auto-kj/engine.yaml"), "{:?}", path);
    }
}
