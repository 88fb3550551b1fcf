//! Stage extraction settings.
//!
//! Settings are plain data and can be loaded from TOML:
//!
//! ```toml
//! uv_primvars = ["st", "uv"]
//! path_index = true
//! log_build_stats = false
//! ```

use std::path::Path;

use serde::Deserialize;

/// Tunables for cache population.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Primvar names probed for texture coordinates, first present wins.
    /// Names are given without the `primvars:` namespace.
    pub uv_primvars: Vec<String>,
    /// Build a path-to-index map alongside each traversal. When false, path
    /// lookups scan the cached sequence linearly. Results are identical.
    pub path_index: bool,
    /// Log per-domain record counts at `info` level after each build
    /// (they are always logged at `debug`).
    pub log_build_stats: bool,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            uv_primvars: vec!["st".into()],
            path_index: true,
            log_build_stats: false,
        }
    }
}

impl StageConfig {
    /// Parses a config from TOML text. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| format!("failed to parse stage config: {e}"))
    }

    /// Loads a config from a TOML file.
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
        toml::from_str(&content).map_err(|e| format!("failed to parse {}: {e}", path.display()))
    }

    /// Loads a config, falling back to defaults if the file is missing or invalid.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("No stage config ({e}), using defaults");
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_is_default() {
        assert_eq!(StageConfig::from_toml_str("").unwrap(), StageConfig::default());
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config = StageConfig::from_toml_str("uv_primvars = [\"uv\", \"st\"]").unwrap();
        assert_eq!(config.uv_primvars, vec!["uv".to_string(), "st".to_string()]);
        assert!(config.path_index);
        assert!(!config.log_build_stats);
    }

    #[test]
    fn invalid_toml_is_reported() {
        let err = StageConfig::from_toml_str("path_index = \"yes\"").unwrap_err();
        assert!(err.starts_with("failed to parse stage config"));
    }

    #[test]
    fn missing_file_falls_back() {
        let config = StageConfig::load_or_default(Path::new("/nonexistent/stage.toml"));
        assert_eq!(config, StageConfig::default());
    }
}
