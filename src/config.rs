//! Configuration system using TOML files.
//!
//! Mirrors the layered `Config` shape of the donor's `config.rs`: a single
//! `serde`-derived struct with `#[serde(default)]` substructs, persisted
//! under the OS config directory and loaded leniently — a missing or
//! unparsable file never aborts startup.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const APP_DIR: &str = "tuneforge";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub plugin_host: PluginHostConfig,
    #[serde(default)]
    pub audio: AudioConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Configured scan roots (the Indexer's `paths` table is seeded from
    /// these on startup via `add_path`).
    pub paths: Vec<PathBuf>,
    /// Seconds to sleep between scans once idle; 0 means wait indefinitely
    /// until `restart_sync` is signalled.
    pub sync_timeout_seconds: u64,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            sync_timeout_seconds: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginHostConfig {
    /// Directory scanned for shared-library plugins at startup.
    pub plugin_dir: Option<PathBuf>,
    /// Directory holding per-component preference files.
    pub preferences_dir: Option<PathBuf>,
}

impl Default for PluginHostConfig {
    fn default() -> Self {
        Self {
            plugin_dir: None,
            preferences_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output device name override; `None` selects the system default.
    pub output_device: Option<String>,
    pub default_volume: f32,
    /// Crossfade duration in seconds; 0 selects pure gapless handoff.
    pub crossfade_seconds: f32,
    /// Last-used repeat mode, persisted across restarts (§4.7
    /// "Persistence"): one of `"none"`, `"track"`, `"list"`.
    pub repeat_mode: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            output_device: None,
            default_volume: 1.0,
            crossfade_seconds: 0.0,
            repeat_mode: "none".to_string(),
        }
    }
}

impl Config {
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR))
    }

    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join(CONFIG_FILE))
    }

    /// Load configuration from disk, falling back to defaults if the file
    /// is missing or fails to parse. Never fails the process.
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            tracing::warn!("could not determine config directory; using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "loaded configuration");
                    config
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file found, using defaults");
                Self::default()
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read config, using defaults");
                Self::default()
            }
        }
    }

    /// Persist configuration atomically (write to a temp file, then rename).
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()
            .ok_or_else(|| Error::config("could not determine config directory"))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents =
            toml::to_string_pretty(self).map_err(|e| Error::config(format!("serialize: {e}")))?;
        let tmp_path = path.with_extension("toml.tmp");
        std::fs::write(&tmp_path, contents)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    /// Directory holding the database, `thumbs/`, and preference files for
    /// a given library id (§6: "Configured paths").
    pub fn library_dir(library_id: &str) -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join(APP_DIR).join(library_id))
    }
}

pub fn thumbs_dir(library_dir: &Path) -> PathBuf {
    library_dir.join("thumbs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_fallbacks() {
        let config = Config::default();
        assert!(config.library.paths.is_empty());
        assert_eq!(config.library.sync_timeout_seconds, 3600);
        assert_eq!(config.audio.default_volume, 1.0);
    }

    #[test]
    fn round_trips_through_toml() {
        let mut config = Config::default();
        config.library.paths.push(PathBuf::from("/music"));
        config.audio.crossfade_seconds = 2.5;

        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.library.paths, vec![PathBuf::from("/music")]);
        assert_eq!(parsed.audio.crossfade_seconds, 2.5);
    }

    #[test]
    fn thumbs_dir_is_nested_under_library_dir() {
        let lib = PathBuf::from("/data/tuneforge/mylib");
        assert_eq!(thumbs_dir(&lib), PathBuf::from("/data/tuneforge/mylib/thumbs"));
    }
}
