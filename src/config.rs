//! Daemon configuration, loaded from a YAML file.
//!
//! Grounded on the teacher's `Config::load` split between a dev-mode
//! environment and a release-mode file on disk; this crate has no secrets
//! to keep out of source control, so it collapses that split into a single
//! YAML loader with sensible defaults for anything the file omits.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Root of the on-disk disc library.
    #[serde(default = "default_library_root")]
    pub library_root: PathBuf,

    /// Name of the cpal output device to use, or the host default if unset.
    #[serde(default)]
    pub device_name: Option<String>,

    /// Target packet rate handed to the packetiser.
    #[serde(default = "default_packets_per_second")]
    pub packets_per_second: u32,

    /// Capacity of the queue between the source-thread and the sink-thread.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Configured internet radio stations, in station-list order.
    #[serde(default)]
    pub stations: Vec<StationConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StationConfig {
    pub name: String,
    pub url: String,
}

fn default_library_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("spindled")
}

fn default_packets_per_second() -> u32 {
    5
}

fn default_queue_capacity() -> usize {
    100
}

impl Config {
    /// Load from `path`, falling back to defaults for every field if no
    /// file exists there yet rather than failing the daemon's startup.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file found, using defaults");
                Ok(Config::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            library_root: default_library_root(),
            device_name: None,
            packets_per_second: default_packets_per_second(),
            queue_capacity: default_queue_capacity(),
            stations: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_falls_back_to_defaults_when_file_is_missing() {
        let cfg = Config::load(Path::new("/nonexistent/spindled-test-config.yaml")).unwrap();
        assert_eq!(cfg.packets_per_second, 5);
        assert!(cfg.stations.is_empty());
    }

    #[test]
    fn load_parses_a_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "library_root: /mnt/discs\npackets_per_second: 20\nstations:\n  - name: Example\n    url: http://example.invalid/stream\n",
        )
        .unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.library_root, PathBuf::from("/mnt/discs"));
        assert_eq!(cfg.packets_per_second, 20);
        assert_eq!(cfg.stations.len(), 1);
        assert_eq!(cfg.stations[0].name, "Example");
    }
}
