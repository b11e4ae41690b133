use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::model::terrain::DetailLevel;

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "STARFRAME_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "starframe.ron";

/// Engine settings, loaded once per process and handed to subsystems by reference.
///
/// Usage:
///   // defaults
///   let config = GameConfig::default();
///
///   // or from a RON file, missing fields fall back to defaults:
///   //   (max_physics_cycles_per_render: 6, detail_planets: High)
///   let config = GameConfig::load("starframe.ron")?;
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Upper bound of physics steps per rendered frame
    pub max_physics_cycles_per_render: u32,
    /// Wall-clock delta is clamped to this before accumulation (seconds)
    pub max_frame_time: f64,
    /// Physics steps per simulated second at 1x
    pub physics_hz: f64,
    pub detail_planets: DetailLevel,
    /// 0 = hardware concurrency minus one
    pub worker_threads: usize,
    /// Short same-thread jobs run per frame
    pub sync_jobs_per_loop: usize,
    pub save_dir: PathBuf,
    /// Try to write an exit save when a game ends
    pub autosave_on_exit: bool,
    pub enable_joystick: bool,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            max_physics_cycles_per_render: 4,
            max_frame_time: 0.25,
            physics_hz: 60.0,
            detail_planets: DetailLevel::Medium,
            worker_threads: 0,
            sync_jobs_per_loop: 1,
            save_dir: PathBuf::from("savefiles"),
            autosave_on_exit: true,
            enable_joystick: true,
        }
    }
}

impl GameConfig {
    /// Load from a RON file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io { path: path.to_path_buf(), source });
            }
        };

        let config: GameConfig = ron::from_str(&text)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        tracing::info!(path = %path.display(), "loaded config");
        Ok(config.sanitized())
    }

    /// Load from the file named by `STARFRAME_CONFIG` (or `starframe.ron`)
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = env::var(CONFIG_ENV_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load(path)
    }

    /// Number of background worker threads to spawn
    pub fn worker_count(&self) -> usize {
        if self.worker_threads > 0 {
            return self.worker_threads;
        }
        let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        cores.saturating_sub(1).max(1)
    }

    /// Replace out-of-range values with their defaults
    fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if self.max_physics_cycles_per_render == 0 {
            self.max_physics_cycles_per_render = defaults.max_physics_cycles_per_render;
        }
        if !(self.max_frame_time > 0.0) {
            self.max_frame_time = defaults.max_frame_time;
        }
        if !(self.physics_hz > 0.0) {
            self.physics_hz = defaults.physics_hz;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = GameConfig::load(dir.path().join("nope.ron")).unwrap();
        assert_eq!(config, GameConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("starframe.ron");
        fs::write(&path, "(max_physics_cycles_per_render: 6, detail_planets: High)").unwrap();

        let config = GameConfig::load(&path).unwrap();
        assert_eq!(config.max_physics_cycles_per_render, 6);
        assert_eq!(config.detail_planets, DetailLevel::High);
        assert_eq!(config.physics_hz, 60.0);
    }

    #[test]
    fn test_zero_cycles_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("starframe.ron");
        fs::write(&path, "(max_physics_cycles_per_render: 0)").unwrap();

        let config = GameConfig::load(&path).unwrap();
        assert_eq!(config.max_physics_cycles_per_render, 4);
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("starframe.ron");
        fs::write(&path, "(max_physics_cycles_per_render: \"lots\"").unwrap();

        assert!(matches!(GameConfig::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_written_config_only_has_used_settings() {
        let text = ron::to_string(&GameConfig::default()).unwrap();
        assert!(text.contains("enable_joystick"));
        assert!(!text.contains("sound"));
        assert_eq!(ron::from_str::<GameConfig>(&text).unwrap(), GameConfig::default());
    }

    #[test]
    fn test_worker_count_at_least_one() {
        let config = GameConfig::default();
        assert!(config.worker_count() >= 1);
        let config = GameConfig { worker_threads: 3, ..GameConfig::default() };
        assert_eq!(config.worker_count(), 3);
    }
}
