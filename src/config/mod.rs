use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::error::ConfigError;

/// Player configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Volume applied at startup, 0-100
    pub default_volume: u8,
    pub preferred_device: Option<String>,
    pub buffer_capacity_secs: f64,
    pub low_watermark_secs: f64,
    pub high_watermark_secs: f64,
    pub tick_interval_ms: u64,
    pub read_ahead_bytes: usize,
    pub flow_control_sleep_ms: u64,
    pub max_resync_bytes: usize,
    /// Root directory the file stream provider resolves track ids against
    pub library_root: PathBuf,
    pub advance_on_failure: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            default_volume: 80,
            preferred_device: None,
            buffer_capacity_secs: 20.0,
            low_watermark_secs: 0.5,
            high_watermark_secs: 4.0,
            tick_interval_ms: 250,
            read_ahead_bytes: 4096,
            flow_control_sleep_ms: 50,
            max_resync_bytes: 64 * 1024,
            library_root: dirs::audio_dir()
                .or_else(dirs::home_dir)
                .unwrap_or_else(|| PathBuf::from(".")),
            advance_on_failure: false,
        }
    }
}

/// Buffered-duration thresholds used by the supervisory tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Watermarks {
    pub low: Duration,
    pub high: Duration,
}

impl Default for Watermarks {
    fn default() -> Self {
        Self {
            low: Duration::from_millis(500),
            high: Duration::from_secs(4),
        }
    }
}

/// Typed, validated engine parameters derived from [`PlayerConfig`]
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub buffer_capacity: Duration,
    pub watermarks: Watermarks,
    pub tick_interval: Duration,
    pub read_ahead_bytes: usize,
    pub flow_control_sleep: Duration,
    pub max_resync_bytes: usize,
    pub initial_volume: u8,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            buffer_capacity: Duration::from_secs(20),
            watermarks: Watermarks::default(),
            tick_interval: Duration::from_millis(250),
            read_ahead_bytes: 4096,
            flow_control_sleep: Duration::from_millis(50),
            max_resync_bytes: 64 * 1024,
            initial_volume: 80,
        }
    }
}

impl EngineSettings {
    /// Free space the decode loop keeps in the buffer. Filling stops
    /// halfway between the high watermark and capacity at the latest, so a
    /// loading stream always gets above the high watermark.
    pub fn fill_margin(&self) -> Duration {
        let headroom = self.buffer_capacity.saturating_sub(self.watermarks.high);
        self.watermarks.high.min(headroom / 2)
    }

    pub fn from_config(config: &PlayerConfig) -> Result<Self, ConfigError> {
        let secs = |name: &str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(Duration::from_secs_f64(value))
            } else {
                Err(ConfigError::Invalid(format!("{} must be a positive number of seconds", name)))
            }
        };

        let settings = Self {
            buffer_capacity: secs("buffer_capacity_secs", config.buffer_capacity_secs)?,
            watermarks: Watermarks {
                low: secs("low_watermark_secs", config.low_watermark_secs)?,
                high: secs("high_watermark_secs", config.high_watermark_secs)?,
            },
            tick_interval: Duration::from_millis(config.tick_interval_ms),
            read_ahead_bytes: config.read_ahead_bytes,
            flow_control_sleep: Duration::from_millis(config.flow_control_sleep_ms),
            max_resync_bytes: config.max_resync_bytes,
            initial_volume: config.default_volume,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watermarks.low >= self.watermarks.high {
            return Err(ConfigError::Invalid(format!(
                "low watermark ({:?}) must be below high watermark ({:?})",
                self.watermarks.low, self.watermarks.high
            )));
        }
        if self.watermarks.high >= self.buffer_capacity {
            return Err(ConfigError::Invalid(format!(
                "high watermark ({:?}) must be below buffer capacity ({:?})",
                self.watermarks.high, self.buffer_capacity
            )));
        }
        if self.tick_interval.is_zero() {
            return Err(ConfigError::Invalid("tick interval must be non-zero".to_string()));
        }
        if self.read_ahead_bytes == 0 {
            return Err(ConfigError::Invalid("read-ahead buffer must be non-empty".to_string()));
        }
        if self.initial_volume > 100 {
            return Err(ConfigError::Invalid(format!(
                "default volume {} is above 100",
                self.initial_volume
            )));
        }
        Ok(())
    }
}

/// Configuration manager for loading and saving settings
pub struct ConfigManager {
    config: PlayerConfig,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path()?;
        Self::with_path(config_path)
    }

    /// Load from an explicit file, falling back to defaults when it is absent
    pub fn with_path(config_path: PathBuf) -> Result<Self, ConfigError> {
        let config = match Self::load_config(&config_path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Ignoring unreadable config {}: {}", config_path.display(), e);
                PlayerConfig::default()
            }
        };

        Ok(Self {
            config,
            config_path,
        })
    }

    pub fn get_config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn update_config<F>(&mut self, updater: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut PlayerConfig),
    {
        updater(&mut self.config);
        self.save_config()
    }

    pub fn set_volume(&mut self, volume: u8) -> Result<(), ConfigError> {
        self.config.default_volume = volume.min(100);
        self.save_config()
    }

    pub fn set_preferred_device(&mut self, device: Option<String>) -> Result<(), ConfigError> {
        self.config.preferred_device = device;
        self.save_config()
    }

    pub fn reset_to_defaults(&mut self) -> Result<(), ConfigError> {
        self.config = PlayerConfig::default();
        self.save_config()
    }

    fn get_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::home_dir()
            .ok_or(ConfigError::ConfigDirNotFound)?
            .join(".config")
            .join("streamplay");

        std::fs::create_dir_all(&config_dir)?;

        Ok(config_dir.join("config.toml"))
    }

    fn load_config(path: &Path) -> Result<PlayerConfig, ConfigError> {
        if !path.exists() {
            return Ok(PlayerConfig::default());
        }

        let config_content = std::fs::read_to_string(path)?;
        let config: PlayerConfig = toml::from_str(&config_content)?;

        Ok(config)
    }

    fn save_config(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let config_content = toml::to_string_pretty(&self.config)?;
        std::fs::write(&self.config_path, config_content)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_config_manager() -> (ConfigManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let config_manager = ConfigManager {
            config: PlayerConfig::default(),
            config_path,
        };

        (config_manager, temp_dir)
    }

    #[test]
    fn test_player_config_default() {
        let config = PlayerConfig::default();

        assert_eq!(config.default_volume, 80);
        assert_eq!(config.preferred_device, None);
        assert_eq!(config.buffer_capacity_secs, 20.0);
        assert_eq!(config.low_watermark_secs, 0.5);
        assert_eq!(config.high_watermark_secs, 4.0);
        assert_eq!(config.tick_interval_ms, 250);
        assert_eq!(config.read_ahead_bytes, 4096);
        assert!(!config.advance_on_failure);
    }

    #[test]
    fn test_engine_settings_from_defaults() {
        let settings = EngineSettings::from_config(&PlayerConfig::default()).unwrap();
        assert_eq!(settings.buffer_capacity, Duration::from_secs(20));
        assert_eq!(settings.watermarks, Watermarks::default());
        assert_eq!(settings.tick_interval, Duration::from_millis(250));
        assert_eq!(settings.initial_volume, 80);
    }

    #[test]
    fn test_fill_margin_leaves_room_above_high_watermark() {
        let settings = EngineSettings::default();
        assert_eq!(settings.fill_margin(), Duration::from_secs(4));

        let tight = EngineSettings {
            buffer_capacity: Duration::from_secs(5),
            watermarks: Watermarks {
                low: Duration::from_millis(500),
                high: Duration::from_secs(4),
            },
            ..EngineSettings::default()
        };
        assert!(tight.validate().is_ok());
        assert_eq!(tight.fill_margin(), Duration::from_millis(500));
        assert!(tight.buffer_capacity - tight.fill_margin() > tight.watermarks.high);
    }

    #[test]
    fn test_engine_settings_reject_inverted_watermarks() {
        let config = PlayerConfig {
            low_watermark_secs: 5.0,
            high_watermark_secs: 4.0,
            ..PlayerConfig::default()
        };
        assert!(matches!(
            EngineSettings::from_config(&config),
            Err(ConfigError::Invalid(_))
        ));

        let config = PlayerConfig {
            high_watermark_secs: 25.0,
            ..PlayerConfig::default()
        };
        assert!(matches!(
            EngineSettings::from_config(&config),
            Err(ConfigError::Invalid(_))
        ));

        let config = PlayerConfig {
            buffer_capacity_secs: f64::NAN,
            ..PlayerConfig::default()
        };
        assert!(EngineSettings::from_config(&config).is_err());

        let config = PlayerConfig {
            tick_interval_ms: 0,
            ..PlayerConfig::default()
        };
        assert!(EngineSettings::from_config(&config).is_err());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: PlayerConfig = toml::from_str("default_volume = 55\n").unwrap();
        assert_eq!(config.default_volume, 55);
        assert_eq!(config.high_watermark_secs, 4.0);
        assert_eq!(config.tick_interval_ms, 250);
    }

    #[test]
    fn test_save_and_load_config() {
        let (mut config_manager, _temp_dir) = create_test_config_manager();

        config_manager.config.default_volume = 60;
        config_manager.config.preferred_device = Some("Test Device".to_string());
        config_manager.config.high_watermark_secs = 3.0;
        config_manager.save_config().unwrap();

        let loaded_config = ConfigManager::load_config(&config_manager.config_path).unwrap();

        assert_eq!(loaded_config.default_volume, 60);
        assert_eq!(loaded_config.preferred_device, Some("Test Device".to_string()));
        assert_eq!(loaded_config.high_watermark_secs, 3.0);
    }

    #[test]
    fn test_load_invalid_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.toml");
        fs::write(&config_path, "invalid toml content [[[").unwrap();

        match ConfigManager::load_config(&config_path) {
            Err(ConfigError::DeserializationError(_)) => {}
            other => panic!("Expected DeserializationError, got {:?}", other.map(|_| ())),
        }

        // the manager falls back to defaults instead of failing
        let manager = ConfigManager::with_path(config_path).unwrap();
        assert_eq!(manager.get_config().default_volume, 80);
    }

    #[test]
    fn test_update_config_persists() {
        let (mut config_manager, _temp_dir) = create_test_config_manager();

        config_manager
            .update_config(|config| {
                config.default_volume = 90;
                config.advance_on_failure = true;
            })
            .unwrap();

        let loaded_config = ConfigManager::load_config(&config_manager.config_path).unwrap();
        assert_eq!(loaded_config.default_volume, 90);
        assert!(loaded_config.advance_on_failure);
    }

    #[test]
    fn test_set_volume_clamps() {
        let (mut config_manager, _temp_dir) = create_test_config_manager();

        config_manager.set_volume(70).unwrap();
        assert_eq!(config_manager.config.default_volume, 70);

        config_manager.set_volume(250).unwrap();
        assert_eq!(config_manager.config.default_volume, 100);
    }

    #[test]
    fn test_reset_to_defaults() {
        let (mut config_manager, _temp_dir) = create_test_config_manager();

        config_manager.set_preferred_device(Some("Custom Device".to_string())).unwrap();
        config_manager.reset_to_defaults().unwrap();

        assert_eq!(config_manager.config.preferred_device, None);
        assert_eq!(config_manager.config.default_volume, 80);
    }

    #[test]
    fn test_config_path_creation() {
        let temp_dir = TempDir::new().unwrap();
        let nested_path = temp_dir.path().join("nested").join("config").join("config.toml");

        let config_manager = ConfigManager {
            config: PlayerConfig::default(),
            config_path: nested_path.clone(),
        };
        config_manager.save_config().unwrap();

        assert!(nested_path.exists());
    }
}
