//! Configuration file support for Repset.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/repset/config.toml`.

use crate::{Error, Result, SetDefaults};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub defaults: DefaultsConfig,

    #[serde(default)]
    pub integrations: IntegrationsConfig,

    #[serde(default)]
    pub history: HistoryConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Values used for sets the user adds mid-workout
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_reps")]
    pub reps: u32,

    #[serde(default)]
    pub weight: f64,

    #[serde(default = "default_rest_seconds")]
    pub rest_seconds: u32,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            reps: default_reps(),
            weight: 0.0,
            rest_seconds: default_rest_seconds(),
        }
    }
}

impl DefaultsConfig {
    pub fn set_defaults(&self) -> SetDefaults {
        SetDefaults {
            reps: self.reps,
            weight: self.weight,
            rest_seconds: self.rest_seconds,
        }
    }
}

/// Which external integrations a host should wire up
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IntegrationsConfig {
    #[serde(default)]
    pub health: bool,

    #[serde(default = "default_true")]
    pub notifications: bool,

    #[serde(default = "default_true")]
    pub live_countdown: bool,
}

impl Default for IntegrationsConfig {
    fn default() -> Self {
        Self {
            health: false,
            notifications: true,
            live_countdown: true,
        }
    }
}

/// History and progress comparison settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// How many earlier sessions to scan for a comparison
    #[serde(default = "default_compare_window")]
    pub compare_window: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            compare_window: default_compare_window(),
        }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("repset")
}

fn default_reps() -> u32 {
    10
}

fn default_rest_seconds() -> u32 {
    60
}

fn default_true() -> bool {
    true
}

fn default_compare_window() -> usize {
    20
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("repset")
            .join("config.toml")
    }

    /// Save the current configuration to the default path
    pub fn save(&self) -> Result<()> {
        let config_path = Self::default_config_path();
        self.save_to(&config_path)
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.defaults.weight < 0.0 {
            return Err(Error::Config("defaults.weight must not be negative".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.defaults.set_defaults(), SetDefaults::default());
        assert!(!config.integrations.health);
        assert!(config.integrations.notifications);
        assert_eq!(config.history.compare_window, 20);
    }

    #[test]
    fn test_config_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");

        let mut config = Config::default();
        config.defaults.rest_seconds = 120;
        config.save_to(&path).unwrap();

        let parsed = Config::load_from(&path).unwrap();
        assert_eq!(parsed.defaults.rest_seconds, 120);
        assert_eq!(parsed.data.data_dir, config.data.data_dir);
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[defaults]
rest_seconds = 90
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.defaults.rest_seconds, 90);
        assert_eq!(config.defaults.reps, 10); // default
        assert!(config.integrations.live_countdown);
    }

    #[test]
    fn test_negative_weight_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[defaults]\nweight = -5.0\n").unwrap();

        assert!(matches!(Config::load_from(&path), Err(Error::Config(_))));
    }
}
