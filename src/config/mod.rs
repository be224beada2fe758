use std::io::Write;
use std::path::Path;

mod manager;
pub use manager::{ConfigManager, WatcherHealth};

use crate::engine::{MAX_INTERVAL_SECS, MIN_INTERVAL_SECS};

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("config directory not found")]
    DirectoryNotFound,
}

/// Last known running state, persisted for the next launch
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunningState {
    Stopped,
    Running,
}

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Config {
    /// Seconds between cursor movements
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Start moving as soon as the process launches
    #[serde(default = "default_start_on_launch")]
    pub start_on_launch: bool,

    /// Recorded on every transition; with `start_on_launch = false` a
    /// previously running session resumes on the next launch
    #[serde(default = "default_last_state")]
    pub last_state: RunningState,
}

fn default_interval_secs() -> u64 {
    crate::engine::DEFAULT_INTERVAL_SECS
}

fn default_start_on_launch() -> bool {
    true
}

fn default_last_state() -> RunningState {
    RunningState::Stopped
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            start_on_launch: default_start_on_launch(),
            last_state: default_last_state(),
        }
    }
}

impl Config {
    /// Validates configuration values, returning one message per problem
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if !(MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS).contains(&self.interval_secs) {
            errors.push(format!(
                "interval_secs must be between {} and {}, got {}",
                MIN_INTERVAL_SECS, MAX_INTERVAL_SECS, self.interval_secs
            ));
        }

        errors
    }

    /// Load configuration from a specific path
    ///
    /// A missing file produces defaults (and writes them so the file is
    /// discoverable). A file that cannot be parsed or fails validation is
    /// quarantined to `config.toml.bak` and replaced with defaults. This
    /// never crashes the application.
    pub fn load_from_path(config_path: &Path) -> Self {
        if !config_path.exists() {
            tracing::info!(
                "config file not found at {}, using defaults",
                config_path.display()
            );
            let defaults = Self::default();
            if let Err(e) = defaults.save_to_path(config_path) {
                tracing::warn!("could not write default config: {}", e);
            }
            return defaults;
        }

        let contents = match std::fs::read_to_string(config_path) {
            Ok(contents) => contents,
            Err(e) => {
                tracing::warn!("failed to read config file: {}, using defaults", e);
                return Self::default();
            }
        };

        match toml::from_str::<Config>(&contents) {
            Ok(config) => {
                let errors = config.validate();
                if errors.is_empty() {
                    tracing::info!("loaded config from {}", config_path.display());
                    config
                } else {
                    tracing::warn!(
                        "invalid configuration ({}), reverting to defaults",
                        errors.join(", ")
                    );
                    Self::quarantine_and_reset(config_path)
                }
            }
            Err(e) => {
                tracing::warn!("failed to parse config: {}, reverting to defaults", e);
                Self::quarantine_and_reset(config_path)
            }
        }
    }

    /// Save configuration to a path with an atomic write
    ///
    /// Writes to a temporary file in the same directory, then renames over
    /// the target, so a crash mid-save can never leave a torn file.
    pub fn save_to_path(&self, config_path: &Path) -> Result<(), ConfigError> {
        let errors = self.validate();
        if !errors.is_empty() {
            return Err(ConfigError::Invalid(errors.join(", ")));
        }

        let dir = config_path.parent().ok_or(ConfigError::DirectoryNotFound)?;
        std::fs::create_dir_all(dir)?;

        let contents = toml::to_string_pretty(self)?;
        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        temp.write_all(contents.as_bytes())?;
        temp.persist(config_path)
            .map_err(|e| ConfigError::Io(e.error))?;

        Ok(())
    }

    /// Backs up a bad config file and writes defaults in its place
    fn quarantine_and_reset(config_path: &Path) -> Self {
        let backup_path = config_path.with_extension("toml.bak");
        if let Err(e) = std::fs::copy(config_path, &backup_path) {
            tracing::warn!("could not back up bad config file: {}", e);
        } else {
            tracing::warn!("bad config backed up to {}", backup_path.display());
        }

        let defaults = Self::default();
        if let Err(e) = defaults.save_to_path(config_path) {
            tracing::warn!("could not write default config: {}", e);
        }
        defaults
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.interval_secs, 30);
        assert!(config.start_on_launch);
        assert_eq!(config.last_state, RunningState::Stopped);
    }

    #[test]
    fn test_parse_empty_config() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = "interval_secs = 60";
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.interval_secs, 60);
        assert!(config.start_on_launch);
        assert_eq!(config.last_state, RunningState::Stopped);
    }

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
            interval_secs = 120
            start_on_launch = false
            last_state = "running"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.interval_secs, 120);
        assert!(!config.start_on_launch);
        assert_eq!(config.last_state, RunningState::Running);
    }

    #[test]
    fn test_invalid_toml() {
        assert!(toml::from_str::<Config>("invalid { toml").is_err());
    }

    #[test]
    fn test_validate_interval_bounds() {
        let mut config = Config::default();
        assert!(config.validate().is_empty());

        config.interval_secs = 10;
        assert!(config.validate().is_empty());
        config.interval_secs = 300;
        assert!(config.validate().is_empty());

        config.interval_secs = 9;
        assert_eq!(config.validate().len(), 1);
        config.interval_secs = 301;
        assert_eq!(config.validate().len(), 1);
    }

    #[test]
    fn test_load_missing_file_writes_defaults() {
        let temp_dir = TempDir::new().expect("temp dir");
        let config_path = temp_dir.path().join("config.toml");

        let config = Config::load_from_path(&config_path);
        assert_eq!(config, Config::default());
        assert!(config_path.exists(), "defaults should be written");
    }

    #[test]
    fn test_load_corrupt_file_quarantines() {
        let temp_dir = TempDir::new().expect("temp dir");
        let config_path = temp_dir.path().join("config.toml");
        std::fs::write(&config_path, "not { valid toml").expect("write");

        let config = Config::load_from_path(&config_path);
        assert_eq!(config, Config::default());
        assert!(temp_dir.path().join("config.toml.bak").exists());

        let rewritten = std::fs::read_to_string(&config_path).expect("read");
        assert!(toml::from_str::<Config>(&rewritten).is_ok());
    }

    #[test]
    fn test_load_out_of_range_interval_quarantines() {
        let temp_dir = TempDir::new().expect("temp dir");
        let config_path = temp_dir.path().join("config.toml");
        std::fs::write(&config_path, "interval_secs = 5").expect("write");

        let config = Config::load_from_path(&config_path);
        assert_eq!(config.interval_secs, 30);
        assert!(temp_dir.path().join("config.toml.bak").exists());
    }

    #[test]
    fn test_save_and_reload_round_trip() {
        let temp_dir = TempDir::new().expect("temp dir");
        let config_path = temp_dir.path().join("config.toml");

        let config = Config {
            interval_secs: 45,
            start_on_launch: false,
            last_state: RunningState::Running,
        };
        config.save_to_path(&config_path).expect("save");

        let loaded = Config::load_from_path(&config_path);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_save_rejects_invalid_config() {
        let temp_dir = TempDir::new().expect("temp dir");
        let config_path = temp_dir.path().join("config.toml");

        let config = Config {
            interval_secs: 5,
            ..Config::default()
        };
        assert!(matches!(
            config.save_to_path(&config_path),
            Err(ConfigError::Invalid(_))
        ));
        assert!(!config_path.exists());
    }

    #[test]
    fn test_save_creates_missing_directory() {
        let temp_dir = TempDir::new().expect("temp dir");
        let config_path = temp_dir.path().join("nested").join("config.toml");

        Config::default().save_to_path(&config_path).expect("save");
        assert!(config_path.exists());
    }
}
