use std::path::PathBuf;

use crate::config::ConfigError;

/// Platform paths resolved once at startup and passed down
///
/// Keeps path discovery out of the components that use the files: the
/// config manager and instance lock receive concrete locations instead of
/// consulting process-wide globals.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Directory holding `config.toml`
    pub config_dir: PathBuf,
    /// Lock file guarding against a second instance
    pub lock_file: PathBuf,
}

impl AppPaths {
    pub fn resolve() -> Result<Self, ConfigError> {
        let config_dir = dirs::config_dir()
            .ok_or(ConfigError::DirectoryNotFound)?
            .join("unidle");
        let lock_file = std::env::temp_dir().join("unidle.lock");

        Ok(Self {
            config_dir,
            lock_file,
        })
    }
}
