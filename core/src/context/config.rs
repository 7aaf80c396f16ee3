use hashbrown::HashSet;
use std::path::{Path, PathBuf};

use sitrep_types::AppConfig;

use crate::error::ConfigError;

const APP_NAME: &str = "sitrep";
const CONFIG_FILE: &str = "config.toml";

/// Default location: `<config dir>/sitrep/config.toml`.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_NAME).join(CONFIG_FILE))
        .ok_or(ConfigError::NoConfigDir)
}

/// Loading and validation for the shared config type.
pub trait AppConfigExt: Sized {
    /// Load from `path` (or the default location), writing defaults if the file is missing.
    fn load_from(path: Option<&Path>) -> Result<Self, ConfigError>;

    fn validate(&self) -> Result<(), ConfigError>;
}

impl AppConfigExt for AppConfig {
    fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => default_config_path()?,
        };
        let config: AppConfig = confy::load_path(&path).map_err(|source| ConfigError::Load {
            path: path.clone(),
            source,
        })?;
        config.validate()?;
        tracing::debug!(path = %path.display(), servers = config.servers.len(), "Configuration loaded");
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for server in &self.servers {
            let id = server.id.trim();
            if id.is_empty() {
                return Err(ConfigError::EmptyServerId);
            }
            if !seen.insert(id) {
                return Err(ConfigError::DuplicateServer(id.to_string()));
            }
        }

        for (name, value) in [
            ("debounce_window_secs", self.debounce_window_secs),
            ("max_debounce_wait_secs", self.max_debounce_wait_secs),
            ("status_timeout_ms", self.status_timeout_ms),
            ("rcon_timeout_ms", self.rcon_timeout_ms),
            ("poll_interval_ms", self.poll_interval_ms),
            ("queue_capacity", self.queue_capacity as u64),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroValue(name));
            }
        }

        if self.debounce_window() > self.max_debounce_wait() {
            return Err(ConfigError::WindowExceedsMaxWait {
                window: self.debounce_window(),
                max_wait: self.max_debounce_wait(),
            });
        }
        Ok(())
    }
}
