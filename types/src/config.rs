//! Configuration surface shared by the core engine and the CLI.
//!
//! The file format is TOML. Every global option has a default so an empty
//! file is a valid (if useless) configuration; servers are listed as
//! `[[server]]` tables.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// How a `MapLoad` arriving mid-match decides between "next round" and
/// "new match".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchBoundaryMode {
    /// A new match starts when the scenario changes (both scenarios known).
    #[default]
    ScenarioChange,
    /// Every map load starts a new match.
    EveryMapLoad,
    /// Map loads never split a match; only game over ends it.
    Never,
}

/// Global options plus the list of monitored servers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Snapshot file for the in-process store. `None` keeps everything in memory.
    pub database_path: Option<PathBuf>,
    /// Directory for rolling application logs. `None` logs to stderr only.
    pub log_directory: Option<PathBuf>,
    pub debounce_window_secs: u64,
    pub max_debounce_wait_secs: u64,
    pub objective_refresh_secs: u64,
    pub status_timeout_ms: u64,
    pub rcon_timeout_ms: u64,
    /// Capacity of each server's notification queue.
    pub queue_capacity: usize,
    /// How long events seen before the first map load wait for one (event time).
    pub pending_grace_secs: i64,
    /// Fallback re-check interval for filesystems that drop change notifications.
    pub poll_interval_ms: u64,
    /// How often the store snapshot is flushed to `database_path`.
    pub snapshot_interval_secs: u64,
    pub match_boundary: MatchBoundaryMode,
    #[serde(rename = "server")]
    pub servers: Vec<ServerConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            log_directory: None,
            debounce_window_secs: 10,
            max_debounce_wait_secs: 30,
            objective_refresh_secs: 2,
            status_timeout_ms: 3_000,
            rcon_timeout_ms: 5_000,
            queue_capacity: 16,
            pending_grace_secs: 5,
            poll_interval_ms: 2_000,
            snapshot_interval_secs: 60,
            match_boundary: MatchBoundaryMode::default(),
            servers: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn debounce_window(&self) -> Duration {
        Duration::from_secs(self.debounce_window_secs)
    }

    pub fn max_debounce_wait(&self) -> Duration {
        Duration::from_secs(self.max_debounce_wait_secs)
    }

    pub fn objective_refresh_delay(&self) -> Duration {
        Duration::from_secs(self.objective_refresh_secs)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }

    pub fn rcon_timeout(&self) -> Duration {
        Duration::from_millis(self.rcon_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs)
    }

    /// Servers with `enabled = true`, in file order.
    pub fn enabled_servers(&self) -> impl Iterator<Item = &ServerConfig> {
        self.servers.iter().filter(|s| s.enabled)
    }
}

/// One monitored game server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Stable external identifier, used as the persistence key.
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub log_path: PathBuf,
    /// `host:port` of the RCON endpoint.
    #[serde(default)]
    pub rcon_address: Option<String>,
    #[serde(default)]
    pub rcon_password: Option<String>,
    /// `host:port` of the status (A2S) query endpoint.
    #[serde(default)]
    pub query_address: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl ServerConfig {
    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

fn default_enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.debounce_window(), Duration::from_secs(10));
        assert_eq!(config.max_debounce_wait(), Duration::from_secs(30));
    }

    #[test]
    fn test_parse_servers() {
        let toml = r#"
debounce_window_secs = 4
match_boundary = "every_map_load"

[[server]]
id = "eu-1"
name = "EU Checkpoint"
log_path = "/srv/sandstorm/eu1/Insurgency.log"
rcon_address = "127.0.0.1:27015"
rcon_password = "hunter2"
query_address = "127.0.0.1:27131"

[[server]]
id = "us-1"
log_path = "/srv/sandstorm/us1/Insurgency.log"
enabled = false
"#;

        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.debounce_window_secs, 4);
        assert_eq!(config.match_boundary, MatchBoundaryMode::EveryMapLoad);
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.servers[0].display_name(), "EU Checkpoint");
        assert_eq!(config.servers[1].display_name(), "us-1");
        assert!(config.servers[0].enabled);

        let enabled: Vec<_> = config.enabled_servers().map(|s| s.id.as_str()).collect();
        assert_eq!(enabled, vec!["eu-1"]);
    }
}
