//! Shared engine context handed to every worker.
//!
//! Holds the collaborators and settings that would otherwise be global:
//! store, remote control, score refresher, metrics and the shutdown token.

mod config;
mod parsing_session;

pub use config::{AppConfigExt, default_config_path};
pub use parsing_session::ServerSession;

use chrono::TimeDelta;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use sitrep_types::AppConfig;

use crate::metrics::Metrics;
use crate::remote::RemoteControl;
use crate::score_refresh::{RefreshSettings, ScoreBoard, ScoreRefresher};
use crate::signal_processor::{DEFAULT_PENDING_GRACE_SECS, MatchBoundary, boundary_for};
use crate::storage::Store;

/// Tunables derived from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub refresh: RefreshSettings,
    pub objective_refresh: Duration,
    pub status_timeout: Duration,
    pub pending_grace: TimeDelta,
    pub queue_capacity: usize,
    pub poll_interval: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            refresh: RefreshSettings::default(),
            objective_refresh: Duration::from_secs(2),
            status_timeout: Duration::from_secs(3),
            pending_grace: TimeDelta::seconds(DEFAULT_PENDING_GRACE_SECS),
            queue_capacity: 16,
            poll_interval: Duration::from_secs(2),
        }
    }
}

impl From<&AppConfig> for EngineSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            refresh: RefreshSettings {
                window: config.debounce_window(),
                max_wait: config.max_debounce_wait(),
                timeout: config.rcon_timeout(),
            },
            objective_refresh: config.objective_refresh_delay(),
            status_timeout: config.status_timeout(),
            pending_grace: TimeDelta::seconds(config.pending_grace_secs.max(0)),
            queue_capacity: config.queue_capacity.max(1),
            poll_interval: config.poll_interval(),
        }
    }
}

#[derive(Clone)]
pub struct CoreContext {
    pub store: Arc<dyn Store>,
    pub remote: Arc<dyn RemoteControl>,
    pub refresher: ScoreRefresher,
    pub metrics: Arc<Metrics>,
    pub boundary: Arc<dyn MatchBoundary>,
    pub settings: EngineSettings,
    pub shutdown: CancellationToken,
}

impl CoreContext {
    pub fn new(config: &AppConfig, store: Arc<dyn Store>, remote: Arc<dyn RemoteControl>) -> Self {
        Self::with_settings(
            EngineSettings::from(config),
            boundary_for(config.match_boundary),
            store,
            remote,
        )
    }

    pub fn with_settings(
        settings: EngineSettings,
        boundary: Arc<dyn MatchBoundary>,
        store: Arc<dyn Store>,
        remote: Arc<dyn RemoteControl>,
    ) -> Self {
        let metrics = Arc::new(Metrics::new());
        let shutdown = CancellationToken::new();
        let refresher = ScoreRefresher::new(
            remote.clone(),
            Arc::new(ScoreBoard::default()),
            metrics.clone(),
            settings.refresh,
            shutdown.child_token(),
        );
        Self {
            store,
            remote,
            refresher,
            metrics,
            boundary,
            settings,
            shutdown,
        }
    }

    pub fn score_board(&self) -> &Arc<ScoreBoard> {
        self.refresher.board()
    }
}
