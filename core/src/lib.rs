pub mod catchup;
pub mod context;
pub mod error;
pub mod game_log;
pub mod metrics;
pub mod remote;
pub mod score_refresh;
pub mod service;
pub mod signal_processor;
pub mod stats;
pub mod storage;
pub mod watcher;

// Re-exports for convenience
pub use context::{AppConfigExt, CoreContext, EngineSettings, ServerSession};
pub use error::{ConfigError, RemoteError, StoreError, WatchError};
pub use game_log::{EventKind, GameEvent, parse_line};
pub use metrics::{Metrics, MetricsSnapshot};
pub use service::{ServiceHandle, StatsService};
pub use signal_processor::{GameSignal, SignalHandler};
pub use storage::{MemoryStore, ServerId, Store};
