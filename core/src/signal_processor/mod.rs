mod boundary;
mod handler;
mod match_state;
mod route;
mod signal;


pub use boundary::{
    EveryMapLoad, MapTransition, MatchBoundary, Never, ScenarioChange, boundary_for,
};
pub use handler::{LifecycleLogger, SignalHandler};
pub use match_state::{
    Attribution, DEFAULT_PENDING_GRACE_SECS, MatchPhase, MatchTracker, ReadyEvent,
    TrackerOutput, close_stale_match,
};
pub use route::{Stage, route};
pub use signal::GameSignal;
