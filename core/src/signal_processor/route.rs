//! Static per-variant routing of events through the processing stages.

use crate::game_log::EventKind;

/// One step of event processing. Stages for an event run in the listed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Advance the match state machine.
    Track,
    /// Aggregate whatever the tracker released.
    Aggregate,
    /// Schedule a debounced score refresh.
    RefreshDebounced,
    /// Schedule a refresh after the short objective delay.
    RefreshObjective,
    /// Refresh now, cancelling any pending timer.
    RefreshNow,
    /// Log a player-facing chat command.
    Announce,
}

use Stage::*;

pub fn route(kind: &EventKind) -> &'static [Stage] {
    match kind {
        EventKind::Kill(_) => &[Track, Aggregate, RefreshDebounced],
        EventKind::PlayerJoin { .. } | EventKind::PlayerLeave { .. } => &[Track, Aggregate],
        EventKind::MapLoad { .. } | EventKind::RoundStart { .. } => &[Track, Aggregate],
        EventKind::RoundOver { .. } | EventKind::GameOver => &[Track, Aggregate, RefreshNow],
        EventKind::ObjectiveCaptured { .. } | EventKind::ObjectiveDestroyed { .. } => {
            &[RefreshObjective]
        }
        EventKind::ChatCommand { .. } => &[Announce],
        EventKind::ChatMessage { .. } | EventKind::DifficultySet { .. } => &[],
    }
}
