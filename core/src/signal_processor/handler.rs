use crate::storage::ServerId;

use super::GameSignal;

/// Receives lifecycle signals in the order the tracker emitted them.
pub trait SignalHandler {
    fn handle_signal(&mut self, server: &ServerId, signal: &GameSignal);

    fn handle_signals(&mut self, server: &ServerId, signals: &[GameSignal]) {
        for signal in signals {
            self.handle_signal(server, signal);
        }
    }
}

/// Logs every lifecycle transition at info level.
#[derive(Debug, Default)]
pub struct LifecycleLogger;

impl SignalHandler for LifecycleLogger {
    fn handle_signal(&mut self, server: &ServerId, signal: &GameSignal) {
        match signal {
            GameSignal::MatchStarted { match_id, map, .. } => {
                tracing::info!(server = %server, match_id = %match_id, map = %map, "Match started");
            }
            GameSignal::MatchResumed { match_id, map } => {
                tracing::info!(server = %server, match_id = %match_id, map = %map, "Match resumed");
            }
            GameSignal::RoundStarted {
                match_id,
                number,
                map,
                ..
            } => {
                tracing::info!(server = %server, match_id = %match_id, round = number, map = %map, "Round started");
            }
            GameSignal::RoundEnded {
                match_id,
                number,
                winning_team,
                reason,
                ..
            } => {
                tracing::info!(
                    server = %server,
                    match_id = %match_id,
                    round = number,
                    winner = ?winning_team,
                    reason = ?reason,
                    "Round ended"
                );
            }
            GameSignal::MatchEnded {
                match_id,
                winning_team,
                ..
            } => {
                tracing::info!(server = %server, match_id = %match_id, winner = ?winning_team, "Match ended");
            }
        }
    }
}
