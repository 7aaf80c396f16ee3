use chrono::NaiveDateTime;

use crate::storage::{MatchId, RoundEndReason, RoundId};

/// Lifecycle changes emitted by the match tracker. These describe what the
/// tracker did to persisted match state, one level above raw log events.
#[derive(Debug, Clone, PartialEq)]
pub enum GameSignal {
    MatchStarted {
        match_id: MatchId,
        map: String,
        timestamp: NaiveDateTime,
    },
    /// An open match from a previous run was picked up again at startup.
    MatchResumed {
        match_id: MatchId,
        map: String,
    },
    RoundStarted {
        match_id: MatchId,
        round_id: RoundId,
        number: u32,
        map: String,
        timestamp: NaiveDateTime,
    },
    RoundEnded {
        match_id: MatchId,
        round_id: RoundId,
        number: u32,
        winning_team: Option<u8>,
        reason: RoundEndReason,
        timestamp: NaiveDateTime,
    },
    MatchEnded {
        match_id: MatchId,
        winning_team: Option<u8>,
        timestamp: NaiveDateTime,
    },
}

impl GameSignal {
    pub fn match_id(&self) -> MatchId {
        match self {
            GameSignal::MatchStarted { match_id, .. }
            | GameSignal::MatchResumed { match_id, .. }
            | GameSignal::RoundStarted { match_id, .. }
            | GameSignal::RoundEnded { match_id, .. }
            | GameSignal::MatchEnded { match_id, .. } => *match_id,
        }
    }
}
