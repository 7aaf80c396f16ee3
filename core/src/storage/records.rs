//! Persisted record shapes.
//!
//! Records reference each other by id only; there are no embedded object
//! graphs. Cascades are explicit store operations.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::AddAssign;
use std::path::PathBuf;
use std::sync::Arc;

use crate::game_log::{Combatant, KillKind};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Arc<str>);

        impl $name {
            pub fn new(id: impl AsRef<str>) -> Self {
                Self(Arc::from(id.as_ref()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self::new(id)
            }
        }
    };
}

macro_rules! numeric_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(
    /// External server identifier from configuration.
    ServerId
);
string_id!(
    /// Stable cross-server player handle (platform id without the platform prefix).
    PlayerId
);
numeric_id!(MatchId);
numeric_id!(RoundId);

/// Natural key of a log-derived event, used to make replay idempotent.
///
/// The offset alone repeats when the game server starts a fresh log file,
/// so the line timestamp is part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey {
    pub server: ServerId,
    pub offset: u64,
    pub timestamp: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRef {
    pub id: ServerId,
    pub log_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: MatchId,
    pub server: ServerId,
    pub map: String,
    pub scenario: Option<String>,
    pub mode: Option<String>,
    pub start_time: NaiveDateTime,
    pub end_time: Option<NaiveDateTime>,
    pub winning_team: Option<u8>,
    /// Byte offset of the map load line that opened the match.
    pub start_offset: u64,
}

impl MatchRecord {
    pub fn is_active(&self) -> bool {
        self.end_time.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMatch {
    pub server: ServerId,
    pub map: String,
    pub scenario: Option<String>,
    pub mode: Option<String>,
    pub start_time: NaiveDateTime,
    pub start_offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoundEndReason {
    /// Explicit round-over line with the game's win reason.
    Won { reason: String },
    /// A map load arrived before any round-over line.
    MapChange,
    GameOver,
    /// Closed at startup because the match it belonged to was stale.
    Reconciled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub id: RoundId,
    pub match_id: MatchId,
    /// 1-based, monotonic per match.
    pub number: u32,
    pub map: String,
    pub start_time: NaiveDateTime,
    pub start_offset: u64,
    pub end_time: Option<NaiveDateTime>,
    pub winning_team: Option<u8>,
    pub end_reason: Option<RoundEndReason>,
    pub duration_secs: Option<i64>,
}

impl RoundRecord {
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRound {
    pub match_id: MatchId,
    pub number: u32,
    pub map: String,
    pub start_time: NaiveDateTime,
    pub start_offset: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoundClose {
    pub end_time: NaiveDateTime,
    pub winning_team: Option<u8>,
    pub reason: RoundEndReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub id: PlayerId,
    pub name: String,
}

/// Running counters shared by participant and weapon rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatLine {
    pub kills: u32,
    pub deaths: u32,
    pub team_kills: u32,
    pub suicides: u32,
    pub assists: u32,
}

impl StatLine {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl AddAssign for StatLine {
    fn add_assign(&mut self, rhs: Self) {
        self.kills += rhs.kills;
        self.deaths += rhs.deaths;
        self.team_kills += rhs.team_kills;
        self.suicides += rhs.suicides;
        self.assists += rhs.assists;
    }
}

/// (player, match) membership with per-match counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub match_id: MatchId,
    pub player: PlayerId,
    pub joined_at: Option<NaiveDateTime>,
    pub left_at: Option<NaiveDateTime>,
    pub team: Option<u8>,
    pub stats: StatLine,
}

/// One attributed kill. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillRecord {
    pub key: DedupKey,
    pub match_id: Option<MatchId>,
    pub round_id: Option<RoundId>,
    pub timestamp: NaiveDateTime,
    pub killer: Option<Combatant>,
    pub assists: Vec<Combatant>,
    pub victim: Combatant,
    pub weapon: String,
    pub kind: KillKind,
}

/// (player, weapon, server) aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeaponStat {
    pub server: ServerId,
    pub player: PlayerId,
    pub weapon: String,
    pub stats: StatLine,
}
