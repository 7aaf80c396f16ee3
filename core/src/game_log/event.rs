use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::storage::{DedupKey, PlayerId, ServerId};

/// Where in the server log an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventOrigin {
    /// 1-based line number within the file.
    pub line: u64,
    /// Byte offset of the start of the line.
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GameEvent {
    pub server: ServerId,
    pub origin: EventOrigin,
    pub timestamp: NaiveDateTime,
    pub kind: EventKind,
}

impl GameEvent {
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            server: self.server.clone(),
            offset: self.origin.offset,
            timestamp: self.timestamp,
        }
    }
}

/// One side of a kill line.
///
/// Bots carry their display name but no player id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Combatant {
    pub name: String,
    pub player_id: Option<PlayerId>,
    pub team: Option<u8>,
}

impl Combatant {
    pub fn player(name: &str, id: &str, team: u8) -> Self {
        Self {
            name: name.to_string(),
            player_id: Some(PlayerId::new(id)),
            team: Some(team),
        }
    }

    pub fn bot(name: &str, team: u8) -> Self {
        Self {
            name: name.to_string(),
            player_id: None,
            team: Some(team),
        }
    }

    pub fn is_bot(&self) -> bool {
        self.player_id.is_none()
    }

    /// Same participant: equal ids, or for bots equal names.
    pub fn same_as(&self, other: &Combatant) -> bool {
        match (&self.player_id, &other.player_id) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.name == other.name,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KillKind {
    Regular,
    TeamKill,
    Suicide,
}

impl KillKind {
    pub fn label(self) -> &'static str {
        match self {
            KillKind::Regular => "regular",
            KillKind::TeamKill => "team-kill",
            KillKind::Suicide => "suicide",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KillEvent {
    /// `None` when the world killed the victim.
    pub killer: Option<Combatant>,
    /// Additional killers credited on the same line.
    pub assists: Vec<Combatant>,
    pub victim: Combatant,
    /// Normalized weapon name.
    pub weapon: String,
}

impl KillEvent {
    pub fn kind(&self) -> KillKind {
        crate::stats::classify(self.killer.as_ref(), &self.victim)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    PlayerJoin {
        name: String,
        player_id: Option<PlayerId>,
    },
    PlayerLeave {
        player_id: PlayerId,
    },
    Kill(KillEvent),
    RoundStart {
        round: u32,
    },
    RoundOver {
        round: u32,
        winning_team: u8,
        reason: String,
    },
    MapLoad {
        map: String,
        scenario: Option<String>,
        mode: Option<String>,
    },
    GameOver,
    ChatMessage {
        name: String,
        player_id: Option<PlayerId>,
        channel: String,
        text: String,
    },
    ChatCommand {
        name: String,
        player_id: Option<PlayerId>,
        command: String,
        args: Vec<String>,
    },
    DifficultySet {
        difficulty: f32,
    },
    ObjectiveCaptured {
        objective: u32,
        owner_team: u8,
        for_team: u8,
    },
    ObjectiveDestroyed {
        objective: u32,
        owner_team: u8,
        for_team: u8,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::PlayerJoin { .. } => "PlayerJoin",
            EventKind::PlayerLeave { .. } => "PlayerLeave",
            EventKind::Kill(_) => "Kill",
            EventKind::RoundStart { .. } => "RoundStart",
            EventKind::RoundOver { .. } => "RoundOver",
            EventKind::MapLoad { .. } => "MapLoad",
            EventKind::GameOver => "GameOver",
            EventKind::ChatMessage { .. } => "ChatMessage",
            EventKind::ChatCommand { .. } => "ChatCommand",
            EventKind::DifficultySet { .. } => "DifficultySet",
            EventKind::ObjectiveCaptured { .. } => "ObjectiveCaptured",
            EventKind::ObjectiveDestroyed { .. } => "ObjectiveDestroyed",
        }
    }

    /// Events that may be held back while no match is known yet.
    pub fn is_attributable(&self) -> bool {
        matches!(
            self,
            EventKind::Kill(_) | EventKind::PlayerJoin { .. } | EventKind::PlayerLeave { .. }
        )
    }
}
