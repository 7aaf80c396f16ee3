//! Persistence collaborator boundary.
//!
//! The engine only issues reads and keyed upserts through [`Store`]. The
//! multi-row effects of one kill travel as a single [`KillTransaction`] so a
//! backend can commit them atomically.

mod memory;
mod records;

pub use memory::{MemoryStore, StoreSnapshot};
pub use records::{
    DedupKey, KillRecord, MatchId, MatchRecord, NewMatch, NewRound, ParticipantRecord, PlayerId,
    PlayerRecord, RoundClose, RoundEndReason, RoundId, RoundRecord, ServerId, ServerRef, StatLine,
    WeaponStat,
};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::path::Path;

use crate::error::StoreError;

/// Result of committing a kill transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    Applied,
    /// The dedup key was already recorded; nothing changed.
    Duplicate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantDelta {
    pub match_id: MatchId,
    pub player: PlayerId,
    pub team: Option<u8>,
    pub delta: StatLine,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeaponDelta {
    pub player: PlayerId,
    pub weapon: String,
    pub delta: StatLine,
}

/// Every row touched by one kill. Committed all-or-nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct KillTransaction {
    kill: KillRecord,
    players: Vec<PlayerRecord>,
    participants: Vec<ParticipantDelta>,
    weapons: Vec<WeaponDelta>,
}

impl KillTransaction {
    /// Start a transaction that appends `kill`.
    pub fn append_kill(kill: KillRecord) -> Self {
        Self {
            kill,
            players: Vec::new(),
            participants: Vec::new(),
            weapons: Vec::new(),
        }
    }

    pub fn get_or_create_player(&mut self, id: PlayerId, name: &str) {
        if self.players.iter().any(|p| p.id == id) {
            return;
        }
        self.players.push(PlayerRecord {
            id,
            name: name.to_string(),
        });
    }

    /// Add `delta` to the (match, player) row, merging with any earlier delta
    /// for the same row in this transaction.
    pub fn upsert_participant_stats(
        &mut self,
        match_id: MatchId,
        player: PlayerId,
        team: Option<u8>,
        delta: StatLine,
    ) {
        if let Some(existing) = self
            .participants
            .iter_mut()
            .find(|p| p.match_id == match_id && p.player == player)
        {
            existing.delta += delta;
            existing.team = team.or(existing.team);
            return;
        }
        self.participants.push(ParticipantDelta {
            match_id,
            player,
            team,
            delta,
        });
    }

    pub fn upsert_weapon_stat(&mut self, player: PlayerId, weapon: &str, delta: StatLine) {
        if let Some(existing) = self
            .weapons
            .iter_mut()
            .find(|w| w.player == player && w.weapon == weapon)
        {
            existing.delta += delta;
            return;
        }
        self.weapons.push(WeaponDelta {
            player,
            weapon: weapon.to_string(),
            delta,
        });
    }

    pub fn kill(&self) -> &KillRecord {
        &self.kill
    }

    pub fn players(&self) -> &[PlayerRecord] {
        &self.players
    }

    pub fn participants(&self) -> &[ParticipantDelta] {
        &self.participants
    }

    pub fn weapons(&self) -> &[WeaponDelta] {
        &self.weapons
    }
}

/// Persistence operations consumed by the engine.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_or_create_server(
        &self,
        id: &ServerId,
        log_path: &Path,
    ) -> Result<ServerRef, StoreError>;

    /// The match on `server` with no end time, if any.
    async fn active_match(&self, server: &ServerId) -> Result<Option<MatchRecord>, StoreError>;

    /// Most recent match on `server` that started on `map` or played a round on it.
    async fn latest_match_on_map(
        &self,
        server: &ServerId,
        map: &str,
    ) -> Result<Option<MatchRecord>, StoreError>;

    /// Fails with [`StoreError::MatchAlreadyActive`] if the server still has an open match.
    async fn create_match(&self, new: NewMatch) -> Result<MatchRecord, StoreError>;

    async fn close_match(
        &self,
        id: MatchId,
        end_time: NaiveDateTime,
        winning_team: Option<u8>,
    ) -> Result<(), StoreError>;

    /// Idempotent on (match, start offset): replaying the same map load returns
    /// the existing round.
    async fn create_round(&self, new: NewRound) -> Result<RoundRecord, StoreError>;

    async fn close_round(&self, id: RoundId, close: RoundClose) -> Result<(), StoreError>;

    async fn latest_round(&self, match_id: MatchId) -> Result<Option<RoundRecord>, StoreError>;

    /// Timestamp of the newest thing recorded for the match (kill or round end).
    async fn last_activity(&self, match_id: MatchId)
    -> Result<Option<NaiveDateTime>, StoreError>;

    /// Creates the player, or updates the stored name on rename.
    async fn get_or_create_player(
        &self,
        id: &PlayerId,
        name: &str,
    ) -> Result<PlayerRecord, StoreError>;

    async fn record_join(
        &self,
        match_id: MatchId,
        player: &PlayerId,
        at: NaiveDateTime,
    ) -> Result<(), StoreError>;

    async fn record_leave(
        &self,
        match_id: MatchId,
        player: &PlayerId,
        at: NaiveDateTime,
    ) -> Result<(), StoreError>;

    /// Commit every row of one kill atomically, deduplicating on the kill's key.
    async fn commit_kill(&self, tx: KillTransaction) -> Result<KillOutcome, StoreError>;
}
