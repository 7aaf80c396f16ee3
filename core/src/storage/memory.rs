//! In-process [`Store`] backed by hash maps under a single lock.
//!
//! One lock covers every table, so each trait call (and in particular each
//! kill transaction) is observed by readers either fully applied or not at
//! all. State can be snapshotted to JSON and reloaded on the next start.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use super::records::*;
use super::{KillOutcome, KillTransaction, Store};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct Tables {
    servers: HashMap<ServerId, ServerRef>,
    // MatchId(n) lives at index n - 1; same for rounds.
    matches: Vec<MatchRecord>,
    rounds: Vec<RoundRecord>,
    players: HashMap<PlayerId, PlayerRecord>,
    participants: HashMap<(MatchId, PlayerId), ParticipantRecord>,
    kills: Vec<KillRecord>,
    kill_keys: HashSet<DedupKey>,
    weapon_stats: HashMap<(ServerId, PlayerId, String), WeaponStat>,
}

impl Tables {
    fn match_mut(&mut self, id: MatchId) -> Result<&mut MatchRecord, StoreError> {
        index_of(id.0)
            .and_then(|idx| self.matches.get_mut(idx))
            .ok_or(StoreError::UnknownMatch(id))
    }

    fn round_mut(&mut self, id: RoundId) -> Result<&mut RoundRecord, StoreError> {
        index_of(id.0)
            .and_then(|idx| self.rounds.get_mut(idx))
            .ok_or(StoreError::UnknownRound(id))
    }

    fn has_match(&self, id: MatchId) -> bool {
        index_of(id.0).is_some_and(|idx| idx < self.matches.len())
    }

    fn participant_mut(&mut self, match_id: MatchId, player: &PlayerId) -> &mut ParticipantRecord {
        self.participants
            .entry((match_id, player.clone()))
            .or_insert_with(|| ParticipantRecord {
                match_id,
                player: player.clone(),
                joined_at: None,
                left_at: None,
                team: None,
                stats: StatLine::default(),
            })
    }

    fn upsert_player(&mut self, id: &PlayerId, name: &str) -> PlayerRecord {
        let record = self.players.entry(id.clone()).or_insert_with(|| PlayerRecord {
            id: id.clone(),
            name: name.to_string(),
        });
        if !name.is_empty() && record.name != name {
            tracing::debug!(player = %id, old = %record.name, new = %name, "Player renamed");
            record.name = name.to_string();
        }
        record.clone()
    }
}

fn index_of(id: u64) -> Option<usize> {
    id.checked_sub(1).map(|idx| idx as usize)
}

/// Serializable image of a [`MemoryStore`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub servers: Vec<ServerRef>,
    pub matches: Vec<MatchRecord>,
    pub rounds: Vec<RoundRecord>,
    pub players: Vec<PlayerRecord>,
    pub participants: Vec<ParticipantRecord>,
    pub kills: Vec<KillRecord>,
    pub weapon_stats: Vec<WeaponStat>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let mut tables = Tables {
            matches: snapshot.matches,
            rounds: snapshot.rounds,
            kills: snapshot.kills,
            ..Tables::default()
        };
        tables.matches.sort_by_key(|m| m.id);
        tables.rounds.sort_by_key(|r| r.id);
        for server in snapshot.servers {
            tables.servers.insert(server.id.clone(), server);
        }
        for player in snapshot.players {
            tables.players.insert(player.id.clone(), player);
        }
        for participant in snapshot.participants {
            tables
                .participants
                .insert((participant.match_id, participant.player.clone()), participant);
        }
        for stat in snapshot.weapon_stats {
            tables.weapon_stats.insert(
                (stat.server.clone(), stat.player.clone(), stat.weapon.clone()),
                stat,
            );
        }
        tables.kill_keys = tables.kills.iter().map(|k| k.key.clone()).collect();

        Self {
            tables: Mutex::new(tables),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let tables = self.tables.lock();
        StoreSnapshot {
            servers: tables.servers.values().cloned().collect(),
            matches: tables.matches.clone(),
            rounds: tables.rounds.clone(),
            players: tables.players.values().cloned().collect(),
            participants: tables.participants.values().cloned().collect(),
            kills: tables.kills.clone(),
            weapon_stats: tables.weapon_stats.values().cloned().collect(),
        }
    }

    /// Load a snapshot file, or start empty if it does not exist yet.
    pub async fn load(path: &Path) -> Result<Self, StoreError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(source) => {
                return Err(StoreError::SnapshotIo {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let snapshot: StoreSnapshot =
            serde_json::from_slice(&bytes).map_err(|source| StoreError::SnapshotFormat {
                path: path.to_path_buf(),
                source,
            })?;
        tracing::info!(
            path = %path.display(),
            matches = snapshot.matches.len(),
            kills = snapshot.kills.len(),
            "Loaded store snapshot"
        );
        Ok(Self::from_snapshot(snapshot))
    }

    /// Write a snapshot next to `path` and rename it into place.
    pub async fn save(&self, path: &Path) -> Result<(), StoreError> {
        let snapshot = self.snapshot();
        let bytes =
            serde_json::to_vec(&snapshot).map_err(|source| StoreError::SnapshotFormat {
                path: path.to_path_buf(),
                source,
            })?;
        let tmp = path.with_extension("tmp");
        let io_err = |source| StoreError::SnapshotIo {
            path: path.to_path_buf(),
            source,
        };
        tokio::fs::write(&tmp, bytes).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, path).await.map_err(io_err)?;
        Ok(())
    }

    /// Simulate a backend outage: every call fails until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store marked unavailable".to_string()));
        }
        Ok(())
    }

    // --- Read accessors for observers ---

    pub fn matches(&self, server: &ServerId) -> Vec<MatchRecord> {
        let tables = self.tables.lock();
        tables
            .matches
            .iter()
            .filter(|m| &m.server == server)
            .cloned()
            .collect()
    }

    pub fn rounds(&self, match_id: MatchId) -> Vec<RoundRecord> {
        let tables = self.tables.lock();
        let mut rounds: Vec<_> = tables
            .rounds
            .iter()
            .filter(|r| r.match_id == match_id)
            .cloned()
            .collect();
        rounds.sort_by_key(|r| r.number);
        rounds
    }

    pub fn participant(&self, match_id: MatchId, player: &PlayerId) -> Option<ParticipantRecord> {
        let tables = self.tables.lock();
        tables.participants.get(&(match_id, player.clone())).cloned()
    }

    pub fn participants(&self, match_id: MatchId) -> Vec<ParticipantRecord> {
        let tables = self.tables.lock();
        let mut rows: Vec<_> = tables
            .participants
            .values()
            .filter(|p| p.match_id == match_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.player.cmp(&b.player));
        rows
    }

    pub fn weapon_stat(&self, server: &ServerId, player: &PlayerId, weapon: &str) -> Option<StatLine> {
        let tables = self.tables.lock();
        tables
            .weapon_stats
            .get(&(server.clone(), player.clone(), weapon.to_string()))
            .map(|w| w.stats)
    }

    pub fn weapon_stats(&self, server: &ServerId) -> Vec<WeaponStat> {
        let tables = self.tables.lock();
        tables
            .weapon_stats
            .values()
            .filter(|w| &w.server == server)
            .cloned()
            .collect()
    }

    pub fn kills(&self, server: &ServerId) -> Vec<KillRecord> {
        let tables = self.tables.lock();
        tables
            .kills
            .iter()
            .filter(|k| &k.key.server == server)
            .cloned()
            .collect()
    }

    pub fn player(&self, id: &PlayerId) -> Option<PlayerRecord> {
        self.tables.lock().players.get(id).cloned()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_or_create_server(
        &self,
        id: &ServerId,
        log_path: &Path,
    ) -> Result<ServerRef, StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock();
        let server = tables.servers.entry(id.clone()).or_insert_with(|| ServerRef {
            id: id.clone(),
            log_path: log_path.to_path_buf(),
        });
        server.log_path = log_path.to_path_buf();
        Ok(server.clone())
    }

    async fn active_match(&self, server: &ServerId) -> Result<Option<MatchRecord>, StoreError> {
        self.check_available()?;
        let tables = self.tables.lock();
        Ok(tables
            .matches
            .iter()
            .rev()
            .find(|m| &m.server == server && m.is_active())
            .cloned())
    }

    async fn latest_match_on_map(
        &self,
        server: &ServerId,
        map: &str,
    ) -> Result<Option<MatchRecord>, StoreError> {
        self.check_available()?;
        let tables = self.tables.lock();
        let played_on = |m: &MatchRecord| {
            m.map.eq_ignore_ascii_case(map)
                || tables
                    .rounds
                    .iter()
                    .any(|r| r.match_id == m.id && r.map.eq_ignore_ascii_case(map))
        };
        Ok(tables
            .matches
            .iter()
            .rev()
            .find(|m| &m.server == server && played_on(m))
            .cloned())
    }

    async fn create_match(&self, new: NewMatch) -> Result<MatchRecord, StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock();
        if let Some(active) = tables
            .matches
            .iter()
            .find(|m| m.server == new.server && m.is_active())
        {
            return Err(StoreError::MatchAlreadyActive {
                server: new.server.to_string(),
                active: active.id,
            });
        }
        let record = MatchRecord {
            id: MatchId(tables.matches.len() as u64 + 1),
            server: new.server,
            map: new.map,
            scenario: new.scenario,
            mode: new.mode,
            start_time: new.start_time,
            end_time: None,
            winning_team: None,
            start_offset: new.start_offset,
        };
        tables.matches.push(record.clone());
        Ok(record)
    }

    async fn close_match(
        &self,
        id: MatchId,
        end_time: NaiveDateTime,
        winning_team: Option<u8>,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock();
        let record = tables.match_mut(id)?;
        record.end_time = Some(end_time);
        record.winning_team = winning_team;
        Ok(())
    }

    async fn create_round(&self, new: NewRound) -> Result<RoundRecord, StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock();
        if !tables.has_match(new.match_id) {
            return Err(StoreError::UnknownMatch(new.match_id));
        }
        if let Some(existing) = tables
            .rounds
            .iter()
            .find(|r| r.match_id == new.match_id && r.start_offset == new.start_offset)
        {
            return Ok(existing.clone());
        }
        let record = RoundRecord {
            id: RoundId(tables.rounds.len() as u64 + 1),
            match_id: new.match_id,
            number: new.number,
            map: new.map,
            start_time: new.start_time,
            start_offset: new.start_offset,
            end_time: None,
            winning_team: None,
            end_reason: None,
            duration_secs: None,
        };
        tables.rounds.push(record.clone());
        Ok(record)
    }

    async fn close_round(&self, id: RoundId, close: RoundClose) -> Result<(), StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock();
        let round = tables.round_mut(id)?;
        round.duration_secs = Some(
            close
                .end_time
                .signed_duration_since(round.start_time)
                .num_seconds()
                .max(0),
        );
        round.end_time = Some(close.end_time);
        round.winning_team = close.winning_team;
        round.end_reason = Some(close.reason);
        Ok(())
    }

    async fn latest_round(&self, match_id: MatchId) -> Result<Option<RoundRecord>, StoreError> {
        self.check_available()?;
        let tables = self.tables.lock();
        Ok(tables
            .rounds
            .iter()
            .filter(|r| r.match_id == match_id)
            .max_by_key(|r| r.number)
            .cloned())
    }

    async fn last_activity(
        &self,
        match_id: MatchId,
    ) -> Result<Option<NaiveDateTime>, StoreError> {
        self.check_available()?;
        let tables = self.tables.lock();
        let last_kill = tables
            .kills
            .iter()
            .filter(|k| k.match_id == Some(match_id))
            .map(|k| k.timestamp)
            .max();
        let last_round = tables
            .rounds
            .iter()
            .filter(|r| r.match_id == match_id)
            .map(|r| r.end_time.unwrap_or(r.start_time))
            .max();
        Ok(last_kill.max(last_round))
    }

    async fn get_or_create_player(
        &self,
        id: &PlayerId,
        name: &str,
    ) -> Result<PlayerRecord, StoreError> {
        self.check_available()?;
        Ok(self.tables.lock().upsert_player(id, name))
    }

    async fn record_join(
        &self,
        match_id: MatchId,
        player: &PlayerId,
        at: NaiveDateTime,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock();
        if !tables.has_match(match_id) {
            return Err(StoreError::UnknownMatch(match_id));
        }
        let row = tables.participant_mut(match_id, player);
        // Earliest join wins so replayed joins do not move it.
        row.joined_at = Some(row.joined_at.map_or(at, |t| t.min(at)));
        row.left_at = None;
        Ok(())
    }

    async fn record_leave(
        &self,
        match_id: MatchId,
        player: &PlayerId,
        at: NaiveDateTime,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock();
        if !tables.has_match(match_id) {
            return Err(StoreError::UnknownMatch(match_id));
        }
        tables.participant_mut(match_id, player).left_at = Some(at);
        Ok(())
    }

    async fn commit_kill(&self, tx: KillTransaction) -> Result<KillOutcome, StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock();

        // Validate everything before the first mutation.
        if tables.kill_keys.contains(&tx.kill().key) {
            return Ok(KillOutcome::Duplicate);
        }
        if let Some(match_id) = tx.kill().match_id
            && !tables.has_match(match_id)
        {
            return Err(StoreError::UnknownMatch(match_id));
        }
        if let Some(delta) = tx.participants().iter().find(|d| !tables.has_match(d.match_id)) {
            return Err(StoreError::UnknownMatch(delta.match_id));
        }

        let server = tx.kill().key.server.clone();
        for player in tx.players() {
            tables.upsert_player(&player.id, &player.name);
        }
        for delta in tx.participants() {
            let row = tables.participant_mut(delta.match_id, &delta.player);
            row.stats += delta.delta;
            if delta.team.is_some() {
                row.team = delta.team;
            }
        }
        for delta in tx.weapons() {
            let key = (server.clone(), delta.player.clone(), delta.weapon.clone());
            let row = tables.weapon_stats.entry(key).or_insert_with(|| WeaponStat {
                server: server.clone(),
                player: delta.player.clone(),
                weapon: delta.weapon.clone(),
                stats: StatLine::default(),
            });
            row.stats += delta.delta;
        }
        tables.kill_keys.insert(tx.kill().key.clone());
        tables.kills.push(tx.kill().clone());
        Ok(KillOutcome::Applied)
    }
}
