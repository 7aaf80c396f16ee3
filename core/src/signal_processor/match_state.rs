//! Per-server match/round state machine.
//!
//! Phases:
//! - Idle: no match known, waiting for the first map load
//! - RoundActive: a match is open and its current round has not ended
//! - RoundEnded: round over seen, waiting for the next round or map
//! - MatchEnded: game over seen, waiting for the next map load
//!
//! The tracker is the only writer of match and round rows for its server.
//! Kill/join/leave events are released as [`ReadyEvent`]s carrying the
//! match and round they belong to. While no match is open they are held
//! for a short grace window (event time) so a map load that follows right
//! after can still claim them.

use chrono::{NaiveDateTime, TimeDelta};
use hashbrown::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;

use super::boundary::{MapTransition, MatchBoundary};
use super::GameSignal;
use crate::error::StoreError;
use crate::game_log::{EventKind, GameEvent};
use crate::storage::{
    MatchId, MatchRecord, NewMatch, NewRound, PlayerId, RoundClose, RoundEndReason, RoundId,
    RoundRecord, ServerId, Store,
};

pub const DEFAULT_PENDING_GRACE_SECS: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchPhase {
    #[default]
    Idle,
    RoundActive,
    RoundEnded,
    MatchEnded,
}

/// Match and round an event is credited to. Both `None` means unattributed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Attribution {
    pub match_id: Option<MatchId>,
    pub round_id: Option<RoundId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadyEvent {
    pub event: GameEvent,
    pub attribution: Attribution,
}

#[derive(Debug, Default)]
pub struct TrackerOutput {
    pub signals: Vec<GameSignal>,
    /// Events released for aggregation, in log order.
    pub ready: Vec<ReadyEvent>,
}

#[derive(Debug)]
struct ActiveMatch {
    record: MatchRecord,
    round: Option<RoundRecord>,
    last_winner: Option<u8>,
}

pub struct MatchTracker {
    server: ServerId,
    store: Arc<dyn Store>,
    boundary: Arc<dyn MatchBoundary>,
    pending_grace: TimeDelta,
    phase: MatchPhase,
    active: Option<ActiveMatch>,
    pending: VecDeque<GameEvent>,
    /// Connected players, carried into each new match.
    roster: HashMap<PlayerId, String>,
}

impl MatchTracker {
    pub fn new(
        server: ServerId,
        store: Arc<dyn Store>,
        boundary: Arc<dyn MatchBoundary>,
        pending_grace: TimeDelta,
    ) -> Self {
        Self {
            server,
            store,
            boundary,
            pending_grace,
            phase: MatchPhase::Idle,
            active: None,
            pending: VecDeque::new(),
            roster: HashMap::new(),
        }
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    pub fn active_match(&self) -> Option<&MatchRecord> {
        self.active.as_ref().map(|a| &a.record)
    }

    pub fn current_round(&self) -> Option<&RoundRecord> {
        self.active.as_ref().and_then(|a| a.round.as_ref())
    }

    pub fn attribution(&self) -> Attribution {
        Attribution {
            match_id: self.active.as_ref().map(|a| a.record.id),
            round_id: self.current_round().map(|r| r.id),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn roster_len(&self) -> usize {
        self.roster.len()
    }

    /// Forget connected players, e.g. after the server started a fresh log.
    pub fn reset_roster(&mut self) {
        self.roster.clear();
    }

    /// Adopt an open match from a previous run.
    pub async fn resume(&mut self, record: MatchRecord) -> Result<Vec<GameSignal>, StoreError> {
        let round = self.store.latest_round(record.id).await?;
        self.phase = match &round {
            Some(r) if !r.is_open() => MatchPhase::RoundEnded,
            _ => MatchPhase::RoundActive,
        };
        let signal = GameSignal::MatchResumed {
            match_id: record.id,
            map: record.map.clone(),
        };
        self.active = Some(ActiveMatch {
            last_winner: round.as_ref().and_then(|r| r.winning_team),
            record,
            round,
        });
        Ok(vec![signal])
    }

    /// Apply one event. Lifecycle events change state; attributable events
    /// come back in `ready` (now or once a later event settles them).
    pub async fn advance(&mut self, event: GameEvent) -> Result<TrackerOutput, StoreError> {
        let mut out = TrackerOutput::default();
        self.flush_expired(event.timestamp, &mut out);
        self.track_roster(&event);

        match &event.kind {
            EventKind::MapLoad {
                map,
                scenario,
                mode,
            } => {
                let transition = MapTransition {
                    map: map.as_str(),
                    scenario: scenario.as_deref(),
                    mode: mode.as_deref(),
                };
                self.on_map_load(&event, transition, &mut out).await?;
            }
            EventKind::RoundStart { .. } => self.on_round_start(&event, &mut out).await?,
            EventKind::RoundOver {
                winning_team,
                reason,
                ..
            } => {
                if self.phase == MatchPhase::RoundActive {
                    let reason = RoundEndReason::Won {
                        reason: reason.clone(),
                    };
                    self.close_round(event.timestamp, Some(*winning_team), reason, &mut out)
                        .await?;
                } else {
                    tracing::debug!(server = %self.server, phase = ?self.phase, "Round over without open round");
                }
            }
            EventKind::GameOver => {
                if self.active.is_some() {
                    self.close_match(event.timestamp, RoundEndReason::GameOver, &mut out)
                        .await?;
                }
            }
            _ => {}
        }

        if event.kind.is_attributable() {
            match self.phase {
                // Only a tracker that has not seen a map yet waits for one.
                MatchPhase::Idle if self.active.is_none() => self.pending.push_back(event),
                _ => out.ready.push(ReadyEvent {
                    attribution: self.attribution(),
                    event,
                }),
            }
        }
        Ok(out)
    }

    /// Release everything still waiting for a match, unattributed.
    pub fn flush_pending(&mut self) -> Vec<ReadyEvent> {
        self.pending
            .drain(..)
            .map(|event| ReadyEvent {
                event,
                attribution: Attribution::default(),
            })
            .collect()
    }

    fn flush_expired(&mut self, now: NaiveDateTime, out: &mut TrackerOutput) {
        while let Some(front) = self.pending.front() {
            if now.signed_duration_since(front.timestamp) <= self.pending_grace {
                break;
            }
            if let Some(event) = self.pending.pop_front() {
                out.ready.push(ReadyEvent {
                    event,
                    attribution: Attribution::default(),
                });
            }
        }
    }

    fn track_roster(&mut self, event: &GameEvent) {
        match &event.kind {
            EventKind::PlayerJoin {
                name,
                player_id: Some(id),
            } => {
                self.roster.insert(id.clone(), name.clone());
            }
            EventKind::PlayerLeave { player_id } => {
                self.roster.remove(player_id);
            }
            _ => {}
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transitions
    // ─────────────────────────────────────────────────────────────────────────

    async fn on_map_load(
        &mut self,
        event: &GameEvent,
        transition: MapTransition<'_>,
        out: &mut TrackerOutput,
    ) -> Result<(), StoreError> {
        let Some(active) = &self.active else {
            return self.open_match(event, transition, out).await;
        };

        // Replaying the line that opened the active match.
        if active.record.start_offset == event.origin.offset
            && active.record.start_time == event.timestamp
        {
            return self.reopen_first_round(event, transition.map).await;
        }

        if self.boundary.starts_new_match(&active.record, &transition) {
            self.close_match(event.timestamp, RoundEndReason::MapChange, out)
                .await?;
            return self.open_match(event, transition, out).await;
        }

        self.close_round(event.timestamp, None, RoundEndReason::MapChange, out)
            .await?;
        let number = self.current_round().map_or(1, |r| r.number + 1);
        self.open_round(number, transition.map, event, out).await
    }

    async fn on_round_start(
        &mut self,
        event: &GameEvent,
        out: &mut TrackerOutput,
    ) -> Result<(), StoreError> {
        if self.phase != MatchPhase::RoundEnded {
            return Ok(());
        }
        let Some(active) = &self.active else {
            return Ok(());
        };
        let (number, map) = match &active.round {
            Some(round) => (round.number + 1, round.map.clone()),
            None => (1, active.record.map.clone()),
        };
        self.open_round(number, &map, event, out).await
    }

    async fn open_match(
        &mut self,
        event: &GameEvent,
        transition: MapTransition<'_>,
        out: &mut TrackerOutput,
    ) -> Result<(), StoreError> {
        if let Some(stale) = self.store.active_match(&self.server).await? {
            tracing::warn!(server = %self.server, match_id = %stale.id, "Closing dangling match");
            out.signals
                .extend(close_stale_match(self.store.as_ref(), &stale).await?);
        }

        let record = self
            .store
            .create_match(NewMatch {
                server: self.server.clone(),
                map: transition.map.to_string(),
                scenario: transition.scenario.map(str::to_string),
                mode: transition.mode.map(str::to_string),
                start_time: event.timestamp,
                start_offset: event.origin.offset,
            })
            .await?;
        out.signals.push(GameSignal::MatchStarted {
            match_id: record.id,
            map: record.map.clone(),
            timestamp: event.timestamp,
        });
        let match_id = record.id;
        self.active = Some(ActiveMatch {
            record,
            round: None,
            last_winner: None,
        });
        self.open_round(1, transition.map, event, out).await?;

        for (id, name) in &self.roster {
            self.store.get_or_create_player(id, name).await?;
            self.store.record_join(match_id, id, event.timestamp).await?;
        }

        let attribution = self.attribution();
        out.ready
            .extend(self.pending.drain(..).map(|event| ReadyEvent { event, attribution }));
        Ok(())
    }

    async fn open_round(
        &mut self,
        number: u32,
        map: &str,
        event: &GameEvent,
        out: &mut TrackerOutput,
    ) -> Result<(), StoreError> {
        let Some(active) = &mut self.active else {
            return Ok(());
        };
        let round = self
            .store
            .create_round(NewRound {
                match_id: active.record.id,
                number,
                map: map.to_string(),
                start_time: event.timestamp,
                start_offset: event.origin.offset,
            })
            .await?;
        out.signals.push(GameSignal::RoundStarted {
            match_id: active.record.id,
            round_id: round.id,
            number: round.number,
            map: round.map.clone(),
            timestamp: event.timestamp,
        });
        self.phase = if round.is_open() {
            MatchPhase::RoundActive
        } else {
            MatchPhase::RoundEnded
        };
        active.round = Some(round);
        Ok(())
    }

    async fn reopen_first_round(&mut self, event: &GameEvent, map: &str) -> Result<(), StoreError> {
        let Some(active) = &mut self.active else {
            return Ok(());
        };
        let round = self
            .store
            .create_round(NewRound {
                match_id: active.record.id,
                number: 1,
                map: map.to_string(),
                start_time: event.timestamp,
                start_offset: event.origin.offset,
            })
            .await?;
        tracing::debug!(server = %self.server, match_id = %active.record.id, "Replaying from match start");
        self.phase = if round.is_open() {
            MatchPhase::RoundActive
        } else {
            MatchPhase::RoundEnded
        };
        active.round = Some(round);
        Ok(())
    }

    async fn close_round(
        &mut self,
        at: NaiveDateTime,
        winning_team: Option<u8>,
        reason: RoundEndReason,
        out: &mut TrackerOutput,
    ) -> Result<(), StoreError> {
        let Some(active) = &mut self.active else {
            return Ok(());
        };
        let Some(round) = active.round.as_mut().filter(|r| r.is_open()) else {
            return Ok(());
        };
        self.store
            .close_round(
                round.id,
                RoundClose {
                    end_time: at,
                    winning_team,
                    reason: reason.clone(),
                },
            )
            .await?;
        round.end_time = Some(at);
        round.winning_team = winning_team;
        round.end_reason = Some(reason.clone());
        round.duration_secs = Some(at.signed_duration_since(round.start_time).num_seconds().max(0));
        if winning_team.is_some() {
            active.last_winner = winning_team;
        }
        out.signals.push(GameSignal::RoundEnded {
            match_id: active.record.id,
            round_id: round.id,
            number: round.number,
            winning_team,
            reason,
            timestamp: at,
        });
        self.phase = MatchPhase::RoundEnded;
        Ok(())
    }

    async fn close_match(
        &mut self,
        at: NaiveDateTime,
        round_reason: RoundEndReason,
        out: &mut TrackerOutput,
    ) -> Result<(), StoreError> {
        self.close_round(at, None, round_reason, out).await?;
        let Some(active) = self.active.take() else {
            return Ok(());
        };
        if let Err(e) = self
            .store
            .close_match(active.record.id, at, active.last_winner)
            .await
        {
            self.active = Some(active);
            return Err(e);
        }
        out.signals.push(GameSignal::MatchEnded {
            match_id: active.record.id,
            winning_team: active.last_winner,
            timestamp: at,
        });
        self.phase = MatchPhase::MatchEnded;
        Ok(())
    }
}

/// Close a match left open by an earlier run at its last recorded activity.
pub async fn close_stale_match(
    store: &dyn Store,
    stale: &MatchRecord,
) -> Result<Vec<GameSignal>, StoreError> {
    let ended_at = store
        .last_activity(stale.id)
        .await?
        .unwrap_or(stale.start_time);
    let latest = store.latest_round(stale.id).await?;
    let mut signals = Vec::new();

    if let Some(round) = latest.as_ref().filter(|r| r.is_open()) {
        store
            .close_round(
                round.id,
                RoundClose {
                    end_time: ended_at,
                    winning_team: None,
                    reason: RoundEndReason::Reconciled,
                },
            )
            .await?;
        signals.push(GameSignal::RoundEnded {
            match_id: stale.id,
            round_id: round.id,
            number: round.number,
            winning_team: None,
            reason: RoundEndReason::Reconciled,
            timestamp: ended_at,
        });
    }

    let winner = latest.and_then(|r| r.winning_team);
    store.close_match(stale.id, ended_at, winner).await?;
    signals.push(GameSignal::MatchEnded {
        match_id: stale.id,
        winning_team: winner,
        timestamp: ended_at,
    });
    Ok(signals)
}
