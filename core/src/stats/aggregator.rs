//! Turns attributed events into persisted statistics.
//!
//! Each kill becomes one [`KillTransaction`]: the kill row plus every
//! participant and weapon counter it moves. The store applies it whole and
//! drops it if the dedup key was already seen, so replaying a log segment
//! never double counts.

use std::sync::Arc;

use crate::error::StoreError;
use crate::game_log::{Combatant, EventKind, GameEvent, KillEvent, KillKind};
use crate::metrics::Metrics;
use crate::signal_processor::{Attribution, ReadyEvent};
use crate::storage::{KillOutcome, KillRecord, KillTransaction, StatLine, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOutcome {
    Applied,
    Duplicate,
    /// Nothing to aggregate for this event.
    Skipped,
}

pub struct StatsAggregator {
    store: Arc<dyn Store>,
    metrics: Arc<Metrics>,
}

impl StatsAggregator {
    pub fn new(store: Arc<dyn Store>, metrics: Arc<Metrics>) -> Self {
        Self { store, metrics }
    }

    /// Apply an event, logging and counting failures instead of returning them.
    ///
    /// A failed event is not retried: its transaction was rolled back and a
    /// retry could race a later replay.
    pub async fn record(&self, ready: &ReadyEvent) -> Option<AggregateOutcome> {
        match self.apply(ready).await {
            Ok(outcome) => {
                match outcome {
                    AggregateOutcome::Applied if matches!(ready.event.kind, EventKind::Kill(_)) => {
                        self.metrics.kill_recorded();
                    }
                    AggregateOutcome::Duplicate => self.metrics.duplicate_kill(),
                    _ => {}
                }
                Some(outcome)
            }
            Err(e) => {
                self.metrics.aggregation_failed();
                tracing::warn!(
                    server = %ready.event.server,
                    line = ready.event.origin.line,
                    event = ready.event.kind.name(),
                    error = %e,
                    "Failed to aggregate event"
                );
                None
            }
        }
    }

    pub async fn apply(&self, ready: &ReadyEvent) -> Result<AggregateOutcome, StoreError> {
        let ReadyEvent { event, attribution } = ready;
        match &event.kind {
            EventKind::Kill(kill) => {
                let tx = build_kill_transaction(event, kill, *attribution);
                Ok(match self.store.commit_kill(tx).await? {
                    KillOutcome::Applied => AggregateOutcome::Applied,
                    KillOutcome::Duplicate => AggregateOutcome::Duplicate,
                })
            }
            EventKind::PlayerJoin {
                name,
                player_id: Some(id),
            } => {
                self.store.get_or_create_player(id, name).await?;
                if let Some(match_id) = attribution.match_id {
                    self.store.record_join(match_id, id, event.timestamp).await?;
                }
                Ok(AggregateOutcome::Applied)
            }
            EventKind::PlayerLeave { player_id } => match attribution.match_id {
                Some(match_id) => {
                    self.store
                        .record_leave(match_id, player_id, event.timestamp)
                        .await?;
                    Ok(AggregateOutcome::Applied)
                }
                None => Ok(AggregateOutcome::Skipped),
            },
            _ => Ok(AggregateOutcome::Skipped),
        }
    }
}

fn stat(f: impl FnOnce(&mut StatLine)) -> StatLine {
    let mut line = StatLine::default();
    f(&mut line);
    line
}

/// Build every row one kill touches. Bots get no player, participant or
/// weapon rows; their kill record is still kept.
pub fn build_kill_transaction(
    event: &GameEvent,
    kill: &KillEvent,
    attribution: Attribution,
) -> KillTransaction {
    let kind = kill.kind();
    let mut tx = KillTransaction::append_kill(KillRecord {
        key: event.dedup_key(),
        match_id: attribution.match_id,
        round_id: attribution.round_id,
        timestamp: event.timestamp,
        killer: kill.killer.clone(),
        assists: kill.assists.clone(),
        victim: kill.victim.clone(),
        weapon: kill.weapon.clone(),
        kind,
    });

    let mut credit = |who: &Combatant, delta: StatLine, weapon: bool| {
        let Some(id) = &who.player_id else {
            return;
        };
        tx.get_or_create_player(id.clone(), &who.name);
        if let Some(match_id) = attribution.match_id {
            tx.upsert_participant_stats(match_id, id.clone(), who.team, delta);
        }
        if weapon {
            tx.upsert_weapon_stat(id.clone(), &kill.weapon, delta);
        }
    };

    match (kind, &kill.killer) {
        (KillKind::Suicide, _) => {
            credit(
                &kill.victim,
                stat(|s| {
                    s.suicides = 1;
                    s.deaths = 1;
                }),
                true,
            );
        }
        (KillKind::TeamKill, Some(killer)) => {
            credit(killer, stat(|s| s.team_kills = 1), true);
            credit(&kill.victim, stat(|s| s.deaths = 1), true);
        }
        (KillKind::Regular, Some(killer)) => {
            credit(killer, stat(|s| s.kills = 1), true);
            credit(&kill.victim, stat(|s| s.deaths = 1), true);
            for assist in &kill.assists {
                if !assist.same_as(killer) {
                    credit(assist, stat(|s| s.assists = 1), false);
                }
            }
        }
        // Classification only yields these kinds with a killer present.
        (KillKind::TeamKill | KillKind::Regular, None) => {}
    }
    tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game_log::EventOrigin;
    use crate::storage::{MatchId, MemoryStore, NewMatch, PlayerId, ServerId};
    use chrono::NaiveDate;

    fn kill_event(offset: u64, kill: KillEvent) -> GameEvent {
        GameEvent {
            server: ServerId::from("s1"),
            origin: EventOrigin { line: 1, offset },
            timestamp: NaiveDate::from_ymd_opt(2024, 2, 2)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
            kind: EventKind::Kill(kill),
        }
    }

    fn attributed(match_id: MatchId) -> Attribution {
        Attribution {
            match_id: Some(match_id),
            round_id: None,
        }
    }

    async fn store_with_match() -> (Arc<MemoryStore>, MatchId) {
        let store = Arc::new(MemoryStore::new());
        let record = store
            .create_match(NewMatch {
                server: ServerId::from("s1"),
                map: "Town".to_string(),
                scenario: None,
                mode: None,
                start_time: NaiveDate::from_ymd_opt(2024, 2, 2)
                    .unwrap()
                    .and_hms_opt(9, 0, 0)
                    .unwrap(),
                start_offset: 0,
            })
            .await
            .unwrap();
        (store, record.id)
    }

    #[test]
    fn test_regular_kill_rows() {
        let kill = KillEvent {
            killer: Some(Combatant::player("A", "1", 0)),
            assists: vec![Combatant::player("C", "3", 0)],
            victim: Combatant::player("B", "2", 1),
            weapon: "M4A1".to_string(),
        };
        let event = kill_event(10, kill.clone());
        let tx = build_kill_transaction(&event, &kill, attributed(MatchId(1)));

        assert_eq!(tx.kill().kind, KillKind::Regular);
        assert_eq!(tx.players().len(), 3);
        let rows: Vec<_> = tx
            .participants()
            .iter()
            .map(|p| (p.player.as_str().to_string(), p.delta))
            .collect();
        assert_eq!(rows[0], ("1".to_string(), stat(|s| s.kills = 1)));
        assert_eq!(rows[1], ("2".to_string(), stat(|s| s.deaths = 1)));
        assert_eq!(rows[2], ("3".to_string(), stat(|s| s.assists = 1)));
        // Assists do not touch weapon rows.
        assert_eq!(tx.weapons().len(), 2);
    }

    #[test]
    fn test_team_kill_and_suicide_rows() {
        let tk = KillEvent {
            killer: Some(Combatant::player("A", "1", 0)),
            assists: vec![],
            victim: Combatant::player("C", "3", 0),
            weapon: "M4A1".to_string(),
        };
        let tx = build_kill_transaction(&kill_event(1, tk.clone()), &tk, attributed(MatchId(1)));
        assert_eq!(tx.kill().kind, KillKind::TeamKill);
        assert_eq!(tx.participants()[0].delta, stat(|s| s.team_kills = 1));
        assert_eq!(tx.participants()[1].delta, stat(|s| s.deaths = 1));

        let world = KillEvent {
            killer: None,
            assists: vec![],
            victim: Combatant::player("B", "2", 1),
            weapon: "Fall".to_string(),
        };
        let tx = build_kill_transaction(&kill_event(2, world.clone()), &world, attributed(MatchId(1)));
        assert_eq!(tx.kill().kind, KillKind::Suicide);
        assert_eq!(tx.participants().len(), 1);
        assert_eq!(
            tx.participants()[0].delta,
            stat(|s| {
                s.suicides = 1;
                s.deaths = 1;
            })
        );
        assert_eq!(tx.weapons()[0].weapon, "Fall");
    }

    #[test]
    fn test_bot_rows_are_skipped_but_kill_kept() {
        let kill = KillEvent {
            killer: Some(Combatant::player("A", "1", 0)),
            assists: vec![],
            victim: Combatant::bot("Insurgent", 1),
            weapon: "M4A1".to_string(),
        };
        let tx = build_kill_transaction(&kill_event(3, kill.clone()), &kill, Attribution::default());
        assert_eq!(tx.players().len(), 1);
        assert!(tx.participants().is_empty());
        assert_eq!(tx.weapons().len(), 1);
        assert_eq!(tx.kill().victim.name, "Insurgent");
        assert!(tx.kill().match_id.is_none());
    }

    #[tokio::test]
    async fn test_replayed_kill_counts_once() {
        let (store, match_id) = store_with_match().await;
        let metrics = Arc::new(Metrics::new());
        let aggregator = StatsAggregator::new(store.clone(), metrics.clone());

        let kill = KillEvent {
            killer: Some(Combatant::player("A", "1", 0)),
            assists: vec![],
            victim: Combatant::player("B", "2", 1),
            weapon: "M4A1".to_string(),
        };
        let ready = ReadyEvent {
            event: kill_event(500, kill),
            attribution: attributed(match_id),
        };

        assert_eq!(aggregator.record(&ready).await, Some(AggregateOutcome::Applied));
        assert_eq!(aggregator.record(&ready).await, Some(AggregateOutcome::Duplicate));

        let killer = store.participant(match_id, &PlayerId::from("1")).unwrap();
        let victim = store.participant(match_id, &PlayerId::from("2")).unwrap();
        assert_eq!(killer.stats.kills, 1);
        assert_eq!(victim.stats.deaths, 1);
        assert_eq!(metrics.kills_recorded(), 1);
        assert_eq!(metrics.duplicate_kills(), 1);
    }

    #[tokio::test]
    async fn test_failure_is_counted_and_rolled_back() {
        let (store, _) = store_with_match().await;
        let metrics = Arc::new(Metrics::new());
        let aggregator = StatsAggregator::new(store.clone(), metrics.clone());

        let kill = KillEvent {
            killer: Some(Combatant::player("A", "1", 0)),
            assists: vec![],
            victim: Combatant::player("B", "2", 1),
            weapon: "M4A1".to_string(),
        };
        let ready = ReadyEvent {
            event: kill_event(600, kill),
            attribution: attributed(MatchId(42)),
        };

        assert_eq!(aggregator.record(&ready).await, None);
        assert_eq!(metrics.failed_aggregations(), 1);
        assert!(store.kills(&ServerId::from("s1")).is_empty());
        assert!(store.player(&PlayerId::from("1")).is_none());
    }

    #[tokio::test]
    async fn test_join_and_leave_update_participant() {
        let (store, match_id) = store_with_match().await;
        let aggregator = StatsAggregator::new(store.clone(), Arc::new(Metrics::new()));
        let at = NaiveDate::from_ymd_opt(2024, 2, 2)
            .unwrap()
            .and_hms_opt(9, 5, 0)
            .unwrap();
        let mut event = kill_event(0, KillEvent {
            killer: None,
            assists: vec![],
            victim: Combatant::bot("x", 0),
            weapon: String::new(),
        });
        event.timestamp = at;

        event.kind = EventKind::PlayerJoin {
            name: "Alpha".to_string(),
            player_id: Some(PlayerId::from("1")),
        };
        let join = ReadyEvent {
            event: event.clone(),
            attribution: attributed(match_id),
        };
        assert_eq!(aggregator.apply(&join).await.unwrap(), AggregateOutcome::Applied);

        event.kind = EventKind::PlayerLeave {
            player_id: PlayerId::from("1"),
        };
        let leave = ReadyEvent {
            event,
            attribution: attributed(match_id),
        };
        aggregator.apply(&leave).await.unwrap();

        let row = store.participant(match_id, &PlayerId::from("1")).unwrap();
        assert_eq!(row.joined_at, Some(at));
        assert_eq!(row.left_at, Some(at));
        assert_eq!(store.player(&PlayerId::from("1")).unwrap().name, "Alpha");
    }
}
