//! End-to-end runs of log files through the worker pipeline.

mod common;

use chrono::TimeDelta;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use common::*;
use sitrep_core::game_log::KillKind;
use sitrep_core::remote::RemoteControl;
use sitrep_core::signal_processor::ScenarioChange;
use sitrep_core::storage::{RoundEndReason, StatLine};
use sitrep_core::watcher::{ChangeNotifier, ServerWorker, run_to_end};
use sitrep_core::{CoreContext, EngineSettings, GameSignal, MemoryStore, ServerId, ServerSession};

fn context(store: Arc<MemoryStore>, remote: Arc<dyn RemoteControl>) -> CoreContext {
    CoreContext::with_settings(EngineSettings::default(), Arc::new(ScenarioChange), store, remote)
}

fn lifecycle_log() -> Vec<String> {
    vec![
        map_load(0, "Town"),
        kill(10, ("Alpha", "1001", 0), ("Bravo", "1002", 1), "M4A1"),
        round_over(20, 1, 0),
        map_load(30, "Farmhouse"),
        game_over(40),
    ]
}

#[tokio::test]
async fn test_match_lifecycle_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_log(dir.path(), "Insurgency.log", &lifecycle_log());
    let store = Arc::new(MemoryStore::new());
    let ctx = context(store.clone(), Arc::new(FakeRemote::offline()));
    let server = ServerId::from("s1");

    let recorder = RecordingHandler::default();
    let mut session = ServerSession::offline(server.clone(), &ctx);
    session.add_signal_handler(Box::new(recorder.clone()));
    let lines = run_to_end(&mut session, &path).await.unwrap();
    assert_eq!(lines, 5);

    let matches = store.matches(&server);
    assert_eq!(matches.len(), 1);
    let m = &matches[0];
    assert_eq!(m.map, "Town");
    assert_eq!(m.end_time.map(|t| t.format("%S").to_string()).as_deref(), Some("40"));
    assert_eq!(m.winning_team, Some(0));

    let rounds = store.rounds(m.id);
    assert_eq!(rounds.len(), 2);
    assert_eq!(
        rounds[0].end_reason,
        Some(RoundEndReason::Won {
            reason: "Elimination".to_string()
        })
    );
    assert_eq!(rounds[1].map, "Farmhouse");
    assert_eq!(rounds[1].end_reason, Some(RoundEndReason::GameOver));
    assert_eq!(rounds[1].end_time, m.end_time);

    let kills = store.kills(&server);
    assert_eq!(kills.len(), 1);
    assert_eq!(kills[0].kind, KillKind::Regular);
    assert_eq!(kills[0].match_id, Some(m.id));
    assert_eq!(kills[0].round_id, Some(rounds[0].id));

    // Signals arrive in log order.
    let names: Vec<&str> = recorder
        .seen
        .lock()
        .iter()
        .map(|s| match s {
            GameSignal::MatchStarted { .. } => "match+",
            GameSignal::MatchResumed { .. } => "resume",
            GameSignal::RoundStarted { .. } => "round+",
            GameSignal::RoundEnded { .. } => "round-",
            GameSignal::MatchEnded { .. } => "match-",
        })
        .collect();
    assert_eq!(names, vec!["match+", "round+", "round-", "round+", "round-", "match-"]);

    let metrics = ctx.metrics.snapshot();
    assert_eq!(metrics.lines_read, 5);
    assert_eq!(metrics.kills_recorded, 1);
}

#[tokio::test]
async fn test_kill_counters_by_kind() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_log(
        dir.path(),
        "Insurgency.log",
        &[
            map_load(0, "Town"),
            kill(1, ("Alpha", "1001", 0), ("Bravo", "1002", 1), "M4A1"),
            kill(2, ("Alpha", "1001", 0), ("Charlie", "1003", 0), "M4A1"),
            kill(3, ("Bravo", "1002", 1), ("Bravo", "1002", 1), "M67"),
            kill(4, ("Insurgent", "INVALID", 1), ("Alpha", "1001", 0), "AKM"),
        ],
    );
    let store = Arc::new(MemoryStore::new());
    let ctx = context(store.clone(), Arc::new(FakeRemote::offline()));
    let server = ServerId::from("s1");
    let mut session = ServerSession::offline(server.clone(), &ctx);
    run_to_end(&mut session, &path).await.unwrap();

    let m = &store.matches(&server)[0];
    let kinds: Vec<KillKind> = store.kills(&server).iter().map(|k| k.kind).collect();
    assert_eq!(
        kinds,
        vec![KillKind::Regular, KillKind::TeamKill, KillKind::Suicide, KillKind::Regular]
    );

    let stats = |id: &str| {
        store
            .participant(m.id, &id.into())
            .map(|p| p.stats)
            .unwrap_or_default()
    };
    assert_eq!(
        stats("1001"),
        StatLine {
            kills: 1,
            team_kills: 1,
            deaths: 1,
            ..StatLine::default()
        }
    );
    assert_eq!(
        stats("1002"),
        StatLine {
            deaths: 2,
            suicides: 1,
            ..StatLine::default()
        }
    );
    assert_eq!(stats("1003").deaths, 1);
    // The bot killer gets no rows of its own.
    assert_eq!(store.participants(m.id).len(), 3);
}

#[tokio::test]
async fn test_restart_replay_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let mut lines = vec![
        "[2024.05.04-19.59.59:000][0]LogInit: Display: Server starting\n".to_string(),
        map_load(0, "Town"),
    ];
    for sec in 1..=5 {
        lines.push(kill(sec, ("Alpha", "1001", 0), ("Bravo", "1002", 1), "M4A1"));
    }
    lines.push(round_over(6, 1, 0));
    let path = write_log(dir.path(), "Insurgency.log", &lines);
    let store = Arc::new(MemoryStore::new());
    let server = ServerId::from("s1");

    // First run: process the whole file.
    {
        let ctx = context(store.clone(), Arc::new(FakeRemote::offline()));
        let mut session = ServerSession::offline(server.clone(), &ctx);
        run_to_end(&mut session, &path).await.unwrap();
    }
    let m = store.matches(&server)[0].clone();
    assert!(m.is_active());
    let before = (store.participants(m.id), store.kills(&server).len());
    assert_eq!(before.1, 5);

    // The server kept playing while we were down.
    append_log(
        &path,
        &[kill(7, ("Bravo", "1002", 1), ("Alpha", "1001", 0), "AKM")],
    );

    // Restart: the live server is still on Town, so the match is resumed and
    // the file replayed from its map load.
    let remote = Arc::new(FakeRemote::on_map("Town"));
    let ctx = context(store.clone(), remote.clone());
    let (tx, rx) = mpsc::channel(4);
    let notifier = Arc::new(ChangeNotifier::new(tx));
    let recorder = RecordingHandler::default();
    let mut session = ServerSession::new(server.clone(), &ctx);
    session.add_signal_handler(Box::new(recorder.clone()));
    let cancel = CancellationToken::new();
    let worker = ServerWorker::new(session, &path, &ctx, rx, notifier, cancel.clone());
    let task = tokio::spawn(worker.run());

    tokio::time::timeout(Duration::from_secs(5), async {
        while store.kills(&server).len() < 6 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("replay finished");
    cancel.cancel();
    task.await.unwrap();

    let matches = store.matches(&server);
    assert_eq!(matches.len(), 1, "resumed instead of opening a new match");
    assert!(matches[0].is_active());
    assert!(matches!(recorder.seen.lock().first(), Some(GameSignal::MatchResumed { .. })));

    let kills = store.kills(&server);
    assert_eq!(kills.len(), 6);
    let alpha = store.participant(m.id, &"1001".into()).unwrap().stats;
    let bravo = store.participant(m.id, &"1002".into()).unwrap().stats;
    assert_eq!((alpha.kills, alpha.deaths), (5, 1));
    assert_eq!((bravo.kills, bravo.deaths), (1, 5));
    assert_eq!(ctx.metrics.duplicate_kills(), 5);
    // Replayed lines do not hit the remote side.
    assert_eq!(remote.player_queries.load(std::sync::atomic::Ordering::SeqCst), 0);

    let m4 = store
        .weapon_stat(&server, &"1001".into(), "M4A1")
        .unwrap();
    assert_eq!(m4.kills, 5);
}

#[tokio::test]
async fn test_held_events_recorded_when_worker_stops() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_log(dir.path(), "Insurgency.log", &[]);
    let store = Arc::new(MemoryStore::new());
    let server = ServerId::from("s1");
    let settings = EngineSettings {
        pending_grace: TimeDelta::hours(1),
        ..EngineSettings::default()
    };
    let ctx = CoreContext::with_settings(
        settings,
        Arc::new(ScenarioChange),
        store.clone(),
        Arc::new(FakeRemote::offline()),
    );

    let (tx, rx) = mpsc::channel(4);
    let notifier = Arc::new(ChangeNotifier::new(tx));
    let session = ServerSession::new(server.clone(), &ctx);
    let cancel = CancellationToken::new();
    let worker = ServerWorker::new(session, &path, &ctx, rx, notifier.clone(), cancel.clone());
    let task = tokio::spawn(worker.run());

    // The server is offline, so the worker tails from the (empty) end.
    tokio::time::timeout(Duration::from_secs(5), async {
        while ctx.metrics.remote_failures() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("catch-up finished");
    tokio::time::sleep(Duration::from_millis(200)).await;

    append_log(&path, &[kill(1, ("Alpha", "1001", 0), ("Bravo", "1002", 1), "M4A1")]);
    notifier.notify();
    tokio::time::timeout(Duration::from_secs(5), async {
        while ctx.metrics.lines_read() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("line read");
    // Still waiting for a map load.
    assert!(store.kills(&server).is_empty());

    cancel.cancel();
    task.await.unwrap();

    let kills = store.kills(&server);
    assert_eq!(kills.len(), 1);
    assert_eq!(kills[0].match_id, None);
    assert!(store.matches(&server).is_empty());
}
