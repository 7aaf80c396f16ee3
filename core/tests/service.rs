//! The live service against real files and the real watcher.

mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use sitrep_core::signal_processor::SignalHandler;
use sitrep_core::watcher::run_to_end;
use sitrep_core::{CoreContext, MemoryStore, ServerId, ServerSession, StatsService};
use sitrep_types::{AppConfig, ServerConfig};

fn server(id: &str, log_path: PathBuf) -> ServerConfig {
    ServerConfig {
        id: id.to_string(),
        name: String::new(),
        log_path,
        rcon_address: None,
        rcon_password: None,
        query_address: None,
        enabled: true,
    }
}

async fn wait_for(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition reached in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tails_new_lines_and_isolates_servers() {
    let dir = tempfile::tempdir().unwrap();
    // Content from before startup is history and must not be counted.
    let live = write_log(
        dir.path(),
        "Insurgency.log",
        &[
            map_load(0, "Town"),
            kill(1, ("Alpha", "1001", 0), ("Bravo", "1002", 1), "M4A1"),
        ],
    );
    let missing = dir.path().join("other").join("Insurgency.log");

    let config = AppConfig {
        poll_interval_ms: 50,
        servers: vec![server("live", live.clone()), server("missing", missing)],
        ..AppConfig::default()
    };
    let store = Arc::new(MemoryStore::new());
    let ctx = CoreContext::new(&config, store.clone(), Arc::new(FakeRemote::offline()));
    let mut handle = StatsService::start(&config, ctx);
    let live_id = ServerId::from("live");

    // Both status queries fail, so both workers tail from the end.
    wait_for(|| handle.context().metrics.remote_failures() == 2).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(store.matches(&live_id).is_empty());
    assert!(handle.context().metrics.watch_errors() > 0);

    append_log(
        &live,
        &[
            map_load(100, "Farmhouse"),
            kill(101, ("Alpha", "1001", 0), ("Bravo", "1002", 1), "M4A1"),
            kill(102, ("Bravo", "1002", 1), ("Alpha", "1001", 0), "AKM"),
        ],
    );
    wait_for(|| store.kills(&live_id).len() == 2).await;
    let matches = store.matches(&live_id);
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].map, "Farmhouse");

    assert!(handle.disable_server(&ServerId::from("missing")).await);
    assert!(!handle.disable_server(&ServerId::from("missing")).await);

    handle.shutdown().await;
    append_log(&live, &[kill(103, ("Alpha", "1001", 0), ("Bravo", "1002", 1), "M4A1")]);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(store.kills(&live_id).len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_kill_before_any_map_load_is_kept() {
    let dir = tempfile::tempdir().unwrap();
    let live = write_log(dir.path(), "Insurgency.log", &[]);
    let config = AppConfig {
        poll_interval_ms: 50,
        pending_grace_secs: 1,
        servers: vec![server("live", live.clone())],
        ..AppConfig::default()
    };
    let store = Arc::new(MemoryStore::new());
    let ctx = CoreContext::new(&config, store.clone(), Arc::new(FakeRemote::offline()));
    let handle = StatsService::start(&config, ctx);
    let id = ServerId::from("live");

    wait_for(|| handle.context().metrics.remote_failures() == 1).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    // No map load ever follows, and no later line settles the grace window.
    append_log(&live, &[kill(10, ("Alpha", "1001", 0), ("Bravo", "1002", 1), "M4A1")]);
    wait_for(|| store.kills(&id).len() == 1).await;

    let kills = store.kills(&id);
    assert_eq!(kills[0].match_id, None);
    assert_eq!(kills[0].weapon, "M4A1");
    assert!(store.matches(&id).is_empty());
    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_chunked_appends_match_in_order_parse() {
    let content = [
        map_load(0, "Town"),
        kill(5, ("Alpha", "1001", 0), ("Bravo", "1002", 1), "M4A1"),
        kill(6, ("Bravo", "1002", 1), ("Charlie", "1003", 1), "AKM"),
        round_over(20, 1, 0),
        map_load(30, "Farmhouse"),
        kill(35, ("Charlie", "1003", 1), ("Charlie", "1003", 1), "M67"),
        kill(36, ("Alpha", "1001", 0), ("Charlie", "1003", 1), "M4A1"),
        game_over(40),
    ]
    .concat();
    let server_id = ServerId::from("live");

    // Reference: the same bytes parsed in one pass.
    let dir = tempfile::tempdir().unwrap();
    let reference_path = write_log(dir.path(), "reference.log", &[content.clone()]);
    let reference = Arc::new(MemoryStore::new());
    let reference_signals = RecordingHandler::default();
    {
        let config = AppConfig::default();
        let ctx = CoreContext::new(&config, reference.clone(), Arc::new(FakeRemote::offline()));
        let mut session = ServerSession::offline(server_id.clone(), &ctx);
        session.add_signal_handler(Box::new(reference_signals.clone()));
        run_to_end(&mut session, &reference_path).await.unwrap();
    }

    let live = write_log(dir.path(), "Insurgency.log", &[]);
    let config = AppConfig {
        poll_interval_ms: 50,
        servers: vec![server("live", live.clone())],
        ..AppConfig::default()
    };
    let store = Arc::new(MemoryStore::new());
    let ctx = CoreContext::new(&config, store.clone(), Arc::new(FakeRemote::offline()));
    let live_signals = RecordingHandler::default();
    let recorder = live_signals.clone();
    let handle = StatsService::start_with(&config, ctx, move |_| {
        vec![Box::new(recorder.clone()) as Box<dyn SignalHandler + Send + Sync>]
    });

    wait_for(|| handle.context().metrics.remote_failures() == 1).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Uneven chunks, most of them ending mid-line.
    let bytes = content.as_bytes();
    let sizes = [7, 61, 1, 113, 29, 250, 3];
    let mut at = 0;
    for size in sizes.iter().cycle() {
        if at >= bytes.len() {
            break;
        }
        let end = (at + size).min(bytes.len());
        let chunk = String::from_utf8(bytes[at..end].to_vec()).unwrap();
        append_log(&live, &[chunk]);
        at = end;
        tokio::time::sleep(Duration::from_millis(15)).await;
    }

    let expected = reference_signals.seen.lock().len();
    wait_for(|| live_signals.seen.lock().len() >= expected).await;
    handle.shutdown().await;

    assert_eq!(*live_signals.seen.lock(), *reference_signals.seen.lock());
    assert_eq!(store.matches(&server_id), reference.matches(&server_id));
    assert_eq!(store.kills(&server_id), reference.kills(&server_id));
    for m in reference.matches(&server_id) {
        assert_eq!(store.rounds(m.id), reference.rounds(m.id));
    }
}
