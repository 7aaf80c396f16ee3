#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use sitrep_core::GameSignal;
use sitrep_core::error::RemoteError;
use sitrep_core::remote::{PlayerInfo, RemoteControl, ServerStatus};
use sitrep_core::signal_processor::SignalHandler;
use sitrep_core::storage::ServerId;

/// Remote double: reports a fixed map (or fails) and counts player queries.
#[derive(Default)]
pub struct FakeRemote {
    pub map: Option<String>,
    pub player_queries: AtomicUsize,
}

impl FakeRemote {
    pub fn on_map(map: &str) -> Self {
        Self {
            map: Some(map.to_string()),
            ..Self::default()
        }
    }

    pub fn offline() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RemoteControl for FakeRemote {
    async fn list_players(&self, _server: &ServerId) -> Result<Vec<PlayerInfo>, RemoteError> {
        self.player_queries.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    async fn query_status(&self, _server: &ServerId) -> Result<ServerStatus, RemoteError> {
        let map = self
            .map
            .clone()
            .ok_or_else(|| RemoteError::Protocol("server offline".to_string()))?;
        Ok(ServerStatus {
            name: "test".to_string(),
            map,
            player_count: 2,
            max_players: 28,
            bot_count: 0,
        })
    }
}

/// Records every signal so tests can check emission order.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    pub seen: Arc<Mutex<Vec<GameSignal>>>,
}

impl SignalHandler for RecordingHandler {
    fn handle_signal(&mut self, _server: &ServerId, signal: &GameSignal) {
        self.seen.lock().push(signal.clone());
    }
}

/// `[2024.05.04-20.00.SS:000][frame]`
pub fn stamp(sec: u32) -> String {
    format!("[2024.05.04-20.{:02}.{:02}:000][{sec}]", sec / 60, sec % 60)
}

pub fn map_load(sec: u32, map: &str) -> String {
    format!("{}LogLoad: LoadMap: /Game/Maps/{map}/{map}?Game=Checkpoint\n", stamp(sec))
}

pub fn kill(sec: u32, killer: (&str, &str, u8), victim: (&str, &str, u8), weapon: &str) -> String {
    format!(
        "{}LogGameplayEvents: Display: {}[{}, team {}] killed {}[{}, team {}] with BP_Firearm_{weapon}_C_2147480000\n",
        stamp(sec),
        killer.0,
        killer.1,
        killer.2,
        victim.0,
        victim.1,
        victim.2
    )
}

pub fn round_over(sec: u32, round: u32, winner: u8) -> String {
    format!(
        "{}LogGameplayEvents: Display: Round {round} Over: Team {winner} won (win reason: Elimination)\n",
        stamp(sec)
    )
}

pub fn game_over(sec: u32) -> String {
    format!("{}LogGameplayEvents: Display: Game over\n", stamp(sec))
}

pub fn write_log(dir: &Path, name: &str, lines: &[String]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, lines.concat()).unwrap();
    path
}

pub fn append_log(path: &Path, lines: &[String]) {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(lines.concat().as_bytes()).unwrap();
}
