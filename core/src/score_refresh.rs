//! Debounced score refresh.
//!
//! Bursts of kills and round events collapse into at most one `listplayers`
//! query per server per window. A pending timer is never pushed back by
//! later triggers, so the first trigger bounds the latency; explicit delays
//! may pull it forward, never past `max_wait` after the first trigger.

use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::RemoteError;
use crate::metrics::Metrics;
use crate::remote::{PlayerInfo, RemoteControl};
use crate::storage::ServerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSettings {
    pub window: Duration,
    pub max_wait: Duration,
    /// Bound on each remote query.
    pub timeout: Duration,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(10),
            max_wait: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreSnapshot {
    pub players: Vec<PlayerInfo>,
    pub refreshed_at: chrono::DateTime<chrono::Utc>,
}

/// Latest player list per server, readable by observers.
#[derive(Debug, Default)]
pub struct ScoreBoard {
    entries: RwLock<HashMap<ServerId, ScoreSnapshot>>,
}

impl ScoreBoard {
    pub fn get(&self, server: &ServerId) -> Option<ScoreSnapshot> {
        self.entries.read().get(server).cloned()
    }

    fn store(&self, server: &ServerId, players: Vec<PlayerInfo>) {
        self.entries.write().insert(
            server.clone(),
            ScoreSnapshot {
                players,
                refreshed_at: chrono::Utc::now(),
            },
        );
    }
}

struct Pending {
    first_trigger: Instant,
    deadline: Instant,
    generation: u64,
    task: JoinHandle<()>,
}

/// A query that has been issued and not yet answered.
struct InFlight {
    generation: u64,
    abort: AbortHandle,
}

#[derive(Default)]
struct Slots {
    pending: HashMap<ServerId, Pending>,
    in_flight: HashMap<ServerId, InFlight>,
}

impl Slots {
    /// Abort the timer and any running query for `server`.
    fn clear(&mut self, server: &ServerId) {
        if let Some(existing) = self.pending.remove(server) {
            existing.task.abort();
        }
        if let Some(running) = self.in_flight.remove(server) {
            running.abort.abort();
        }
    }

    fn finished(&mut self, server: &ServerId, generation: u64) {
        if self
            .in_flight
            .get(server)
            .is_some_and(|running| running.generation == generation)
        {
            self.in_flight.remove(server);
        }
    }
}

struct Inner {
    remote: Arc<dyn RemoteControl>,
    board: Arc<ScoreBoard>,
    metrics: Arc<Metrics>,
    settings: RefreshSettings,
    slots: Mutex<Slots>,
    generation: AtomicU64,
    cancel: CancellationToken,
}

/// Cheap to clone; all clones share the timer map.
#[derive(Clone)]
pub struct ScoreRefresher {
    inner: Arc<Inner>,
}

impl ScoreRefresher {
    pub fn new(
        remote: Arc<dyn RemoteControl>,
        board: Arc<ScoreBoard>,
        metrics: Arc<Metrics>,
        settings: RefreshSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                remote,
                board,
                metrics,
                settings,
                slots: Mutex::new(Slots::default()),
                generation: AtomicU64::new(0),
                cancel,
            }),
        }
    }

    pub fn board(&self) -> &Arc<ScoreBoard> {
        &self.inner.board
    }

    pub fn is_pending(&self, server: &ServerId) -> bool {
        self.inner.slots.lock().pending.contains_key(server)
    }

    /// True while a query for `server` has been sent and not answered.
    pub fn is_in_flight(&self, server: &ServerId) -> bool {
        self.inner.slots.lock().in_flight.contains_key(server)
    }

    /// Schedule a refresh after the default window unless one is already pending.
    pub fn trigger(&self, server: &ServerId) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        let mut slots = self.inner.slots.lock();
        if slots.pending.contains_key(server) {
            return;
        }
        let now = Instant::now();
        let deadline = now + self.inner.settings.window.min(self.inner.settings.max_wait);
        self.schedule(&mut slots, server, now, deadline);
    }

    /// Schedule a refresh after `delay`. Only moves a pending timer earlier.
    pub fn trigger_fixed(&self, server: &ServerId, delay: Duration) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        let mut slots = self.inner.slots.lock();
        let now = Instant::now();
        let wanted = now + delay;

        let first_trigger = match slots.pending.get(server) {
            Some(existing) if existing.deadline <= wanted => return,
            Some(existing) => {
                existing.task.abort();
                existing.first_trigger
            }
            None => now,
        };
        let deadline = wanted.min(first_trigger + self.inner.settings.max_wait);
        self.schedule(&mut slots, server, first_trigger, deadline);
    }

    /// Cancel any pending timer or running query and query now. The
    /// replaced query never reaches the score board.
    pub async fn execute_immediately(
        &self,
        server: &ServerId,
    ) -> Result<Vec<PlayerInfo>, RemoteError> {
        if self.inner.cancel.is_cancelled() {
            return Err(RemoteError::Cancelled);
        }
        let query = {
            // Held across the spawn so the query cannot finish before it is registered.
            let mut slots = self.inner.slots.lock();
            slots.clear(server);
            let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
            let inner = Arc::clone(&self.inner);
            let key = server.clone();
            let query = tokio::spawn(async move {
                let result = inner.refresh(&key).await;
                inner.slots.lock().finished(&key, generation);
                result
            });
            slots.in_flight.insert(
                server.clone(),
                InFlight {
                    generation,
                    abort: query.abort_handle(),
                },
            );
            query
        };

        match query.await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Cancelled),
        }
    }

    /// Drop a server's pending timer and running query, e.g. when it is disabled.
    pub fn cancel(&self, server: &ServerId) {
        self.inner.slots.lock().clear(server);
    }

    /// Stop every timer and query. Later triggers are ignored.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        let mut slots = self.inner.slots.lock();
        for (_, existing) in slots.pending.drain() {
            existing.task.abort();
        }
        for (_, running) in slots.in_flight.drain() {
            running.abort.abort();
        }
    }

    fn schedule(
        &self,
        slots: &mut Slots,
        server: &ServerId,
        first_trigger: Instant,
        deadline: Instant,
    ) {
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let key = server.clone();

        let task = tokio::spawn(async move {
            tokio::select! {
                _ = inner.cancel.cancelled() => return,
                _ = tokio::time::sleep_until(deadline) => {}
            }
            {
                let mut slots = inner.slots.lock();
                let current = slots
                    .pending
                    .get(&key)
                    .is_some_and(|p| p.generation == generation);
                // Superseded or cancelled while we were waking up.
                if !current {
                    return;
                }
                let Some(fired) = slots.pending.remove(&key) else {
                    return;
                };
                let running = InFlight {
                    generation,
                    abort: fired.task.abort_handle(),
                };
                if let Some(older) = slots.in_flight.insert(key.clone(), running) {
                    older.abort.abort();
                }
            }
            let _ = inner.refresh(&key).await;
            inner.slots.lock().finished(&key, generation);
        });

        tracing::trace!(server = %server, delay = ?deadline.saturating_duration_since(Instant::now()), "Score refresh scheduled");
        slots.pending.insert(
            server.clone(),
            Pending {
                first_trigger,
                deadline,
                generation,
                task,
            },
        );
    }
}

impl Inner {
    async fn refresh(&self, server: &ServerId) -> Result<Vec<PlayerInfo>, RemoteError> {
        if self.cancel.is_cancelled() {
            return Err(RemoteError::Cancelled);
        }
        self.metrics.remote_query();
        let result = tokio::select! {
            _ = self.cancel.cancelled() => Err(RemoteError::Cancelled),
            result = tokio::time::timeout(self.settings.timeout, self.remote.list_players(server)) => {
                result.unwrap_or(Err(RemoteError::Timeout {
                    operation: "list players",
                    after: self.settings.timeout,
                }))
            }
        };

        match &result {
            Ok(players) => {
                tracing::debug!(server = %server, players = players.len(), "Scores refreshed");
                self.board.store(server, players.clone());
            }
            Err(RemoteError::Cancelled) => {}
            Err(e) => {
                self.metrics.remote_failed();
                tracing::warn!(server = %server, error = %e, "Score refresh failed");
            }
        }
        result
    }
}
