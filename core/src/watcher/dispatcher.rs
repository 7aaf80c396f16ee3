//! Filesystem notification fan-out.
//!
//! One watcher covers the directories of every monitored log. Each change is
//! routed to the owning server's queue as a "re-check this file" token.
//! Tokens coalesce: while one is queued and unread, further changes are
//! dropped, since the worker always reads from its own offset.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::WatchError;
use crate::metrics::Metrics;
use crate::storage::ServerId;

const BACKOFF_START: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Rotated or backup copies that share a directory with the live log.
pub fn is_backup_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let name = name.to_ascii_lowercase();
    if name.contains("-backup-") && name.ends_with(".log") {
        return true;
    }
    match name.rsplit_once('.') {
        Some((_, "bak" | "old")) => true,
        Some((_, ext)) => ext.len() == 1 && matches!(ext.as_bytes()[0], b'1'..=b'9'),
        None => false,
    }
}

/// Doubling retry delay, capped.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            next: BACKOFF_START,
        }
    }
}

impl Backoff {
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(BACKOFF_MAX);
        delay
    }

    pub fn reset(&mut self) {
        self.next = BACKOFF_START;
    }
}

/// Sending half of one server's queue.
#[derive(Debug)]
pub struct ChangeNotifier {
    queued: AtomicBool,
    tx: mpsc::Sender<()>,
}

impl ChangeNotifier {
    pub fn new(tx: mpsc::Sender<()>) -> Self {
        Self {
            queued: AtomicBool::new(false),
            tx,
        }
    }

    /// Queue a re-check unless one is already waiting. Returns whether the
    /// worker is still listening.
    pub fn notify(&self) -> bool {
        if self.queued.swap(true, Ordering::AcqRel) {
            return !self.tx.is_closed();
        }
        match self.tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => true,
            Err(TrySendError::Closed(())) => false,
        }
    }

    /// Called by the worker when it takes a token, before reading.
    pub fn clear(&self) {
        self.queued.store(false, Ordering::Release);
    }
}

struct Route {
    server: ServerId,
    path: PathBuf,
    dir: PathBuf,
    file_name: OsString,
    notifier: Arc<ChangeNotifier>,
}

struct PendingWatch {
    dir: PathBuf,
    backoff: Backoff,
    retry_at: Instant,
}

pub struct Dispatcher {
    routes: Vec<Route>,
    metrics: Arc<Metrics>,
    poll_interval: Duration,
}

impl Dispatcher {
    pub fn new(metrics: Arc<Metrics>, poll_interval: Duration) -> Self {
        Self {
            routes: Vec::new(),
            metrics,
            poll_interval,
        }
    }

    pub fn add_route(&mut self, server: ServerId, path: &Path, notifier: Arc<ChangeNotifier>) {
        let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let dir = std::fs::canonicalize(&dir).unwrap_or(dir);
        let file_name = path.file_name().map(OsString::from).unwrap_or_default();
        self.routes.push(Route {
            server,
            path,
            dir,
            file_name,
            notifier,
        });
    }

    /// Route notifications until cancelled. Dropping the dispatcher on return
    /// closes every server queue.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), WatchError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Result<Event, notify::Error>>();
        let mut watcher = notify::recommended_watcher(move |result| {
            if tx.send(result).is_err() {
                tracing::trace!("Watch notification receiver dropped");
            }
        })?;

        let mut dirs: Vec<PathBuf> = self.routes.iter().map(|r| r.dir.clone()).collect();
        dirs.sort();
        dirs.dedup();
        let now = Instant::now();
        let mut pending: Vec<PendingWatch> = dirs
            .into_iter()
            .map(|dir| PendingWatch {
                dir,
                backoff: Backoff::default(),
                retry_at: now,
            })
            .collect();
        self.retry_watches(&mut watcher, &mut pending);

        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(result) = rx.recv() => match result {
                    Ok(event) => self.route_event(&event),
                    Err(e) => {
                        self.metrics.watch_error();
                        tracing::warn!(error = %e, "File watcher error");
                    }
                },
                _ = poll.tick() => {
                    self.retry_watches(&mut watcher, &mut pending);
                    self.notify_all();
                }
            }
        }
        tracing::debug!("Dispatcher stopped");
        Ok(())
    }

    fn retry_watches(&self, watcher: &mut RecommendedWatcher, pending: &mut Vec<PendingWatch>) {
        let now = Instant::now();
        pending.retain_mut(|entry| {
            if entry.retry_at > now {
                return true;
            }
            match watcher.watch(&entry.dir, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    tracing::info!(dir = %entry.dir.display(), "Watching log directory");
                    false
                }
                Err(e) => {
                    let delay = entry.backoff.next_delay();
                    entry.retry_at = now + delay;
                    self.metrics.watch_error();
                    tracing::warn!(dir = %entry.dir.display(), error = %e, retry_in = ?delay, "Cannot watch log directory");
                    true
                }
            }
        });
    }

    /// Periodic re-check for filesystems that drop notifications.
    fn notify_all(&self) {
        for route in &self.routes {
            route.notifier.notify();
        }
    }

    fn route_event(&self, event: &Event) {
        if !matches!(
            event.kind,
            EventKind::Modify(_) | EventKind::Create(_) | EventKind::Any
        ) {
            return;
        }
        for path in &event.paths {
            if is_backup_file(path) {
                continue;
            }
            for route in self.routes.iter().filter(|r| r.matches(path)) {
                if !route.notifier.notify() {
                    tracing::trace!(server = %route.server, "Worker queue closed");
                }
            }
        }
    }

    #[cfg(test)]
    fn route_paths(&self, paths: &[&Path]) {
        let mut event = Event::new(EventKind::Modify(notify::event::ModifyKind::Any));
        for path in paths {
            event = event.add_path(path.to_path_buf());
        }
        self.route_event(&event);
    }
}

impl Route {
    fn matches(&self, path: &Path) -> bool {
        if path == self.path {
            return true;
        }
        path.file_name() == Some(self.file_name.as_os_str())
            && path.parent().is_some_and(|parent| parent == self.dir.as_path())
    }
}
