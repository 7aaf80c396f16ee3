//! Per-server worker: the single consumer of one server's queue.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::dispatcher::{Backoff, ChangeNotifier};
use super::tail::LogTail;
use crate::catchup::{CatchUpDecision, CatchUpReconciler};
use crate::context::{CoreContext, ServerSession};
use crate::error::{StoreError, WatchError};
use crate::metrics::Metrics;
use crate::storage::{ServerId, Store};

pub struct ServerWorker {
    server: ServerId,
    session: ServerSession,
    tail: LogTail,
    store: Arc<dyn Store>,
    reconciler: CatchUpReconciler,
    metrics: Arc<Metrics>,
    queue: mpsc::Receiver<()>,
    notifier: Arc<ChangeNotifier>,
    cancel: CancellationToken,
    retry: ReadRetry,
    pending_grace: Duration,
    /// When the session started holding events that wait for a map load.
    held_since: Option<Instant>,
}

impl ServerWorker {
    pub fn new(
        session: ServerSession,
        log_path: impl Into<PathBuf>,
        ctx: &CoreContext,
        queue: mpsc::Receiver<()>,
        notifier: Arc<ChangeNotifier>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            server: session.server().clone(),
            session,
            tail: LogTail::new(log_path),
            store: ctx.store.clone(),
            reconciler: CatchUpReconciler::new(
                ctx.store.clone(),
                ctx.remote.clone(),
                ctx.metrics.clone(),
                ctx.settings.status_timeout,
            ),
            metrics: ctx.metrics.clone(),
            queue,
            notifier,
            cancel,
            retry: ReadRetry::default(),
            pending_grace: ctx.settings.pending_grace.to_std().unwrap_or_default(),
            held_since: None,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(server = %self.server, path = %self.tail.path().display(), "Worker started");
        if let Err(e) = self.catch_up().await {
            tracing::warn!(server = %self.server, error = %e, "Catch-up failed, tailing from end");
            if let Err(e) = self.tail.seek_to_end().await {
                self.read_failed(&e);
            }
        }

        loop {
            self.release_expired().await;
            let release_at = self.held_since.map(|since| since + self.pending_grace);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                token = self.queue.recv() => match token {
                    Some(()) => {
                        self.notifier.clear();
                        self.drain().await;
                    }
                    None => break,
                },
                _ = tokio::time::sleep_until(release_at.unwrap_or_else(Instant::now)), if release_at.is_some() => {}
            }
        }
        // Lines already read are finished; nothing new is read after this.
        self.session.finish().await;
        tracing::info!(server = %self.server, offset = self.tail.offset(), "Worker stopped");
    }

    /// Held events are released once a map load has had `pending_grace` of
    /// wall-clock time to show up.
    async fn release_expired(&mut self) {
        if !self.session.has_pending() {
            self.held_since = None;
            return;
        }
        let since = *self.held_since.get_or_insert_with(Instant::now);
        if since + self.pending_grace <= Instant::now() {
            self.session.finish().await;
            self.held_since = None;
        }
    }

    async fn catch_up(&mut self) -> Result<(), StoreError> {
        self.store
            .get_or_create_server(&self.server, self.tail.path())
            .await?;
        let outcome = self
            .reconciler
            .reconcile(&self.server, self.tail.path())
            .await?;
        self.session.dispatch_signals(&outcome.signals);

        match outcome.decision {
            CatchUpDecision::Resume {
                record,
                from_offset,
            } => {
                self.session.resume(record).await?;
                if let Err(e) = self.tail.seek_to(from_offset).await {
                    self.read_failed(&e);
                    return Ok(());
                }
                self.session.set_live(false);
                self.drain().await;
                self.session.set_live(true);
                tracing::info!(server = %self.server, offset = self.tail.offset(), "Caught up");
            }
            CatchUpDecision::TailFromEnd { reason } => {
                tracing::info!(server = %self.server, reason = ?reason, "Tailing from end of log");
                if let Err(e) = self.tail.seek_to_end().await {
                    self.read_failed(&e);
                }
            }
        }
        Ok(())
    }

    /// Read and process everything available, line by line.
    async fn drain(&mut self) {
        if self.retry.waiting(Instant::now()) {
            return;
        }
        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            let read = match self.tail.read_new().await {
                Ok(read) => read,
                Err(e) => {
                    self.read_failed(&e);
                    return;
                }
            };
            if self.retry.recovered() {
                tracing::info!(server = %self.server, "Log readable again");
            }
            if read.truncated {
                self.session.reset_log();
            }
            self.metrics.add_malformed(read.oversized);
            for line in &read.lines {
                if self.cancel.is_cancelled() {
                    return;
                }
                self.session.process_line(line).await;
            }
            if !read.more {
                return;
            }
        }
    }

    fn read_failed(&mut self, error: &WatchError) {
        let (delay, first) = self.retry.failed(Instant::now());
        if first {
            self.metrics.watch_error();
            tracing::warn!(server = %self.server, error = %error, "Cannot read log, retrying with backoff");
        } else {
            tracing::debug!(server = %self.server, error = %error, retry_in = ?delay, "Log still unreadable");
        }
    }
}

/// Retry schedule while the log is unreadable. Wake-ups before `retry_at`
/// are skipped; a successful read starts the next streak from the first delay.
#[derive(Debug, Default)]
struct ReadRetry {
    backoff: Backoff,
    retry_at: Option<Instant>,
}

impl ReadRetry {
    fn waiting(&self, now: Instant) -> bool {
        self.retry_at.is_some_and(|at| now < at)
    }

    /// The delay before the next attempt, and whether this failure opens a streak.
    fn failed(&mut self, now: Instant) -> (Duration, bool) {
        let first = self.retry_at.is_none();
        let delay = self.backoff.next_delay();
        self.retry_at = Some(now + delay);
        (delay, first)
    }

    /// True when this read ends a failure streak.
    fn recovered(&mut self) -> bool {
        let was_failing = self.retry_at.take().is_some();
        if was_failing {
            self.backoff.reset();
        }
        was_failing
    }
}

/// Run a whole file through `session` and flush held events. Returns the
/// number of lines read.
pub async fn run_to_end(session: &mut ServerSession, path: &Path) -> Result<u64, WatchError> {
    let mut tail = LogTail::new(path);
    loop {
        let read = tail.read_new().await?;
        session.metrics().add_malformed(read.oversized);
        session.process_lines(&read.lines).await;
        if !read.more {
            break;
        }
    }
    session.finish().await;
    Ok(tail.line())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_waits_out_each_delay() {
        let mut retry = ReadRetry::default();
        let start = Instant::now();
        assert!(!retry.waiting(start));

        assert_eq!(retry.failed(start), (Duration::from_secs(1), true));
        assert!(retry.waiting(start + Duration::from_millis(500)));
        assert!(!retry.waiting(start + Duration::from_secs(1)));

        let again = start + Duration::from_secs(1);
        assert_eq!(retry.failed(again), (Duration::from_secs(2), false));
        assert!(retry.waiting(again + Duration::from_secs(1)));
    }

    #[test]
    fn test_recovery_restarts_backoff() {
        let mut retry = ReadRetry::default();
        let now = Instant::now();
        retry.failed(now);
        retry.failed(now);
        retry.failed(now);

        assert!(retry.recovered());
        assert!(!retry.recovered());
        assert!(!retry.waiting(now));
        // A new outage is a new streak and starts from the first delay.
        assert_eq!(retry.failed(now), (Duration::from_secs(1), true));
    }
}
