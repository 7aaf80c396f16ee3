//! Startup reconciliation between persisted matches and the live server.
//!
//! Decides where a worker starts reading: from the map load of a match that
//! is still being played (replayed, relying on kill dedup), or from the end
//! of the file. Never blocks startup on the remote side.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{RemoteError, StoreError};
use crate::game_log::{EventKind, EventOrigin, ParserContext, parse_line};
use crate::metrics::Metrics;
use crate::remote::RemoteControl;
use crate::signal_processor::{GameSignal, close_stale_match};
use crate::storage::{MatchRecord, ServerId, Store};
use crate::watcher::tail::read_line_at;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Status query failed or timed out.
    StatusUnavailable,
    /// No stored match ever ran on the live map.
    NoMatchOnMap,
    /// The latest match on the live map already ended.
    MatchEnded,
    /// The log no longer holds the line that opened the match.
    StartLineMissing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CatchUpDecision {
    TailFromEnd { reason: SkipReason },
    Resume { record: MatchRecord, from_offset: u64 },
}

#[derive(Debug)]
pub struct CatchUp {
    pub decision: CatchUpDecision,
    /// Lifecycle signals for matches closed during reconciliation.
    pub signals: Vec<GameSignal>,
}

pub struct CatchUpReconciler {
    store: Arc<dyn Store>,
    remote: Arc<dyn RemoteControl>,
    metrics: Arc<Metrics>,
    status_timeout: Duration,
}

impl CatchUpReconciler {
    pub fn new(
        store: Arc<dyn Store>,
        remote: Arc<dyn RemoteControl>,
        metrics: Arc<Metrics>,
        status_timeout: Duration,
    ) -> Self {
        Self {
            store,
            remote,
            metrics,
            status_timeout,
        }
    }

    pub async fn reconcile(&self, server: &ServerId, log_path: &Path) -> Result<CatchUp, StoreError> {
        let live_map = match self.live_map(server).await {
            Ok(map) => map,
            Err(e) => {
                self.metrics.remote_failed();
                tracing::warn!(server = %server, error = %e, "Status query failed, tailing from end");
                return Ok(CatchUp {
                    decision: CatchUpDecision::TailFromEnd {
                        reason: SkipReason::StatusUnavailable,
                    },
                    signals: Vec::new(),
                });
            }
        };

        let mut signals = Vec::new();
        let candidate = self.store.latest_match_on_map(server, &live_map).await?;

        let decision = match candidate {
            Some(record) if record.is_active() => {
                if opens_match(log_path, &record).await {
                    tracing::info!(
                        server = %server,
                        match_id = %record.id,
                        map = %live_map,
                        offset = record.start_offset,
                        "Resuming open match"
                    );
                    let from_offset = record.start_offset;
                    CatchUpDecision::Resume {
                        record,
                        from_offset,
                    }
                } else {
                    tracing::warn!(server = %server, match_id = %record.id, "Match start no longer in log, closing it");
                    signals.extend(close_stale_match(self.store.as_ref(), &record).await?);
                    CatchUpDecision::TailFromEnd {
                        reason: SkipReason::StartLineMissing,
                    }
                }
            }
            Some(_) => CatchUpDecision::TailFromEnd {
                reason: SkipReason::MatchEnded,
            },
            None => CatchUpDecision::TailFromEnd {
                reason: SkipReason::NoMatchOnMap,
            },
        };

        // Whatever is still open on another map is over.
        if let CatchUpDecision::TailFromEnd { reason } = &decision
            && let Some(stale) = self.store.active_match(server).await?
        {
            tracing::info!(server = %server, match_id = %stale.id, reason = ?reason, "Closing stale match");
            signals.extend(close_stale_match(self.store.as_ref(), &stale).await?);
        }

        Ok(CatchUp { decision, signals })
    }

    async fn live_map(&self, server: &ServerId) -> Result<String, RemoteError> {
        self.metrics.remote_query();
        match tokio::time::timeout(self.status_timeout, self.remote.query_status(server)).await {
            Ok(status) => Ok(status?.map),
            Err(_) => Err(RemoteError::Timeout {
                operation: "status query",
                after: self.status_timeout,
            }),
        }
    }
}

/// Whether the line at the match's start offset is still its map load.
async fn opens_match(log_path: &Path, record: &MatchRecord) -> bool {
    let line = match read_line_at(log_path, record.start_offset).await {
        Ok(Some(line)) => line,
        Ok(None) => return false,
        Err(e) => {
            tracing::debug!(error = %e, "Could not read match start line");
            return false;
        }
    };
    let mut ctx = ParserContext::new(record.server.clone());
    let origin = EventOrigin {
        line: 0,
        offset: record.start_offset,
    };
    parse_line(origin, &line, &mut ctx).iter().any(|event| {
        event.timestamp == record.start_time
            && matches!(&event.kind, EventKind::MapLoad { map, .. } if map.eq_ignore_ascii_case(&record.map))
    })
}
