use std::sync::Arc;
use std::time::Duration;

use crate::context::CoreContext;
use crate::error::StoreError;
use crate::game_log::{EventKind, GameEvent, ParserContext, parse_line};
use crate::metrics::Metrics;
use crate::score_refresh::ScoreRefresher;
use crate::signal_processor::{
    GameSignal, LifecycleLogger, MatchTracker, ReadyEvent, SignalHandler, Stage, route,
};
use crate::stats::StatsAggregator;
use crate::storage::{MatchRecord, ServerId};
use crate::watcher::tail::TailLine;

/// Everything one server's worker needs to turn log lines into state.
///
/// Owned by exactly one worker; events are applied strictly in the order
/// they are fed in.
pub struct ServerSession {
    server: ServerId,
    parser: ParserContext,
    tracker: MatchTracker,
    aggregator: StatsAggregator,
    refresher: Option<ScoreRefresher>,
    objective_refresh: Duration,
    metrics: Arc<Metrics>,
    /// Score refreshes are suppressed while replaying already-seen lines.
    live: bool,
    signal_handlers: Vec<Box<dyn SignalHandler + Send + Sync>>,
}

impl ServerSession {
    pub fn new(server: ServerId, ctx: &CoreContext) -> Self {
        let mut session = Self::offline(server, ctx);
        session.refresher = Some(ctx.refresher.clone());
        session
    }

    /// A session that never queries the remote side.
    pub fn offline(server: ServerId, ctx: &CoreContext) -> Self {
        let mut session = Self {
            parser: ParserContext::new(server.clone()),
            tracker: MatchTracker::new(
                server.clone(),
                ctx.store.clone(),
                ctx.boundary.clone(),
                ctx.settings.pending_grace,
            ),
            aggregator: StatsAggregator::new(ctx.store.clone(), ctx.metrics.clone()),
            refresher: None,
            objective_refresh: ctx.settings.objective_refresh,
            metrics: ctx.metrics.clone(),
            live: true,
            signal_handlers: Vec::new(),
            server,
        };
        session.add_signal_handler(Box::new(LifecycleLogger));
        session
    }

    /// Handlers run after the built-in logger, in registration order.
    pub fn add_signal_handler(&mut self, handler: Box<dyn SignalHandler + Send + Sync>) {
        self.signal_handlers.push(handler);
    }

    pub fn server(&self) -> &ServerId {
        &self.server
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn tracker(&self) -> &MatchTracker {
        &self.tracker
    }

    pub fn set_live(&mut self, live: bool) {
        self.live = live;
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Continue a match left open by an earlier run.
    pub async fn resume(&mut self, record: MatchRecord) -> Result<(), StoreError> {
        let signals = self.tracker.resume(record).await?;
        self.dispatch_signals(&signals);
        Ok(())
    }

    /// The log started over: forget login continuations and connected players.
    pub fn reset_log(&mut self) {
        self.parser = ParserContext::new(self.server.clone());
        self.tracker.reset_roster();
    }

    pub async fn process_lines(&mut self, lines: &[TailLine]) {
        for line in lines {
            self.process_line(line).await;
        }
    }

    pub async fn process_line(&mut self, line: &TailLine) {
        let events = parse_line(line.origin, &line.text, &mut self.parser);
        self.metrics.add_lines(1, events.len() as u64);
        self.metrics.add_parse_outcome(self.parser.take_outcome());
        for event in events {
            self.process_event(event).await;
        }
    }

    /// Run one event through the stages its kind routes to, in order.
    pub async fn process_event(&mut self, event: GameEvent) {
        let stages = route(&event.kind);
        let mut ready: Vec<ReadyEvent> = Vec::new();
        let mut pending = Some(event);

        for stage in stages {
            match stage {
                Stage::Track => {
                    let Some(event) = pending.take() else { continue };
                    match self.tracker.advance(event).await {
                        Ok(output) => {
                            self.dispatch_signals(&output.signals);
                            ready = output.ready;
                        }
                        Err(e) => {
                            self.metrics.aggregation_failed();
                            tracing::warn!(server = %self.server, error = %e, "Match tracking failed");
                        }
                    }
                }
                Stage::Aggregate => {
                    for event in &ready {
                        self.aggregator.record(event).await;
                    }
                }
                Stage::RefreshDebounced => {
                    if let Some(refresher) = self.live_refresher() {
                        refresher.trigger(&self.server);
                    }
                }
                Stage::RefreshObjective => {
                    if let Some(refresher) = self.live_refresher() {
                        refresher.trigger_fixed(&self.server, self.objective_refresh);
                    }
                }
                Stage::RefreshNow => {
                    if let Some(refresher) = self.live_refresher() {
                        // Failures are logged and counted by the refresher.
                        let _ = refresher.execute_immediately(&self.server).await;
                    }
                }
                Stage::Announce => {
                    if let Some(event) = &pending {
                        self.announce(event);
                    }
                }
            }
        }
    }

    /// Events seen before any map load that are still waiting for one.
    pub fn has_pending(&self) -> bool {
        self.tracker.has_pending()
    }

    /// Record held events without a match. Used at end of input, once the
    /// grace window has passed on the wall clock, and when the worker stops.
    pub async fn finish(&mut self) {
        let held = self.tracker.flush_pending();
        if held.is_empty() {
            return;
        }
        tracing::debug!(server = %self.server, events = held.len(), "Releasing events without a match");
        for ready in held {
            self.aggregator.record(&ready).await;
        }
    }

    fn live_refresher(&self) -> Option<&ScoreRefresher> {
        self.refresher.as_ref().filter(|_| self.live)
    }

    fn announce(&self, event: &GameEvent) {
        let EventKind::ChatCommand {
            name,
            player_id,
            command,
            args,
        } = &event.kind
        else {
            return;
        };
        match command.as_str() {
            "stats" | "kdr" => {
                tracing::info!(
                    server = %self.server,
                    player = %name,
                    player_id = ?player_id.as_ref().map(|id| id.as_str()),
                    command = %command,
                    "Stats requested"
                );
            }
            _ => {
                tracing::debug!(server = %self.server, player = %name, command = %command, args = ?args, "Chat command ignored");
            }
        }
    }

    pub fn dispatch_signals(&mut self, signals: &[GameSignal]) {
        if signals.is_empty() {
            return;
        }
        for handler in &mut self.signal_handlers {
            handler.handle_signals(&self.server, signals);
        }
    }
}
