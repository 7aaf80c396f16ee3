//! Wiring: one dispatcher plus one worker per enabled server.

use hashbrown::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use sitrep_types::AppConfig;

use crate::context::{CoreContext, ServerSession};
use crate::signal_processor::SignalHandler;
use crate::storage::ServerId;
use crate::watcher::{ChangeNotifier, Dispatcher, ServerWorker};

struct WorkerSlot {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Running engine. Dropping it without [`ServiceHandle::shutdown`] leaves
/// the tasks running until the runtime stops.
pub struct ServiceHandle {
    ctx: CoreContext,
    dispatcher: JoinHandle<()>,
    workers: HashMap<ServerId, WorkerSlot>,
}

pub struct StatsService;

impl StatsService {
    pub fn start(config: &AppConfig, ctx: CoreContext) -> ServiceHandle {
        Self::start_with(config, ctx, |_| Vec::new())
    }

    /// Start with extra signal handlers per server, registered after the
    /// default lifecycle logger.
    pub fn start_with<F>(config: &AppConfig, ctx: CoreContext, mut handlers: F) -> ServiceHandle
    where
        F: FnMut(&ServerId) -> Vec<Box<dyn SignalHandler + Send + Sync>>,
    {
        let mut dispatcher = Dispatcher::new(ctx.metrics.clone(), ctx.settings.poll_interval);
        let mut workers = HashMap::new();

        for server in config.enabled_servers() {
            let id = ServerId::new(&server.id);
            let (tx, rx) = mpsc::channel(ctx.settings.queue_capacity);
            let notifier = Arc::new(ChangeNotifier::new(tx));
            dispatcher.add_route(id.clone(), &server.log_path, notifier.clone());

            let mut session = ServerSession::new(id.clone(), &ctx);
            for handler in handlers(&id) {
                session.add_signal_handler(handler);
            }
            let cancel = ctx.shutdown.child_token();
            let worker = ServerWorker::new(
                session,
                &server.log_path,
                &ctx,
                rx,
                notifier.clone(),
                cancel.clone(),
            );
            let task = tokio::spawn(worker.run());
            // Initial read in case nothing changes for a while.
            notifier.notify();
            tracing::debug!(server = %id, name = %server.display_name(), "Server registered");
            workers.insert(id, WorkerSlot { cancel, task });
        }

        let cancel = ctx.shutdown.clone();
        let dispatcher = tokio::spawn(async move {
            if let Err(e) = dispatcher.run(cancel).await {
                tracing::error!(error = %e, "Dispatcher failed to start");
            }
        });

        tracing::info!(servers = workers.len(), "Stats service started");
        ServiceHandle {
            ctx,
            dispatcher,
            workers,
        }
    }
}

impl ServiceHandle {
    pub fn context(&self) -> &CoreContext {
        &self.ctx
    }

    pub fn servers(&self) -> impl Iterator<Item = &ServerId> {
        self.workers.keys()
    }

    /// Stop one server's worker and its pending refresh without touching the others.
    pub async fn disable_server(&mut self, server: &ServerId) -> bool {
        let Some(slot) = self.workers.remove(server) else {
            return false;
        };
        slot.cancel.cancel();
        self.ctx.refresher.cancel(server);
        if let Err(e) = slot.task.await {
            tracing::warn!(server = %server, error = %e, "Worker ended abnormally");
        }
        tracing::info!(server = %server, "Server disabled");
        true
    }

    /// Cancel everything and wait for the tasks to finish their current step.
    pub async fn shutdown(self) {
        self.ctx.shutdown.cancel();
        self.ctx.refresher.shutdown();
        for (server, slot) in self.workers {
            if let Err(e) = slot.task.await {
                tracing::warn!(server = %server, error = %e, "Worker ended abnormally");
            }
        }
        if let Err(e) = self.dispatcher.await {
            tracing::warn!(error = %e, "Dispatcher ended abnormally");
        }
        tracing::info!("Stats service stopped");
    }
}
