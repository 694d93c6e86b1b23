//! Supervision of the live worker set.
//!
//! The supervisor is the only writer of the worker table. Administrative
//! events arrive on a channel and are handled one at a time under the writer
//! lock, so no two events for the same consumer id can interleave.

use std::{collections::HashMap, fmt, sync::Arc};

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use conveyor_core::{storage::Storage, ConsumerSpec};

use crate::{
    error::BrokerError,
    topology,
    worker::{ConsumerWorker, WorkerContext, WorkerHandle},
};

/// What happened to a consumer definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerEventKind {
    /// A definition was created.
    Added,
    /// A definition was changed (including status flips).
    Updated,
    /// A definition was removed; its broker queues go with it.
    Deleted,
    /// An explicit stop-and-start was requested.
    Restarted,
}

impl fmt::Display for ConsumerEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added => write!(f, "added"),
            Self::Updated => write!(f, "updated"),
            Self::Deleted => write!(f, "deleted"),
            Self::Restarted => write!(f, "restarted"),
        }
    }
}

/// One reconciliation request, carrying the definition it applies to.
#[derive(Debug, Clone)]
pub struct ConsumerEvent {
    /// What happened.
    pub kind: ConsumerEventKind,
    /// The definition after the change (for `Deleted`, the last stored one).
    pub spec: ConsumerSpec,
}

/// Reconciles stored consumer definitions with live workers.
pub struct Supervisor {
    storage: Storage,
    ctx: Arc<WorkerContext>,
    workers: RwLock<HashMap<String, Vec<WorkerHandle>>>,
    cancel: CancellationToken,
}

impl Supervisor {
    /// Creates a supervisor owning an empty worker table.
    ///
    /// Worker cancellation tokens are children of `cancel`, so cancelling it
    /// tears down every worker regardless of what the event loop is doing.
    pub fn new(storage: Storage, ctx: Arc<WorkerContext>, cancel: CancellationToken) -> Self {
        Self { storage, ctx, workers: RwLock::new(HashMap::new()), cancel }
    }

    /// Runs the event loop until cancellation or the channel closes.
    ///
    /// On entry, every stored definition with `running` status is replayed as
    /// a synthetic `added` event.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<ConsumerEvent>) {
        self.reconcile_stored().await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
            }
        }

        self.stop_all().await;
        info!("supervisor stopped");
    }

    /// Replays stored `running` definitions as `added` events.
    async fn reconcile_stored(&self) {
        let specs = match self.storage.consumers.list().await {
            Ok(specs) => specs,
            Err(error) => {
                error!(error = %error, "failed to load stored consumers");
                return;
            },
        };

        for spec in specs {
            if !spec.status.is_running() {
                info!(
                    consumer_id = %spec.id,
                    queue_name = %spec.queue_name,
                    status = %spec.status,
                    "consumer not started due to status"
                );
                continue;
            }
            self.handle_event(ConsumerEvent { kind: ConsumerEventKind::Added, spec }).await;
        }
    }

    /// Applies one event to the worker table.
    ///
    /// Serialised by the table's writer lock. `added`/`updated` stop any
    /// existing workers first and start fresh ones only when the definition
    /// is `running`; `restarted` recreates the workers unconditionally.
    pub async fn handle_event(&self, event: ConsumerEvent) {
        let mut workers = self.workers.write().await;

        info!(
            kind = %event.kind,
            consumer_id = %event.spec.id,
            queue_name = %event.spec.queue_name,
            status = %event.spec.status,
            "handling consumer event"
        );

        match event.kind {
            ConsumerEventKind::Added | ConsumerEventKind::Updated => {
                Self::stop_entry(workers.remove(&event.spec.id)).await;
                if event.spec.status.is_running() {
                    self.start_workers(&mut workers, event.spec).await;
                }
            },
            ConsumerEventKind::Restarted => {
                // A restart recreates the workers from the same definition,
                // regardless of the stored status.
                Self::stop_entry(workers.remove(&event.spec.id)).await;
                self.start_workers(&mut workers, event.spec).await;
            },
            ConsumerEventKind::Deleted => {
                let existing = workers.remove(&event.spec.id);
                if existing.is_some() {
                    if let Err(error) =
                        topology::delete_consumer_queues(&self.ctx.settings, &event.spec).await
                    {
                        error!(
                            consumer_id = %event.spec.id,
                            error = %error,
                            "queue deletion failed"
                        );
                    }
                }
                Self::stop_entry(existing).await;
            },
        }
    }

    /// Starts `queue_count` workers for the definition and records the ones
    /// that made it.
    async fn start_workers(
        &self,
        workers: &mut HashMap<String, Vec<WorkerHandle>>,
        spec: ConsumerSpec,
    ) {
        if let Err(error) = spec.validate() {
            error!(consumer_id = %spec.id, error = %error, "refusing to start invalid consumer");
            return;
        }

        let count = spec.effective_queue_count();
        let mut handles = Vec::with_capacity(count as usize);

        for worker_no in 0..count {
            let cancel = self.cancel.child_token();
            match ConsumerWorker::start(spec.clone(), self.ctx.clone(), cancel, worker_no).await {
                Ok(handle) => handles.push(handle),
                Err(BrokerError::Cancelled) => {
                    warn!(consumer_id = %spec.id, "worker start interrupted by shutdown");
                    break;
                },
                Err(error) => {
                    error!(
                        consumer_id = %spec.id,
                        worker_no,
                        error = %error,
                        "failed to start worker"
                    );
                },
            }
        }

        if handles.is_empty() {
            warn!(consumer_id = %spec.id, "no workers started for consumer");
        } else {
            info!(consumer_id = %spec.id, workers = handles.len(), "consumer workers started");
            workers.insert(spec.id.clone(), handles);
        }
    }

    async fn stop_entry(entry: Option<Vec<WorkerHandle>>) {
        if let Some(handles) = entry {
            for handle in handles {
                handle.stop().await;
            }
        }
    }

    /// Stops every live worker; used on shutdown.
    pub async fn stop_all(&self) {
        let mut workers = self.workers.write().await;
        for (_, handles) in workers.drain() {
            for handle in handles {
                handle.stop().await;
            }
        }
    }

    /// Number of live workers for a consumer id.
    pub async fn worker_count(&self, id: &str) -> usize {
        self.workers.read().await.get(id).map_or(0, Vec::len)
    }
}
