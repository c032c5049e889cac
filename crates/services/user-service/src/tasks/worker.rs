//! Task worker.
//!
//! A single dispatcher receives batches from request handlers and runs each
//! batch on its own tokio task, at most `concurrency` batches at a time.
//! Tasks inside a batch run one after another in registration order.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};

use common::config::TaskQueueConfig;
use common::{AppError, AppResult};

use super::{TaskBatch, TaskContext};

#[derive(Debug, Default)]
struct TaskStats {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time copy of the task counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    /// Tasks not queued because the queue was full or the worker had stopped
    pub dropped: u64,
}

impl TaskCounts {
    pub fn pending(&self) -> u64 {
        self.submitted
            .saturating_sub(self.completed.saturating_add(self.failed))
    }
}

/// Submission handle shared by all requests.
#[derive(Clone)]
pub struct TaskQueue {
    sender: mpsc::Sender<TaskBatch>,
    stats: Arc<TaskStats>,
}

impl TaskQueue {
    /// Queue a batch without waiting.
    ///
    /// A full queue or a stopped worker drops the batch and counts its tasks
    /// as dropped. Returns whether the batch was queued.
    pub fn submit(&self, batch: TaskBatch) -> bool {
        if batch.is_empty() {
            return true;
        }

        let size = batch.len() as u64;
        match self.sender.try_send(batch) {
            Ok(()) => {
                self.stats.submitted.fetch_add(size, Ordering::SeqCst);
                tracing::debug!(tasks = size, "Deferred tasks queued");
                true
            }
            Err(TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(size, Ordering::SeqCst);
                tracing::error!(tasks = size, "Task queue full; deferred tasks dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.stats.dropped.fetch_add(size, Ordering::SeqCst);
                tracing::error!(tasks = size, "Task worker stopped; deferred tasks dropped");
                false
            }
        }
    }

    pub fn counts(&self) -> TaskCounts {
        TaskCounts {
            submitted: self.stats.submitted.load(Ordering::SeqCst),
            completed: self.stats.completed.load(Ordering::SeqCst),
            failed: self.stats.failed.load(Ordering::SeqCst),
            dropped: self.stats.dropped.load(Ordering::SeqCst),
        }
    }
}

/// Running worker plus the means to stop it.
pub struct TaskRuntime {
    queue: TaskQueue,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl TaskRuntime {
    pub fn start(config: &TaskQueueConfig, context: TaskContext) -> Self {
        let (sender, receiver) = mpsc::channel(config.capacity.max(1));
        let (shutdown, shutdown_rx) = oneshot::channel();
        let stats = Arc::new(TaskStats::default());

        let worker = Worker {
            receiver,
            context,
            stats: stats.clone(),
            permits: Arc::new(Semaphore::new(config.concurrency.max(1))),
        };
        let handle = tokio::spawn(worker.run(shutdown_rx));

        tracing::info!(
            capacity = config.capacity,
            concurrency = config.concurrency,
            "Task worker started"
        );

        Self {
            queue: TaskQueue { sender, stats },
            shutdown,
            handle,
        }
    }

    pub fn queue(&self) -> TaskQueue {
        self.queue.clone()
    }

    /// Stop accepting batches, finish everything already queued, then return.
    pub async fn shutdown(self) -> AppResult<()> {
        // The worker also stops if this end is dropped, so a failed send is fine
        let _ = self.shutdown.send(());

        self.handle
            .await
            .map_err(|err| AppError::internal(format!("task worker failed: {}", err)))?;

        let counts = self.queue.counts();
        tracing::info!(
            completed = counts.completed,
            failed = counts.failed,
            dropped = counts.dropped,
            "Task worker stopped"
        );
        Ok(())
    }
}

struct Worker {
    receiver: mpsc::Receiver<TaskBatch>,
    context: TaskContext,
    stats: Arc<TaskStats>,
    permits: Arc<Semaphore>,
}

impl Worker {
    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        let mut running = JoinSet::new();

        loop {
            tokio::select! {
                batch = self.receiver.recv() => match batch {
                    Some(batch) => self.dispatch(&mut running, batch).await,
                    None => break,
                },
                _ = &mut shutdown => {
                    self.receiver.close();
                    while let Some(batch) = self.receiver.recv().await {
                        self.dispatch(&mut running, batch).await;
                    }
                    break;
                }
                Some(joined) = running.join_next(), if !running.is_empty() => reap(joined),
            }
        }

        while let Some(joined) = running.join_next().await {
            reap(joined);
        }
    }

    async fn dispatch(&self, running: &mut JoinSet<()>, batch: TaskBatch) {
        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                tracing::error!(tasks = batch.len(), "Task permits closed; batch dropped");
                return;
            }
        };

        let context = self.context.clone();
        let stats = self.stats.clone();
        running.spawn(async move {
            run_batch(batch, context, &stats).await;
            drop(permit);
        });
    }
}

async fn run_batch(batch: TaskBatch, context: TaskContext, stats: &TaskStats) {
    for task in batch {
        let name = task.name();
        match AssertUnwindSafe(task.run(context.clone())).catch_unwind().await {
            Ok(Ok(())) => {
                stats.completed.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(task = name, "Deferred task completed");
            }
            Ok(Err(err)) => {
                stats.failed.fetch_add(1, Ordering::SeqCst);
                tracing::error!(task = name, error = %err, "Deferred task failed");
            }
            Err(_) => {
                stats.failed.fetch_add(1, Ordering::SeqCst);
                tracing::error!(task = name, "Deferred task panicked");
            }
        }
    }
}

fn reap(joined: Result<(), JoinError>) {
    if let Err(err) = joined {
        tracing::error!(error = %err, "Task batch aborted");
    }
}
