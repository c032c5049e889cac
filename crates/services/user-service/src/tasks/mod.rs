//! Deferred tasks.
//!
//! Handlers register follow-up work on a [`BackgroundTasks`] collector. The
//! collected tasks are queued on the [`TaskRuntime`] worker only once a
//! successful response has been fully sent.

mod deferred;
mod worker;

use std::sync::Arc;

use crate::jobs::Mailer;

pub use deferred::{BackgroundTasks, DeferredTask, PendingTasks, TaskBatch};
pub use worker::{TaskCounts, TaskQueue, TaskRuntime};

/// Process-wide dependencies handed to every task.
#[derive(Clone)]
pub struct TaskContext {
    mailer: Arc<dyn Mailer>,
}

impl TaskContext {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }

    pub fn mailer(&self) -> &dyn Mailer {
        self.mailer.as_ref()
    }
}
