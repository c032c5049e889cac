//! Task descriptors and the per-request collector.

use std::fmt;
use std::future::Future;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use futures::future::BoxFuture;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::mpsc;

use common::{AppError, AppResult};

use super::TaskContext;

type Invoke = Box<dyn FnOnce(TaskContext, serde_json::Value) -> BoxFuture<'static, AppResult<()>> + Send>;

/// A task function plus its arguments, ready to run later.
///
/// Arguments are stored in serialized form, so the task cannot hold on to
/// anything borrowed from the request that created it. In particular a
/// task never sees the request's database session.
pub struct DeferredTask {
    name: &'static str,
    payload: serde_json::Value,
    invoke: Invoke,
}

impl DeferredTask {
    pub fn new<A, Fut>(task: fn(TaskContext, A) -> Fut, args: A) -> AppResult<Self>
    where
        A: Serialize + DeserializeOwned + Send + 'static,
        Fut: Future<Output = AppResult<()>> + Send + 'static,
    {
        let payload = serde_json::to_value(&args)
            .map_err(|err| AppError::internal(format!("task arguments not serializable: {}", err)))?;

        let invoke: Invoke = Box::new(
            move |ctx: TaskContext, payload: serde_json::Value| -> BoxFuture<'static, AppResult<()>> {
                Box::pin(async move {
                    let args: A = serde_json::from_value(payload).map_err(|err| {
                        AppError::internal(format!("task arguments not deserializable: {}", err))
                    })?;
                    task(ctx, args).await
                })
            },
        );

        Ok(Self {
            name: short_type_name::<A>(),
            payload,
            invoke,
        })
    }

    /// Name of the argument type, used in logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub async fn run(self, ctx: TaskContext) -> AppResult<()> {
        (self.invoke)(ctx, self.payload).await
    }
}

impl fmt::Debug for DeferredTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredTask")
            .field("name", &self.name)
            .field("payload", &self.payload)
            .finish()
    }
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

/// Tasks collected from one request, in registration order.
#[derive(Debug, Default)]
pub struct TaskBatch {
    tasks: Vec<DeferredTask>,
}

impl TaskBatch {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl From<Vec<DeferredTask>> for TaskBatch {
    fn from(tasks: Vec<DeferredTask>) -> Self {
        Self { tasks }
    }
}

impl IntoIterator for TaskBatch {
    type Item = DeferredTask;
    type IntoIter = std::vec::IntoIter<DeferredTask>;

    fn into_iter(self) -> Self::IntoIter {
        self.tasks.into_iter()
    }
}

/// Handler-side collector for deferred tasks.
///
/// Extracted from the request; available on every route wrapped in the
/// deferred-task middleware.
#[derive(Clone)]
pub struct BackgroundTasks {
    sender: mpsc::UnboundedSender<DeferredTask>,
}

impl BackgroundTasks {
    /// A fresh collector and the receiving end the middleware drains.
    pub fn channel() -> (Self, PendingTasks) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, PendingTasks { receiver })
    }

    /// Schedule `task(ctx, args)` to run after the response.
    pub fn add<A, Fut>(&self, task: fn(TaskContext, A) -> Fut, args: A) -> AppResult<()>
    where
        A: Serialize + DeserializeOwned + Send + 'static,
        Fut: Future<Output = AppResult<()>> + Send + 'static,
    {
        let deferred = DeferredTask::new(task, args)?;
        tracing::debug!(task = deferred.name(), "Deferred task registered");

        self.sender
            .send(deferred)
            .map_err(|_| AppError::internal("deferred tasks already collected for this request"))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for BackgroundTasks
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<BackgroundTasks>()
            .cloned()
            .ok_or_else(|| AppError::internal("deferred task middleware not installed"))
    }
}

/// Receiving end of a request's [`BackgroundTasks`].
pub struct PendingTasks {
    receiver: mpsc::UnboundedReceiver<DeferredTask>,
}

impl PendingTasks {
    /// Everything registered so far, in order. Later registrations fail.
    pub fn drain(mut self) -> TaskBatch {
        self.receiver.close();

        let mut tasks = Vec::new();
        while let Ok(task) = self.receiver.try_recv() {
            tasks.push(task);
        }
        TaskBatch::from(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::MockMailer;
    use serde::Deserialize;
    use std::sync::Arc;

    #[derive(Debug, Serialize, Deserialize)]
    struct Greeting {
        to: String,
    }

    async fn greet(_ctx: TaskContext, greeting: Greeting) -> AppResult<()> {
        if greeting.to.is_empty() {
            return Err(AppError::validation("nobody to greet"));
        }
        Ok(())
    }

    fn context() -> TaskContext {
        TaskContext::new(Arc::new(MockMailer::new()))
    }

    #[tokio::test]
    async fn arguments_are_captured_by_value() {
        let task = DeferredTask::new(greet, Greeting { to: "Alice".into() }).unwrap();

        assert_eq!(task.name(), "Greeting");
        assert_eq!(task.payload(), &serde_json::json!({ "to": "Alice" }));
        task.run(context()).await.unwrap();
    }

    #[tokio::test]
    async fn task_errors_surface_from_run() {
        let task = DeferredTask::new(greet, Greeting { to: String::new() }).unwrap();
        assert!(task.run(context()).await.is_err());
    }

    #[test]
    fn drain_keeps_registration_order_and_closes_the_collector() {
        let (tasks, pending) = BackgroundTasks::channel();
        tasks.add(greet, Greeting { to: "first".into() }).unwrap();
        tasks.add(greet, Greeting { to: "second".into() }).unwrap();

        let batch = pending.drain();
        let order: Vec<_> = batch
            .into_iter()
            .map(|task| task.payload()["to"].clone())
            .collect();

        assert_eq!(order, vec!["first", "second"]);
        assert!(tasks.add(greet, Greeting { to: "late".into() }).is_err());
    }
}
