//! Deferred task middleware.
//!
//! Gives each request its own [`BackgroundTasks`] collector. Tasks collected
//! by a successful response are handed to the task worker once the server
//! has pulled the last frame of the response body. Unsuccessful responses
//! discard their tasks, and so does a response whose body is dropped before
//! it was fully sent, including a request cancelled before it produced one.

use std::pin::Pin;
use std::task::{Context, Poll};

use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use bytes::Bytes;
use http_body::{Frame, SizeHint};

use crate::tasks::{BackgroundTasks, TaskBatch, TaskQueue};

pub async fn defer_tasks(State(queue): State<TaskQueue>, mut request: Request, next: Next) -> Response {
    let (tasks, pending) = BackgroundTasks::channel();
    request.extensions_mut().insert(tasks);

    let response = next.run(request).await;

    let batch = pending.drain();
    if batch.is_empty() {
        return response;
    }

    if !response.status().is_success() {
        tracing::debug!(
            status = %response.status(),
            tasks = batch.len(),
            "Discarding deferred tasks of unsuccessful response"
        );
        return response;
    }

    response.map(|body| Body::new(SubmitOnComplete::new(body, queue, batch)))
}

/// Response body that submits a task batch after its final frame.
struct SubmitOnComplete {
    inner: Body,
    pending: Option<(TaskQueue, TaskBatch)>,
}

impl SubmitOnComplete {
    fn new(inner: Body, queue: TaskQueue, batch: TaskBatch) -> Self {
        Self {
            inner,
            pending: Some((queue, batch)),
        }
    }
}

impl http_body::Body for SubmitOnComplete {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);

        if let Poll::Ready(None) = polled {
            if let Some((queue, batch)) = this.pending.take() {
                queue.submit(batch);
            }
        }
        polled
    }

    // Report end of stream only once the batch is gone, so the server polls
    // through to the final `None` even for empty bodies.
    fn is_end_stream(&self) -> bool {
        self.pending.is_none() && self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for SubmitOnComplete {
    fn drop(&mut self) {
        if let Some((_, batch)) = self.pending.take() {
            tracing::debug!(
                tasks = batch.len(),
                "Response body dropped before completion; deferred tasks discarded"
            );
        }
    }
}
