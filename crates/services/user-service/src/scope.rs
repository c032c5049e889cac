//! Scoped resource acquisition.
//!
//! A [`Scope`] pairs an asynchronous acquire with an asynchronous release.
//! [`scoped`] runs a body between the two and guarantees the release runs
//! exactly once for every successful acquire, whether the body returns a
//! value, returns an error or panics.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use common::{AppError, AppResult};
use futures::future::BoxFuture;
use futures::FutureExt;

/// A resource with an asynchronous setup and teardown.
#[async_trait]
pub trait Scope: Send + Sync {
    type Resource: Send;

    /// Produce a fresh resource. Nothing is released if this fails.
    async fn acquire(&self) -> AppResult<Self::Resource>;

    /// Tear down a resource produced by [`Scope::acquire`].
    async fn release(&self, resource: Self::Resource) -> AppResult<()>;
}

/// Acquire a resource, lend it to `body`, then release it.
///
/// If the body and the release both fail, the release error is returned
/// and the body error is logged. A panicking body is turned into
/// [`AppError::Internal`] once the resource has been released.
pub async fn scoped<S, F, T>(scope: &S, body: F) -> AppResult<T>
where
    S: Scope,
    F: for<'a> FnOnce(&'a mut S::Resource) -> BoxFuture<'a, AppResult<T>> + Send,
    T: Send,
{
    let mut resource = scope.acquire().await?;
    let outcome = AssertUnwindSafe(body(&mut resource)).catch_unwind().await;
    let released = scope.release(resource).await;

    match (outcome, released) {
        (Ok(result), Ok(())) => result,
        (Ok(Ok(_)), Err(release_err)) => Err(release_err),
        (Ok(Err(body_err)), Err(release_err)) => {
            tracing::error!(error = %body_err, "Scope body failed and release failed too");
            Err(release_err)
        }
        (Err(panic), released) => {
            let message = panic_message(&*panic);
            tracing::error!(panic = %message, "Scope body panicked");
            released?;
            Err(AppError::internal(format!("scope body panicked: {}", message)))
        }
    }
}

/// Like [`scoped`], but the acquire, body and release run on their own task.
///
/// Dropping the returned future (a cancelled request, for instance) does not
/// interrupt the body or skip the release; both run to completion in the
/// background and their outcome is discarded.
pub async fn scoped_detached<S, F, T>(scope: &S, body: F) -> AppResult<T>
where
    S: Scope + Clone + 'static,
    S::Resource: 'static,
    F: for<'a> FnOnce(&'a mut S::Resource) -> BoxFuture<'a, AppResult<T>> + Send + 'static,
    T: Send + 'static,
{
    let scope = scope.clone();
    tokio::spawn(async move { scoped(&scope, body).await })
        .await
        .map_err(|err| AppError::internal(format!("scope task failed: {}", err)))?
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
