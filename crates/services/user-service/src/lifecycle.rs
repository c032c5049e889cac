//! Process lifespan.
//!
//! Startup prepares the schema and starts the task worker; shutdown drains
//! the worker and closes the pool. [`Lifespan`] is a [`Scope`], so the
//! server runs inside `scoped(&lifespan, ..)` and shutdown happens on every
//! exit path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use common::config::{DatabaseConfig, TaskQueueConfig};
use common::{AppError, AppResult};

use crate::config::UserServiceConfig;
use crate::infra::{Database, SessionFactory};
use crate::jobs::{LogMailer, Mailer};
use crate::scope::Scope;
use crate::service::UserServiceScope;
use crate::tasks::{TaskContext, TaskQueue, TaskRuntime};

/// Everything that lives from startup to shutdown.
pub struct AppContext {
    pub database: Database,
    pub sessions: SessionFactory,
    pub users: UserServiceScope,
    tasks: TaskRuntime,
}

impl AppContext {
    pub fn task_queue(&self) -> TaskQueue {
        self.tasks.queue()
    }
}

/// Startup and shutdown of the service. Can be entered once.
pub struct Lifespan {
    database: DatabaseConfig,
    tasks: TaskQueueConfig,
    mailer: Arc<dyn Mailer>,
    started: AtomicBool,
}

impl Lifespan {
    pub fn new(database: DatabaseConfig, tasks: TaskQueueConfig, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            database,
            tasks,
            mailer,
            started: AtomicBool::new(false),
        }
    }

    /// Lifespan with the logging mailer.
    pub fn from_config(config: &UserServiceConfig) -> Self {
        Self::new(
            config.database.clone(),
            config.tasks.clone(),
            Arc::new(LogMailer::new()),
        )
    }
}

#[async_trait]
impl Scope for Lifespan {
    type Resource = AppContext;

    async fn acquire(&self) -> AppResult<AppContext> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(AppError::internal("lifespan already entered"));
        }

        tracing::info!("Starting up");
        let database = Database::connect(&self.database).await.map_err(|err| {
            tracing::error!(error = %err, "Database startup failed");
            AppError::service_unavailable(format!("database: {}", err))
        })?;

        let sessions = database.sessions();
        let tasks = TaskRuntime::start(&self.tasks, TaskContext::new(self.mailer.clone()));

        Ok(AppContext {
            users: UserServiceScope::new(sessions.clone()),
            sessions,
            database,
            tasks,
        })
    }

    async fn release(&self, app: AppContext) -> AppResult<()> {
        tracing::info!("Shutting down");
        let AppContext {
            database,
            sessions,
            tasks,
            ..
        } = app;

        let drained = tasks.shutdown().await;

        let counts = sessions.counts();
        if counts.active() > 0 || counts.leaked > 0 {
            tracing::warn!(
                active = counts.active(),
                leaked = counts.leaked,
                "Sessions outstanding at shutdown"
            );
        }

        database.dispose().await.map_err(|err| {
            AppError::internal(format!("failed to close database pool: {}", err))
        })?;
        tracing::info!("Database pool closed");

        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::MockMailer;
    use crate::scope::scoped;

    fn lifespan(url: &str) -> Lifespan {
        let database = DatabaseConfig {
            url: url.to_string(),
            max_connections: 1,
            min_connections: 1,
            acquire_timeout_seconds: 1,
        };
        Lifespan::new(database, TaskQueueConfig::default(), Arc::new(MockMailer::new()))
    }

    #[tokio::test]
    async fn pool_is_closed_after_the_scope() {
        let lifespan = lifespan("sqlite::memory:");

        let sessions = scoped(&lifespan, |app| {
            Box::pin(async move {
                app.database.ping().await.map_err(|e| AppError::internal(e.to_string()))?;
                Ok(app.sessions.clone())
            })
        })
        .await
        .unwrap();

        let err = sessions.open().await.err().unwrap();
        assert!(matches!(err, AppError::ServiceUnavailable(_)));
    }

    #[tokio::test]
    async fn second_entry_is_rejected() {
        let lifespan = lifespan("sqlite::memory:");
        scoped(&lifespan, |_| Box::pin(async { Ok(()) })).await.unwrap();

        let err = scoped(&lifespan, |_| Box::pin(async { Ok(()) }))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
    }

    #[tokio::test]
    async fn unreachable_database_fails_startup() {
        let lifespan = lifespan("sqlite:///nonexistent-dir/for/sure/users.db");

        let err = scoped(&lifespan, |_| Box::pin(async { Ok(()) }))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ServiceUnavailable(_)));
    }
}
