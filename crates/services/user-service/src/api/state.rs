//! Shared handler state.

use crate::infra::{Database, SessionFactory};
use crate::lifecycle::AppContext;
use crate::service::UserServiceScope;
use crate::tasks::TaskQueue;

/// Handles cloned out of the [`AppContext`] for request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Scoped user service access
    pub users: UserServiceScope,
    /// Deferred task submission
    pub tasks: TaskQueue,
    /// Pool handle for health checks
    pub database: Database,
    /// Session counters for health checks
    pub sessions: SessionFactory,
}

impl AppState {
    pub fn new(app: &AppContext) -> Self {
        Self {
            users: app.users.clone(),
            tasks: app.task_queue(),
            database: app.database.clone(),
            sessions: app.sessions.clone(),
        }
    }
}
