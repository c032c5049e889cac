//! Request-scoped database sessions.
//!
//! A [`Session`] is a unit of work on top of the connection pool. It holds
//! at most one open transaction; whatever is still uncommitted when the
//! session is closed gets rolled back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use common::{AppError, AppResult};
use sea_orm::{DatabaseConnection, DatabaseTransaction, DbErr, TransactionTrait};
use serde::Serialize;
use uuid::Uuid;

use crate::scope::Scope;

/// Lifetime counters shared by every session of one factory.
#[derive(Debug, Default)]
struct SessionStats {
    opened: AtomicU64,
    released: AtomicU64,
    leaked: AtomicU64,
}

/// Point-in-time copy of the session counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionCounts {
    pub opened: u64,
    pub released: u64,
    /// Sessions dropped without being closed
    pub leaked: u64,
}

impl SessionCounts {
    /// Sessions currently open.
    pub fn active(&self) -> u64 {
        self.opened
            .saturating_sub(self.released.saturating_add(self.leaked))
    }
}

/// One unit of work against the database.
pub struct Session {
    id: Uuid,
    connection: DatabaseConnection,
    txn: Option<DatabaseTransaction>,
    stats: Arc<SessionStats>,
    released: bool,
}

impl Session {
    async fn open(connection: DatabaseConnection, stats: Arc<SessionStats>) -> AppResult<Self> {
        let txn = connection.begin().await.map_err(unavailable)?;
        stats.opened.fetch_add(1, Ordering::SeqCst);

        let id = Uuid::new_v4();
        tracing::debug!(session_id = %id, "Session opened");

        Ok(Self {
            id,
            connection,
            txn: Some(txn),
            stats,
            released: false,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether a transaction is open and not yet committed or rolled back.
    pub fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    /// The open transaction, beginning a new one after a commit or rollback.
    pub async fn transaction(&mut self) -> AppResult<&DatabaseTransaction> {
        if self.txn.is_none() {
            let txn = self.connection.begin().await.map_err(unavailable)?;
            self.txn = Some(txn);
        }
        self.txn
            .as_ref()
            .ok_or_else(|| AppError::internal("session transaction missing"))
    }

    pub async fn commit(&mut self) -> Result<(), DbErr> {
        match self.txn.take() {
            Some(txn) => txn.commit().await,
            None => Ok(()),
        }
    }

    pub async fn rollback(&mut self) -> Result<(), DbErr> {
        match self.txn.take() {
            Some(txn) => txn.rollback().await,
            None => Ok(()),
        }
    }

    /// Discard uncommitted work and return the connection to the pool.
    pub async fn close(mut self) -> AppResult<()> {
        let pending = self.in_transaction();
        let rolled_back = self.rollback().await;

        self.released = true;
        self.stats.released.fetch_add(1, Ordering::SeqCst);

        match rolled_back {
            Ok(()) => {
                tracing::debug!(session_id = %self.id, pending, "Session closed");
                Ok(())
            }
            Err(err) => {
                tracing::error!(session_id = %self.id, error = %err, "Session rollback failed on close");
                Err(AppError::persistence(format!(
                    "failed to release session: {}",
                    err
                )))
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.released {
            self.stats.leaked.fetch_add(1, Ordering::SeqCst);
            tracing::warn!(session_id = %self.id, "Session dropped without being closed");
        }
    }
}

/// Opens sessions on a shared pool and tracks how many are outstanding.
#[derive(Clone)]
pub struct SessionFactory {
    connection: DatabaseConnection,
    stats: Arc<SessionStats>,
}

impl SessionFactory {
    pub fn new(connection: DatabaseConnection) -> Self {
        Self {
            connection,
            stats: Arc::new(SessionStats::default()),
        }
    }

    pub async fn open(&self) -> AppResult<Session> {
        Session::open(self.connection.clone(), self.stats.clone()).await
    }

    pub fn counts(&self) -> SessionCounts {
        SessionCounts {
            opened: self.stats.opened.load(Ordering::SeqCst),
            released: self.stats.released.load(Ordering::SeqCst),
            leaked: self.stats.leaked.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl Scope for SessionFactory {
    type Resource = Session;

    async fn acquire(&self) -> AppResult<Session> {
        self.open().await
    }

    async fn release(&self, session: Session) -> AppResult<()> {
        session.close().await
    }
}

fn unavailable(err: DbErr) -> AppError {
    tracing::warn!(error = %err, "Could not obtain a database connection");
    AppError::service_unavailable(format!("database: {}", err))
}
