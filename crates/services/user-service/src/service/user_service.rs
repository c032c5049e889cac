//! User service - Handles user-related use cases.
//!
//! A [`UserService`] owns one database session for its whole lifetime and is
//! only ever handed out through [`UserServiceScope`], which closes that
//! session when the caller is done.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use sea_orm::{DbErr, SqlErr};

use common::{AppError, AppResult};
use domain::{NewUser, User};

use crate::infra::{Session, SessionFactory};
use crate::repository::{UserRepository, UserStore};
use crate::scope::{scoped_detached, Scope};

/// User operations bound to a single session.
pub struct UserService {
    session: Session,
    store: Arc<dyn UserRepository>,
    operations: u32,
}

impl UserService {
    pub fn build(session: Session) -> Self {
        Self::with_repository(session, Arc::new(UserStore::new()))
    }

    pub fn with_repository(session: Session, store: Arc<dyn UserRepository>) -> Self {
        Self {
            session,
            store,
            operations: 0,
        }
    }

    /// Validate, insert and commit a new user.
    ///
    /// On any failure the session is rolled back before the error is
    /// returned, so nothing is left half-written.
    pub async fn create(
        &mut self,
        name: impl Into<String>,
        email: impl Into<String>,
    ) -> AppResult<User> {
        let new_user = NewUser::new(name, email)?;
        let email = new_user.email().to_string();
        self.operations += 1;

        let txn = self.session.transaction().await?;
        let inserted = self.store.insert(txn, new_user).await;
        let outcome = match inserted {
            Ok(user) => self.session.commit().await.map(|()| user),
            Err(err) => Err(err),
        };

        match outcome {
            Ok(user) => {
                tracing::info!(user_id = user.id, "User created");
                Ok(user)
            }
            Err(err) => {
                if let Err(rollback_err) = self.session.rollback().await {
                    tracing::error!(error = %rollback_err, "Rollback after failed insert failed");
                }
                Err(classify_write_error(err, &email))
            }
        }
    }

    /// Look a user up by id.
    pub async fn fetch(&mut self, id: i32) -> AppResult<Option<User>> {
        self.operations += 1;

        let txn = self.session.transaction().await?;
        self.store
            .find_by_id(txn, id)
            .await
            .map_err(|err| AppError::persistence(err.to_string()))
    }

    /// Hand the session back for closing.
    pub fn release(self) -> Session {
        tracing::debug!(
            session_id = %self.session.id(),
            operations = self.operations,
            "User service released"
        );
        self.session
    }
}

fn classify_write_error(err: DbErr, email: &str) -> AppError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => User::email_taken(email).into(),
        _ => {
            tracing::warn!(error = %err, "User insert failed");
            AppError::persistence(err.to_string())
        }
    }
}

/// Scoped access to a [`UserService`].
#[derive(Clone)]
pub struct UserServiceScope {
    sessions: SessionFactory,
    repository: Arc<dyn UserRepository>,
}

impl UserServiceScope {
    pub fn new(sessions: SessionFactory) -> Self {
        Self::with_repository(sessions, Arc::new(UserStore::new()))
    }

    /// Build services on a custom repository instead of [`UserStore`].
    pub fn with_repository(sessions: SessionFactory, repository: Arc<dyn UserRepository>) -> Self {
        Self {
            sessions,
            repository,
        }
    }

    /// Run `body` against a fresh service on its own task.
    ///
    /// The session is closed once the body finishes, even if the caller has
    /// stopped waiting for the result.
    pub async fn run<F, T>(&self, body: F) -> AppResult<T>
    where
        F: for<'a> FnOnce(&'a mut UserService) -> BoxFuture<'a, AppResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        scoped_detached(self, body).await
    }
}

#[async_trait]
impl Scope for UserServiceScope {
    type Resource = UserService;

    async fn acquire(&self) -> AppResult<UserService> {
        let session = self.sessions.acquire().await?;
        Ok(UserService::with_repository(session, self.repository.clone()))
    }

    async fn release(&self, service: UserService) -> AppResult<()> {
        self.sessions.release(service.release()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::Database;
    use crate::repository::MockUserRepository;
    use crate::scope::scoped;
    use common::config::DatabaseConfig;
    use mockall::predicate::{always, eq};

    async fn users() -> (Database, UserServiceScope) {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        };
        let database = Database::connect(&config).await.unwrap();
        let scope = UserServiceScope::new(database.sessions());
        (database, scope)
    }

    #[tokio::test]
    async fn create_then_fetch_in_separate_scopes() {
        let (_db, users) = users().await;

        let created = users
            .run(|svc| Box::pin(async move { svc.create("Alice", "a@x.com").await }))
            .await
            .unwrap();
        let fetched = users
            .run(move |svc| Box::pin(async move { svc.fetch(created.id).await }))
            .await
            .unwrap();

        assert_eq!(created.id, 1);
        assert_eq!(fetched.map(|u| u.email), Some("a@x.com".to_string()));
    }

    #[tokio::test]
    async fn duplicate_email_is_conflict_and_leaves_first_row_alone() {
        let (db, users) = users().await;
        users
            .run(|svc| Box::pin(async move { svc.create("Alice", "a@x.com").await }))
            .await
            .unwrap();

        let err = users
            .run(|svc| Box::pin(async move { svc.create("Alice Again", "a@x.com").await }))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Conflict(ref what) if what.contains("a@x.com")));
        assert_eq!(UserStore::new().count(db.connection()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn service_can_keep_working_after_a_failed_create() {
        let (_db, users) = users().await;

        let (failed, second) = scoped(&users, |svc| {
            Box::pin(async move {
                svc.create("Alice", "a@x.com").await?;
                let failed = svc.create("Alice", "a@x.com").await.is_err();
                let second = svc.create("Bob", "b@x.com").await?;
                Ok((failed, second))
            })
        })
        .await
        .unwrap();

        assert!(failed);
        assert_eq!(second.id, 2);
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_the_store() {
        let (db, users) = users().await;

        let err = users
            .run(|svc| Box::pin(async move { svc.create("   ", "a@x.com").await }))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(UserStore::new().count(db.connection()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn every_scope_closes_its_session() {
        let (db, _) = users().await;
        let sessions = db.sessions();
        let tracked = UserServiceScope::new(sessions.clone());

        for _ in 0..3 {
            tracked
                .run(|svc| Box::pin(async move { svc.fetch(1).await }))
                .await
                .unwrap();
        }

        let counts = sessions.counts();
        assert_eq!(counts.opened, 3);
        assert_eq!(counts.released, 3);
        assert_eq!(counts.leaked, 0);
    }

    #[tokio::test]
    async fn store_failure_rolls_back_and_surfaces_as_persistence_error() {
        let (db, _) = users().await;
        let sessions = db.sessions();
        let mut repository = MockUserRepository::new();
        repository
            .expect_insert()
            .times(1)
            .returning(|_, _| Err(DbErr::Custom("disk full".into())));
        let users = UserServiceScope::with_repository(sessions.clone(), Arc::new(repository));

        let err = users
            .run(|svc| Box::pin(async move { svc.create("Alice", "a@x.com").await }))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Persistence(ref msg) if msg.contains("disk full")));
        assert_eq!(sessions.counts().released, 1);
        assert_eq!(sessions.counts().leaked, 0);
    }

    #[tokio::test]
    async fn fetch_passes_the_id_to_the_repository() {
        let (db, _) = users().await;
        let mut repository = MockUserRepository::new();
        repository
            .expect_find_by_id()
            .with(always(), eq(7))
            .times(1)
            .returning(|_, _| Ok(None));
        let users = UserServiceScope::with_repository(db.sessions(), Arc::new(repository));

        let found = users
            .run(|svc| Box::pin(async move { svc.fetch(7).await }))
            .await
            .unwrap();

        assert!(found.is_none());
    }
}
