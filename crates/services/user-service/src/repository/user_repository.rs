//! User table access.
//!
//! Every call runs on the connection it is handed, normally the caller's
//! session transaction, so the store never commits anything itself.

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, DatabaseTransaction, DbErr, EntityTrait, PaginatorTrait, Set,
};

use domain::{NewUser, User};

use super::entities::user::{ActiveModel, Entity as UserEntity};

#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;

/// User persistence used by the service layer.
///
/// Both calls run inside the transaction of the caller's session.
#[cfg_attr(any(test, feature = "test-utils"), automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a new user and return it with its assigned id
    async fn insert(&self, txn: &DatabaseTransaction, new_user: NewUser) -> Result<User, DbErr>;

    async fn find_by_id(&self, txn: &DatabaseTransaction, id: i32) -> Result<Option<User>, DbErr>;
}

/// sea-orm backed [`UserRepository`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UserStore;

impl UserStore {
    pub fn new() -> Self {
        Self
    }

    /// Insert a row; the database assigns the id.
    pub async fn insert<C>(&self, db: &C, new_user: NewUser) -> Result<User, DbErr>
    where
        C: ConnectionTrait,
    {
        let (name, email) = new_user.into_parts();
        let model = ActiveModel {
            name: Set(name),
            email: Set(email),
            created_at: Set(Utc::now()),
            ..Default::default()
        };

        let saved = model.insert(db).await?;
        Ok(saved.into())
    }

    pub async fn find_by_id<C>(&self, db: &C, id: i32) -> Result<Option<User>, DbErr>
    where
        C: ConnectionTrait,
    {
        let model = UserEntity::find_by_id(id).one(db).await?;
        Ok(model.map(Into::into))
    }

    pub async fn count<C>(&self, db: &C) -> Result<u64, DbErr>
    where
        C: ConnectionTrait,
    {
        UserEntity::find().count(db).await
    }
}

#[async_trait]
impl UserRepository for UserStore {
    async fn insert(&self, txn: &DatabaseTransaction, new_user: NewUser) -> Result<User, DbErr> {
        UserStore::insert(self, txn, new_user).await
    }

    async fn find_by_id(&self, txn: &DatabaseTransaction, id: i32) -> Result<Option<User>, DbErr> {
        UserStore::find_by_id(self, txn, id).await
    }
}
