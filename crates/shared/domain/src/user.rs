//! User domain entity and related types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{MAX_EMAIL_LENGTH, MAX_NAME_LENGTH, MIN_NAME_LENGTH, USER_ENTITY};
use crate::error::{DomainError, DomainResult};

/// User domain entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Conflict error for a duplicate email address
    pub fn email_taken(email: &str) -> DomainError {
        DomainError::conflict(format!("{} with email {}", USER_ENTITY, email))
    }

    /// Not-found error for a missing user
    pub fn not_found() -> DomainError {
        DomainError::not_found(USER_ENTITY)
    }
}

/// Validated input for creating a user.
///
/// Fields are private so every instance went through [`NewUser::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    name: String,
    email: String,
}

impl NewUser {
    /// Trim and validate user input.
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> DomainResult<Self> {
        let name = name.into().trim().to_string();
        let email = email.into().trim().to_string();

        let name_len = name.chars().count();
        if name_len < MIN_NAME_LENGTH || name_len > MAX_NAME_LENGTH {
            return Err(DomainError::validation(format!(
                "Name must be between {} and {} characters",
                MIN_NAME_LENGTH, MAX_NAME_LENGTH
            )));
        }

        if email.len() > MAX_EMAIL_LENGTH {
            return Err(DomainError::validation(format!(
                "Email must be at most {} characters",
                MAX_EMAIL_LENGTH
            )));
        }

        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {}
            _ => return Err(DomainError::validation("Invalid email format")),
        }

        Ok(Self { name, email })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    /// Split into owned `(name, email)`.
    pub fn into_parts(self) -> (String, String) {
        (self.name, self.email)
    }
}

/// User response (safe to return to client)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct UserResponse {
    /// Generated user identifier
    #[cfg_attr(feature = "openapi", schema(example = 1))]
    pub id: i32,
    /// User display name
    #[cfg_attr(feature = "openapi", schema(example = "Alice"))]
    pub name: String,
    /// User email address
    #[cfg_attr(feature = "openapi", schema(example = "a@x.com"))]
    pub email: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
        }
    }
}
