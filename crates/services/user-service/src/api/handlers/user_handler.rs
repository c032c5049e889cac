//! User handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

use common::AppResult;
use domain::{User, UserResponse};

use crate::api::extractors::ValidatedJson;
use crate::api::AppState;
use crate::jobs::{send_welcome_email, WelcomeEmail};
use crate::tasks::BackgroundTasks;

/// User creation request with validation
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateUserRequest {
    /// Display name
    #[validate(length(min = 1, message = "Name cannot be empty"))]
    #[schema(example = "Alice")]
    pub name: String,
    /// Email address, unique across users
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "a@x.com")]
    pub email: String,
}

/// Create user routes
pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", post(create_user))
        .route("/users/", post(create_user))
        .route("/users/:id", get(get_user))
}

/// Register a new user
///
/// A welcome email is sent after the response has gone out.
#[utoipa::path(
    post,
    path = "/users/",
    tag = "Users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User created", body = UserResponse),
        (status = 400, description = "Invalid input or persistence failure"),
        (status = 409, description = "Email already registered"),
        (status = 503, description = "Database unavailable")
    )
)]
pub async fn create_user(
    State(state): State<AppState>,
    tasks: BackgroundTasks,
    ValidatedJson(payload): ValidatedJson<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    let CreateUserRequest { name, email } = payload;

    let user = state
        .users
        .run(move |users| Box::pin(async move { users.create(name, email).await }))
        .await?;

    tasks.add(send_welcome_email, WelcomeEmail::new(&user.email, &user.name))?;

    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

/// Get user by ID
#[utoipa::path(
    get,
    path = "/users/{id}",
    tag = "Users",
    params(("id" = i32, Path, description = "User ID")),
    responses(
        (status = 200, description = "User found", body = UserResponse),
        (status = 404, description = "User not found"),
        (status = 503, description = "Database unavailable")
    )
)]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> AppResult<Json<UserResponse>> {
    let user = state
        .users
        .run(move |users| Box::pin(async move { users.fetch(id).await }))
        .await?
        .ok_or_else(User::not_found)?;

    Ok(Json(UserResponse::from(user)))
}
