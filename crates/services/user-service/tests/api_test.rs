//! Integration tests for API endpoints.
//!
//! Each test runs the real router against an in-memory SQLite database
//! inside the service lifespan, with a mailer that records instead of
//! sending.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use futures::FutureExt;
use serde_json::{json, Value};
use tokio_test::assert_ok;
use tower::ServiceExt;

use common::config::{DatabaseConfig, TaskQueueConfig};
use common::{AppError, AppResult};
use user_service_lib::api::{create_router, AppState};
use user_service_lib::infra::SessionCounts;
use user_service_lib::jobs::{EmailMessage, Mailer};
use user_service_lib::lifecycle::Lifespan;
use user_service_lib::scope::scoped;

// =============================================================================
// Test Fixtures
// =============================================================================

/// Mailer that remembers every recipient
#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<EmailMessage>>,
}

impl RecordingMailer {
    fn recipients(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|message| message.to.clone())
            .collect()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: EmailMessage) -> AppResult<()> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

fn lifespan(mailer: Arc<RecordingMailer>) -> Lifespan {
    let database = DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        min_connections: 1,
        acquire_timeout_seconds: 2,
    };
    let tasks = TaskQueueConfig {
        capacity: 16,
        concurrency: 2,
    };
    Lifespan::new(database, tasks, mailer)
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn post_user(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

// =============================================================================
// User Endpoints
// =============================================================================

#[tokio::test]
async fn create_fetch_and_conflict() {
    let mailer = Arc::new(RecordingMailer::default());
    let lifespan = lifespan(mailer.clone());

    let counts: SessionCounts = assert_ok!(
        scoped(&lifespan, |app| {
            Box::pin(async move {
                let router = create_router(AppState::new(app));

                let (status, body) =
                    send(&router, post_user("/users/", json!({ "name": "Alice", "email": "a@x.com" })))
                        .await;
                assert_eq!(status, StatusCode::CREATED);
                assert_eq!(body, json!({ "id": 1, "name": "Alice", "email": "a@x.com" }));

                let (status, body) =
                    send(&router, post_user("/users/", json!({ "name": "Alice", "email": "a@x.com" })))
                        .await;
                assert_eq!(status, StatusCode::CONFLICT);
                let message = body["error"]["message"].as_str().unwrap_or_default();
                assert!(message.contains("a@x.com"), "{message}");

                let (status, body) = send(&router, get("/users/1")).await;
                assert_eq!(status, StatusCode::OK);
                assert_eq!(body, json!({ "id": 1, "name": "Alice", "email": "a@x.com" }));

                let (status, body) = send(&router, get("/users/999")).await;
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(body["error"]["message"], "User not found");

                Ok(app.sessions.counts())
            })
        })
        .await
    );

    assert_eq!(counts.opened, 4);
    assert_eq!(counts.released, 4);
    assert_eq!(counts.leaked, 0);

    // Shutdown drains the worker, so the welcome email has gone out exactly once
    assert_eq!(mailer.recipients(), vec!["a@x.com"]);
}

#[tokio::test]
async fn both_collection_paths_create() {
    let mailer = Arc::new(RecordingMailer::default());
    let lifespan = lifespan(mailer.clone());

    assert_ok!(
        scoped(&lifespan, |app| {
            Box::pin(async move {
                let router = create_router(AppState::new(app));

                let (status, first) =
                    send(&router, post_user("/users", json!({ "name": "Alice", "email": "a@x.com" })))
                        .await;
                assert_eq!(status, StatusCode::CREATED);

                let (status, second) =
                    send(&router, post_user("/users/", json!({ "name": "Bob", "email": "b@x.com" })))
                        .await;
                assert_eq!(status, StatusCode::CREATED);
                assert_eq!(first["id"], 1);
                assert_eq!(second["id"], 2);
                Ok(())
            })
        })
        .await
    );

    assert_eq!(mailer.recipients(), vec!["a@x.com", "b@x.com"]);
}

#[tokio::test]
async fn rejected_requests_schedule_no_email() {
    let mailer = Arc::new(RecordingMailer::default());
    let lifespan = lifespan(mailer.clone());

    assert_ok!(
        scoped(&lifespan, |app| {
            Box::pin(async move {
                let router = create_router(AppState::new(app));

                let (status, body) =
                    send(&router, post_user("/users/", json!({ "name": "", "email": "a@x.com" })))
                        .await;
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

                let (status, _) =
                    send(&router, post_user("/users/", json!({ "name": "Alice" }))).await;
                assert!(status.is_client_error());

                let (status, _) =
                    send(&router, post_user("/users/", json!({ "name": "Alice", "email": "a@x.com" })))
                        .await;
                assert_eq!(status, StatusCode::CREATED);

                let (status, _) =
                    send(&router, post_user("/users/", json!({ "name": "Eve", "email": "a@x.com" })))
                        .await;
                assert_eq!(status, StatusCode::CONFLICT);

                Ok(())
            })
        })
        .await
    );

    assert_eq!(mailer.recipients(), vec!["a@x.com"]);
}

#[tokio::test]
async fn cancelled_create_still_commits_and_closes_its_session() {
    let mailer = Arc::new(RecordingMailer::default());
    let lifespan = lifespan(mailer.clone());

    let counts: SessionCounts = assert_ok!(
        scoped(&lifespan, |app| {
            Box::pin(async move {
                let router = create_router(AppState::new(app));

                // One poll hands the work to the service task, then the client goes away
                let request = router
                    .clone()
                    .oneshot(post_user("/users/", json!({ "name": "Alice", "email": "a@x.com" })));
                assert!(request.now_or_never().is_none());

                for _ in 0..200 {
                    if app.sessions.counts().released == 1 {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                assert_eq!(app.sessions.counts().released, 1);

                let (status, body) = send(&router, get("/users/1")).await;
                assert_eq!(status, StatusCode::OK);
                assert_eq!(body["email"], "a@x.com");

                Ok(app.sessions.counts())
            })
        })
        .await
    );

    assert_eq!(counts.opened, 2);
    assert_eq!(counts.released, 2);
    assert_eq!(counts.leaked, 0);

    // The response never reached the client, so no welcome email was queued
    assert!(mailer.recipients().is_empty());
}

// =============================================================================
// Health and Lifespan
// =============================================================================

#[tokio::test]
async fn health_reports_database_and_counters() {
    let lifespan = lifespan(Arc::new(RecordingMailer::default()));

    assert_ok!(
        scoped(&lifespan, |app| {
            Box::pin(async move {
                let router = create_router(AppState::new(app));

                let (status, body) = send(&router, get("/health")).await;
                assert_eq!(status, StatusCode::OK);
                assert_eq!(body["status"], "healthy");
                assert_eq!(body["services"]["database"]["status"], "healthy");
                assert_eq!(body["services"]["sessions"]["leaked"], 0);
                Ok(())
            })
        })
        .await
    );
}

#[tokio::test]
async fn openapi_document_carries_schema_examples() {
    let lifespan = lifespan(Arc::new(RecordingMailer::default()));

    assert_ok!(
        scoped(&lifespan, |app| {
            Box::pin(async move {
                let router = create_router(AppState::new(app));

                let (status, body) = send(&router, get("/api-docs/openapi.json")).await;
                assert_eq!(status, StatusCode::OK);
                let user = &body["components"]["schemas"]["UserResponse"]["properties"];
                assert_eq!(user["email"]["example"], "a@x.com");
                assert_eq!(user["id"]["example"], 1);
                assert!(body["paths"]["/users/{id}"].is_object());
                Ok(())
            })
        })
        .await
    );
}

#[tokio::test]
async fn requests_after_shutdown_are_unavailable() {
    let lifespan = lifespan(Arc::new(RecordingMailer::default()));

    let state = assert_ok!(
        scoped(&lifespan, |app| Box::pin(async move { Ok(AppState::new(app)) })).await
    );
    let router = create_router(state.clone());

    let (status, body) = send(&router, get("/users/1")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "SERVICE_UNAVAILABLE");

    let err = state
        .users
        .run(|users| Box::pin(async move { users.fetch(1).await }))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ServiceUnavailable(_)));
}
