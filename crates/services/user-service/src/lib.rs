//! User Service Library
//!
//! HTTP service for registering and looking up users. Each request works
//! through its own database session, and follow-up work such as the welcome
//! email runs on a background worker after the response is sent.

pub mod api;
pub mod config;
pub mod infra;
pub mod jobs;
pub mod lifecycle;
pub mod repository;
pub mod scope;
pub mod service;
pub mod tasks;

use tokio::net::TcpListener;
use tracing::info;

use common::{AppError, AppResult};

use crate::api::{create_router, AppState};
use crate::config::UserServiceConfig;
use crate::infra::Database;
use crate::lifecycle::Lifespan;
use crate::scope::scoped;

/// Run the HTTP server until a shutdown signal arrives.
///
/// Startup and shutdown are handled by [`Lifespan`]; in-flight requests are
/// allowed to finish before the task worker is drained and the pool closed.
pub async fn run_server(config: UserServiceConfig) -> AppResult<()> {
    let lifespan = Lifespan::from_config(&config);
    let addr = config.service.addr();

    scoped(&lifespan, move |app| {
        Box::pin(async move {
            let router = create_router(AppState::new(app));

            let listener = TcpListener::bind(&addr)
                .await
                .map_err(|e| AppError::internal(format!("failed to bind {}: {}", addr, e)))?;
            info!("User service listening on {}", addr);

            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .map_err(|e| AppError::internal(format!("server error: {}", e)))?;

            Ok(())
        })
    })
    .await
}

/// Run migrations (for CLI commands).
pub async fn run_migrations(config: &UserServiceConfig, action: MigrateAction) -> AppResult<()> {
    let db = Database::connect_without_migrations(&config.database)
        .await
        .map_err(|e| AppError::service_unavailable(format!("database: {}", e)))?;

    let result = match action {
        MigrateAction::Up => db.run_migrations().await.map(|()| {
            info!("Migrations applied successfully");
        }),
        MigrateAction::Down => db.rollback_migration().await.map(|()| {
            info!("Rolled back last migration");
        }),
        MigrateAction::Status => db.migration_status().await.map(|status| {
            for (name, applied) in status {
                let marker = if applied { "[x]" } else { "[ ]" };
                println!("{} {}", marker, name);
            }
        }),
        MigrateAction::Fresh => db.fresh_migrations().await.map(|()| {
            info!("Database reset and migrations applied");
        }),
    };

    let closed = db.dispose().await;
    result.map_err(|e| AppError::persistence(e.to_string()))?;
    closed.map_err(|e| AppError::internal(format!("failed to close database pool: {}", e)))
}

/// Migration action type.
#[derive(Debug, Clone, Copy)]
pub enum MigrateAction {
    Up,
    Down,
    Status,
    Fresh,
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
