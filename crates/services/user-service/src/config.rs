//! User service configuration.

use std::env;
use std::str::FromStr;

use common::config::{DatabaseConfig, ServiceConfig, TaskQueueConfig};

/// User service configuration.
#[derive(Debug, Clone)]
pub struct UserServiceConfig {
    /// Listener settings
    pub service: ServiceConfig,
    /// Connection pool settings
    pub database: DatabaseConfig,
    /// Deferred task worker settings
    pub tasks: TaskQueueConfig,
}

impl UserServiceConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            service: ServiceConfig {
                service_name: defaults.service.service_name,
                host: env::var("USER_SERVICE_HOST").unwrap_or(defaults.service.host),
                port: parse_env("USER_SERVICE_PORT", defaults.service.port),
            },
            database: DatabaseConfig {
                url: env::var("USER_SERVICE_DATABASE_URL")
                    .or_else(|_| env::var("DATABASE_URL"))
                    .unwrap_or(defaults.database.url),
                max_connections: parse_env(
                    "DATABASE_MAX_CONNECTIONS",
                    defaults.database.max_connections,
                ),
                min_connections: parse_env(
                    "DATABASE_MIN_CONNECTIONS",
                    defaults.database.min_connections,
                ),
                acquire_timeout_seconds: parse_env(
                    "DATABASE_ACQUIRE_TIMEOUT_SECONDS",
                    defaults.database.acquire_timeout_seconds,
                ),
            },
            tasks: TaskQueueConfig {
                capacity: parse_env("TASK_QUEUE_CAPACITY", defaults.tasks.capacity),
                concurrency: parse_env("TASK_WORKER_CONCURRENCY", defaults.tasks.concurrency),
            },
        }
    }

    /// Override the listener address (CLI flags win over the environment).
    pub fn with_listener(mut self, host: Option<String>, port: Option<u16>) -> Self {
        if let Some(host) = host {
            self.service.host = host;
        }
        if let Some(port) = port {
            self.service.port = port;
        }
        self
    }
}

impl Default for UserServiceConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                service_name: "user-service".to_string(),
                ..Default::default()
            },
            database: DatabaseConfig::default(),
            tasks: TaskQueueConfig::default(),
        }
    }
}

fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
