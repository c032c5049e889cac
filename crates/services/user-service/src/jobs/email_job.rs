//! Email background job.
//!
//! Delivery goes through a [`Mailer`]. The default [`LogMailer`] only
//! simulates the send and logs the message.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;

use common::AppResult;

use crate::tasks::TaskContext;

/// Simulated delivery latency of [`LogMailer`]
pub const DEFAULT_SEND_DELAY: Duration = Duration::from_millis(100);

/// A single outgoing message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    /// Recipient email address
    pub to: String,
    /// Email subject line
    pub subject: String,
    /// Plain text body
    pub body: String,
}

/// Outgoing mail transport.
#[cfg_attr(any(test, feature = "test-utils"), automock)]
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: EmailMessage) -> AppResult<()>;
}

/// Mailer that logs messages instead of delivering them.
#[derive(Debug, Clone)]
pub struct LogMailer {
    delay: Duration,
}

impl LogMailer {
    pub fn new() -> Self {
        Self {
            delay: DEFAULT_SEND_DELAY,
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for LogMailer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: EmailMessage) -> AppResult<()> {
        tokio::time::sleep(self.delay).await;

        tracing::info!(
            "=== EMAIL (not sent) ===\n\
             To: {}\n\
             Subject: {}\n\
             Body:\n{}\n\
             ========================",
            message.to,
            message.subject,
            message.body
        );
        Ok(())
    }
}

/// Welcome email job payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WelcomeEmail {
    pub email: String,
    pub name: String,
}

impl WelcomeEmail {
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: name.into(),
        }
    }

    fn message(&self) -> EmailMessage {
        EmailMessage {
            to: self.email.clone(),
            subject: "Welcome".to_string(),
            body: format!("Hello {}, your account is ready.", self.name),
        }
    }
}

/// Notify a newly registered user.
pub async fn send_welcome_email(ctx: TaskContext, job: WelcomeEmail) -> AppResult<()> {
    ctx.mailer().send(job.message()).await?;

    tracing::info!("Email sent to {} for user {}", job.email, job.name);
    Ok(())
}
