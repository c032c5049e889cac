//! Background jobs run after a successful response.

pub mod email_job;

pub use email_job::{send_welcome_email, EmailMessage, LogMailer, Mailer, WelcomeEmail};

#[cfg(any(test, feature = "test-utils"))]
pub use email_job::MockMailer;
