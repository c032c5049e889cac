//! Infrastructure layer - database pool, schema and sessions.

mod db;
pub mod migrations;
pub mod session;

pub use db::Database;
pub use migrations::Migrator;
pub use session::{Session, SessionCounts, SessionFactory};
