//! API middleware.

mod deferred;

pub use deferred::defer_tasks;
