//! Lifecycle control for the dispatcher and its worker pool.
//!
//! The dispatcher and every worker run as independent tokio tasks that share
//! only the delivery channel and the job store.

mod supervisor;

pub use supervisor::*;
