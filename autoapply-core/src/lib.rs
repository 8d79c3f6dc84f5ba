//! # AutoApply Core
//!
//! Durable task scheduler behind the AutoApply job-application automation
//! service.
//!
//! ## Overview
//!
//! Submitted jobs are persisted by a [`JobStore`](scheduler::JobStore) and
//! move through a small lifecycle:
//!
//! - **Dispatcher**: periodically claims eligible `queued` jobs in priority
//!   then creation order and pushes them into a bounded delivery channel,
//!   applying backpressure from both the in-flight count and channel depth.
//! - **Workers**: a fixed pool pulls deliveries, runs the external
//!   execution adapter under a fault boundary and commits the resulting
//!   transition together with its event.
//! - **Retry policy**: failed attempts are requeued until `max_retries` is
//!   reached, then end in `failed_final`.
//! - **Lifecycle control**: [`SchedulerController`](scheduler::SchedulerController)
//!   starts and stops the whole group idempotently and reports its health.
//!
//! Two stores ship with the crate: [`PostgresJobStore`](scheduler::PostgresJobStore)
//! for production and [`InMemoryJobStore`](scheduler::InMemoryJobStore) for tests
//! and local runs.
//!
//! ## Architecture
//!
//! - [`scheduler`]: job model, stores, dispatcher, workers and runtime
//! - [`error`]: crate-wide error type

#![allow(missing_docs)]

/// Error types shared by every scheduler component
pub mod error;

/// Job model, stores, dispatcher, worker pool and lifecycle control
pub mod scheduler;

pub use error::{Result, SchedulerError};

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
