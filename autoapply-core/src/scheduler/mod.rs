//! Durable task scheduler.
//!
//! Persisted jobs are promoted by the [`Dispatcher`] into a bounded delivery
//! channel, executed by a fixed pool of [`Worker`]s through an
//! [`ExecutionAdapter`], and moved through the status machine by
//! [`plan_transition`]. The [`SchedulerController`] starts and stops the
//! whole arrangement as one unit.

pub mod adapter;
pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod events;
pub mod job;
pub mod memory;
pub mod persistence;
pub mod retry;
pub mod runtime;
pub mod store;
pub mod worker;

pub use adapter::*;
pub use channel::*;
pub use config::*;
pub use dispatcher::*;
pub use events::*;
pub use job::*;
pub use memory::*;
pub use persistence::*;
pub use retry::*;
pub use runtime::*;
pub use store::*;
pub use worker::*;
