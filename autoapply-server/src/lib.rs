//! # AutoApply Server
//!
//! Hosts the durable job scheduler and exposes it over HTTP.
//!
//! - [`infra::config`]: layered configuration (defaults, TOML file, environment)
//! - [`adapter`]: execution adapter that drives an external automation command
//! - [`handlers`] and [`routes`]: the axum control surface for submitting jobs,
//!   reading their event trail and starting or stopping the scheduler

pub mod adapter;
pub mod handlers;
pub mod infra;
pub mod routes;

pub use infra::app_state::AppState;
pub use routes::create_app;
