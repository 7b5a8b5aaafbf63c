//! Autograder CI: build daemon for course lab assignments.
//!
//! Each build runs a fixed command pipeline inside a disposable sandbox,
//! parses the output into a scored result, and files the result under
//! the owning student or group.

pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod migration;
pub mod models;
pub mod routes;
pub mod sandbox;
pub mod schema;
pub mod services;
pub mod store;

pub use error::CiError;
pub use services::daemon::{BuildOutcome, Daemon, DaemonSettings};
