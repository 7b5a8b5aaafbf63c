//! Daemon data models: requests, results, owners, courses.

pub mod build;
pub mod build_step;
pub mod course;
pub mod owner;
pub mod trigger;
