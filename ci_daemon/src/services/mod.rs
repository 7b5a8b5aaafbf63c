//! Build services: pipeline, recording, scoring, orchestration.

pub mod daemon;
pub mod github_service;
pub mod pipeline;
pub mod recorder;
pub mod scoring;
