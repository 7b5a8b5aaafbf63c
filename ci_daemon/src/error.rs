//! Error taxonomy for one build run.
//!
//! Only `Provision` keeps a run from recording a result. Every other variant
//! is written into the build log and reflected in the score and status.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum CiError {
    /// The sandbox backend is unreachable or the image is missing.
    #[error("sandbox provisioning failed: {0}")]
    Provision(String),

    /// An operation needed a sandbox before one was created.
    #[error("Does not have any container started up yet.")]
    NotReady,

    /// A pipeline command could not be spawned or exited unsuccessfully.
    #[error("step `{step}` failed: {reason}")]
    Step { step: String, reason: String },

    /// A command exceeded its time budget and was killed.
    #[error("Process killed on timeout after {}s.", .0.as_secs())]
    Timeout(Duration),

    /// A build result or owner record could not be read or written.
    #[error("storage error in {operation}: {reason}")]
    Storage { operation: String, reason: String },

    /// Unexpected fault while orchestrating a run.
    #[error("runtime fault: {0}")]
    Fault(String),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl CiError {
    pub fn storage(operation: &str, err: impl std::fmt::Display) -> Self {
        Self::Storage {
            operation: operation.to_string(),
            reason: err.to_string(),
        }
    }

    pub fn step(step: &str, reason: impl std::fmt::Display) -> Self {
        Self::Step {
            step: step.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Short label used for metrics.
    pub fn category(&self) -> &'static str {
        match self {
            CiError::Provision(_) => "provision",
            CiError::NotReady => "not_ready",
            CiError::Step { .. } => "step",
            CiError::Timeout(_) => "timeout",
            CiError::Storage { .. } => "storage",
            CiError::Fault(_) => "fault",
            CiError::Config(_) => "config",
        }
    }
}
