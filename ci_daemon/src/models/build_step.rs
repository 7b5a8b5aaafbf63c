//! ci.build.step: One shell command in the fixed build sequence.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStep {
    pub name: &'static str,
    pub command: String,
    /// A failing breakable step aborts the rest of the pipeline.
    pub breakable: bool,
}

impl PipelineStep {
    pub fn new(name: &'static str, command: impl Into<String>, breakable: bool) -> Self {
        Self {
            name,
            command: command.into(),
            breakable,
        }
    }
}

/// What happened to a step during one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failure,
    TimedOut,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub name: String,
    pub status: StepStatus,
    pub duration_ms: u64,
}
