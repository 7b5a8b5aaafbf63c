//! Build run events and the phase state machine they drive.

use serde::{Deserialize, Serialize};

/// Events that can happen during one build run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BuildEvent {
    /// A sandbox container is ready.
    Provisioned { container: String },
    /// The sandbox or the result id could not be obtained.
    ProvisionFailed { reason: String },
    /// The pipeline started recording into this result.
    PipelineStarted { build_id: i64 },
    /// The pipeline stopped, either after every step or on a breakable failure.
    PipelineFinished { executed: usize, aborted: bool },
    /// The total score was computed.
    Scored { total_score: i32 },
    /// The owner's history now references the result.
    Reconciled,
    ReconcileFailed { reason: String },
    /// The result was written to storage.
    Persisted,
    PersistFailed { reason: String },
    /// The run was torn down by an unexpected fault.
    Faulted { reason: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildPhase {
    #[default]
    Provisioning,
    RunningPipeline,
    Scoring,
    Reconciling,
    Persisting,
    Completed,
    Degraded,
    Aborted,
}

impl BuildPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Degraded | Self::Aborted)
    }
}

/// Aggregate state for one build run.
#[derive(Debug, Clone, Default)]
pub struct BuildAggregate {
    pub phase: BuildPhase,
    pub build_id: Option<i64>,
    /// Failures that did not stop the result from being recorded.
    pub errors: Vec<String>,
    pub abort_reason: Option<String>,
}

impl BuildAggregate {
    pub fn apply(&mut self, event: &BuildEvent) {
        if self.phase.is_terminal() {
            tracing::warn!(phase = ?self.phase, ?event, "Event after terminal phase ignored");
            return;
        }
        let previous = self.phase;
        match event {
            BuildEvent::Provisioned { .. } => {}
            BuildEvent::ProvisionFailed { reason } | BuildEvent::Faulted { reason } => {
                self.abort_reason = Some(reason.clone());
                self.phase = BuildPhase::Aborted;
            }
            BuildEvent::PipelineStarted { build_id } => {
                self.build_id = Some(*build_id);
                self.phase = BuildPhase::RunningPipeline;
            }
            BuildEvent::PipelineFinished { .. } => {
                self.phase = BuildPhase::Scoring;
            }
            BuildEvent::Scored { .. } => {
                self.phase = BuildPhase::Reconciling;
            }
            BuildEvent::Reconciled => {
                self.phase = BuildPhase::Persisting;
            }
            BuildEvent::ReconcileFailed { reason } => {
                self.errors.push(reason.clone());
                self.phase = BuildPhase::Persisting;
            }
            BuildEvent::Persisted => {
                self.phase = if self.errors.is_empty() {
                    BuildPhase::Completed
                } else {
                    BuildPhase::Degraded
                };
            }
            BuildEvent::PersistFailed { reason } => {
                self.errors.push(reason.clone());
                self.phase = BuildPhase::Degraded;
            }
        }
        if previous != self.phase {
            tracing::debug!(build_id = ?self.build_id, from = ?previous, to = ?self.phase, "Build phase changed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_completes() {
        let mut agg = BuildAggregate::default();
        for event in [
            BuildEvent::Provisioned { container: "c1".into() },
            BuildEvent::PipelineStarted { build_id: 4 },
            BuildEvent::PipelineFinished { executed: 8, aborted: false },
            BuildEvent::Scored { total_score: 100 },
            BuildEvent::Reconciled,
            BuildEvent::Persisted,
        ] {
            agg.apply(&event);
        }
        assert_eq!(agg.phase, BuildPhase::Completed);
        assert_eq!(agg.build_id, Some(4));
    }

    #[test]
    fn test_reconcile_failure_degrades() {
        let mut agg = BuildAggregate::default();
        agg.apply(&BuildEvent::PipelineStarted { build_id: 1 });
        agg.apply(&BuildEvent::PipelineFinished { executed: 2, aborted: true });
        agg.apply(&BuildEvent::Scored { total_score: 0 });
        agg.apply(&BuildEvent::ReconcileFailed { reason: "db down".into() });
        assert_eq!(agg.phase, BuildPhase::Persisting);
        agg.apply(&BuildEvent::Persisted);
        assert_eq!(agg.phase, BuildPhase::Degraded);
        assert_eq!(agg.errors, vec!["db down".to_string()]);
    }

    #[test]
    fn test_terminal_phase_is_sticky() {
        let mut agg = BuildAggregate::default();
        agg.apply(&BuildEvent::ProvisionFailed { reason: "no image".into() });
        assert_eq!(agg.phase, BuildPhase::Aborted);
        agg.apply(&BuildEvent::PipelineStarted { build_id: 9 });
        assert_eq!(agg.phase, BuildPhase::Aborted);
        assert_eq!(agg.build_id, None);
    }
}
