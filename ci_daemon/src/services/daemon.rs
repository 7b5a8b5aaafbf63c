//! Build orchestrator: drives one build request from sandbox provisioning
//! to a persisted, reconciled result.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::error::CiError;
use crate::events::build::{BuildAggregate, BuildEvent, BuildPhase};
use crate::metrics;
use crate::models::build::BuildResult;
use crate::models::build_step::PipelineStep;
use crate::models::owner::{OwnerKey, NO_BUILD};
use crate::models::trigger::BuildRequest;
use crate::sandbox::{ContainerBackend, ExecSlot, SandboxRuntime, DEFAULT_COMMAND_TIMEOUT};
use crate::services::pipeline::{self, PipelineReport};
use crate::services::recorder::BuildRecorder;
use crate::services::scoring;
use crate::store::EntityStore;

/// Settings shared by every run the daemon starts.
#[derive(Clone, Debug)]
pub struct DaemonSettings {
    pub image: String,
    pub command_timeout: Duration,
    pub test_repo: String,
    pub git_host: String,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            image: "autograder".to_string(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            test_repo: "labs-test".to_string(),
            git_host: "github.com".to_string(),
        }
    }
}

/// How one build run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// The result was scored, reconciled, and saved.
    Completed { build_id: i64 },
    /// The result exists but reconciliation or saving failed.
    Degraded { build_id: i64, errors: Vec<String> },
    /// No result was recorded.
    Aborted { reason: String },
}

impl BuildOutcome {
    pub fn build_id(&self) -> Option<i64> {
        match self {
            Self::Completed { build_id } | Self::Degraded { build_id, .. } => Some(*build_id),
            Self::Aborted { .. } => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Degraded { .. } => "degraded",
            Self::Aborted { .. } => "aborted",
        }
    }
}

pub struct Daemon {
    backend: Arc<dyn ContainerBackend>,
    slot: ExecSlot,
    store: Arc<EntityStore>,
    settings: DaemonSettings,
    in_flight: AtomicUsize,
}

impl Daemon {
    pub fn new(
        backend: Arc<dyn ContainerBackend>,
        slot: ExecSlot,
        store: Arc<EntityStore>,
        settings: DaemonSettings,
    ) -> Self {
        Self {
            backend,
            slot,
            store,
            settings,
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    pub fn settings(&self) -> &DaemonSettings {
        &self.settings
    }

    /// Builds started with [`Daemon::spawn_build`] that have not finished.
    pub fn builds_in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// A sandbox handle sharing the daemon's backend and execution slot.
    pub fn runtime(&self) -> SandboxRuntime {
        SandboxRuntime::new(
            self.backend.clone(),
            self.slot.clone(),
            self.settings.command_timeout,
        )
    }

    /// The standard lab build for `request`.
    pub fn plan(&self, request: &BuildRequest) -> Vec<PipelineStep> {
        pipeline::standard_steps(request, &self.settings.test_repo, &self.settings.git_host)
    }

    /// Run the standard lab build to completion.
    pub async fn run_build(&self, request: &BuildRequest) -> BuildOutcome {
        let steps = self.plan(request);
        self.run_build_with(request, &steps).await
    }

    /// Run one build with an explicit step list.
    pub async fn run_build_with(&self, request: &BuildRequest, steps: &[PipelineStep]) -> BuildOutcome {
        let mut agg = BuildAggregate::default();

        tracing::info!(
            course = %request.org,
            user = %request.user,
            group = request.group,
            lab = request.lab_number,
            "Running tests for: {}/{}",
            request.org,
            request.repo
        );

        let mut runtime = self.runtime();
        if let Err(e) = runtime.create(&self.settings.image).await {
            tracing::error!(course = %request.org, user = %request.user, "Provisioning failed: {e}");
            metrics::error_recorded(e.category());
            return finish(agg, BuildEvent::ProvisionFailed { reason: e.to_string() });
        }
        agg.apply(&BuildEvent::Provisioned {
            container: runtime.container_id().unwrap_or_default().to_string(),
        });

        let build_id = match self.store.storage().next_build_id().await {
            Ok(id) => id,
            Err(e) => {
                let e = CiError::storage("next_build_id", e);
                tracing::error!("Cannot allocate build result: {e}");
                metrics::error_recorded(e.category());
                teardown(&mut runtime).await;
                return finish(agg, BuildEvent::ProvisionFailed { reason: e.to_string() });
            }
        };

        let result = BuildResult::new(build_id, &request.org, &request.user, request.lab_number);
        let mut recorder = BuildRecorder::new(result, &request.admin_token, &request.secret);
        agg.apply(&BuildEvent::PipelineStarted { build_id });

        let started = Instant::now();
        let report = pipeline::run_pipeline(&runtime, steps, &mut recorder).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        teardown(&mut runtime).await;
        log_report(build_id, &report);
        agg.apply(&BuildEvent::PipelineFinished {
            executed: report.executed(),
            aborted: report.aborted,
        });

        let total_score = scoring::total_score(recorder.result());
        {
            let result = recorder.result_mut();
            result.build_time_ms = elapsed_ms;
            result.total_score = total_score;
        }
        agg.apply(&BuildEvent::Scored { total_score });

        // A panic while reconciling must not lose the result.
        let reconciled = tokio::spawn(reconcile(self.store.clone(), request.clone(), build_id))
            .await
            .unwrap_or_else(|e| Err(CiError::Fault(e.to_string())));
        match reconciled {
            Ok(prior) => {
                if let Some(prior) = prior {
                    let result = recorder.result_mut();
                    result.status = prior.status;
                    if !request.is_push() {
                        result.push_time = prior.push_time;
                    }
                }
                agg.apply(&BuildEvent::Reconciled);
            }
            Err(e) => {
                tracing::error!(build_id, "Reconciliation failed: {e}");
                metrics::error_recorded(e.category());
                agg.apply(&BuildEvent::ReconcileFailed { reason: e.to_string() });
            }
        }

        let persisted = match recorder.save(self.store.storage().as_ref()).await {
            Ok(()) => BuildEvent::Persisted,
            Err(e) => {
                tracing::error!(build_id, "Failed to save build result: {e}");
                metrics::error_recorded(e.category());
                BuildEvent::PersistFailed { reason: e.to_string() }
            }
        };

        metrics::build_duration(elapsed_ms);
        metrics::build_score(total_score);
        tracing::info!(build_id, total_score, elapsed_ms, "Build finished");
        finish(agg, persisted)
    }

    /// Run one build in its own task. A fault that unwinds the run is
    /// reported as [`BuildOutcome::Aborted`].
    pub fn spawn_build(self: &Arc<Self>, request: BuildRequest) -> JoinHandle<BuildOutcome> {
        self.spawn_build_with(request, None)
    }

    /// Like [`Daemon::spawn_build`], with an explicit step list.
    pub fn spawn_build_with(
        self: &Arc<Self>,
        request: BuildRequest,
        steps: Option<Vec<PipelineStep>>,
    ) -> JoinHandle<BuildOutcome> {
        let daemon = self.clone();
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::builds_in_flight(running);
        let counter = self.clone();
        tokio::spawn(async move {
            let course = request.org.clone();
            let user = request.user.clone();
            let run = tokio::spawn(async move {
                match steps {
                    Some(steps) => daemon.run_build_with(&request, &steps).await,
                    None => daemon.run_build(&request).await,
                }
            });

            let joined = run.await;
            let running = counter.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
            metrics::builds_in_flight(running);

            match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    let fault = CiError::Fault(e.to_string());
                    tracing::error!(course = %course, user = %user, "Build run faulted: {fault}");
                    metrics::error_recorded(fault.category());
                    finish(
                        BuildAggregate::default(),
                        BuildEvent::Faulted {
                            reason: fault.to_string(),
                        },
                    )
                }
            }
        })
    }
}

/// Attach build `build_id` to its owner's history and return the owner's
/// previous result for this lab, whose status (and push time, for manual
/// runs) the new result carries forward.
///
/// The owner stays locked from the history read until the save.
async fn reconcile(
    store: Arc<EntityStore>,
    request: BuildRequest,
    build_id: i64,
) -> Result<Option<BuildResult>, CiError> {
    let key = if request.is_group() {
        OwnerKey::group(&request.org, request.group)
    } else {
        OwnerKey::user(&request.user)
    };

    let mut guard = store.lock_owner(&key).await?;
    let previous = guard.owner().last_build_id(&request.org, request.lab_number);

    let prior = if previous == NO_BUILD {
        None
    } else {
        let prior = store.build(previous).await?.ok_or_else(|| {
            CiError::storage("get_build", format!("previous build {previous} not found"))
        })?;
        Some(prior)
    };

    guard
        .owner_mut()
        .add_build_result(&request.org, request.lab_number, build_id);
    guard.save().await?;
    tracing::debug!(owner = %key, build_id, previous, "Owner reconciled");
    Ok(prior)
}

async fn teardown(runtime: &mut SandboxRuntime) {
    if let Err(e) = runtime.destroy().await {
        tracing::warn!("Failed to remove container: {e}");
        metrics::error_recorded(e.category());
    }
}

fn log_report(build_id: i64, report: &PipelineReport) {
    let failed: Vec<&str> = report.failed().map(|s| s.name.as_str()).collect();
    if report.aborted {
        tracing::warn!(build_id, executed = report.executed(), ?failed, "Pipeline aborted");
    } else {
        tracing::info!(build_id, executed = report.executed(), ?failed, "Pipeline finished");
    }
}

fn finish(mut agg: BuildAggregate, last: BuildEvent) -> BuildOutcome {
    agg.apply(&last);
    let outcome = match agg.phase {
        BuildPhase::Completed => BuildOutcome::Completed {
            build_id: agg.build_id.unwrap_or(NO_BUILD),
        },
        BuildPhase::Degraded => BuildOutcome::Degraded {
            build_id: agg.build_id.unwrap_or(NO_BUILD),
            errors: agg.errors,
        },
        _ => BuildOutcome::Aborted {
            reason: agg
                .abort_reason
                .unwrap_or_else(|| format!("run stopped in phase {:?}", agg.phase)),
        },
    };
    metrics::build_finished(outcome.label());
    outcome
}
