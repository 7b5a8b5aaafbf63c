//! Command pipeline executor: the fixed build sequence run in a sandbox.

use std::time::Instant;

use crate::error::CiError;
use crate::metrics;
use crate::models::build_step::{PipelineStep, StepOutcome, StepStatus};
use crate::models::trigger::BuildRequest;
use crate::sandbox::SandboxRuntime;
use crate::services::github_service::clone_url;
use crate::services::recorder::{BuildRecorder, UNEXPECTED_END};

/// What a pipeline run did, step by step.
#[derive(Debug, Default)]
pub struct PipelineReport {
    pub steps: Vec<StepOutcome>,
    /// A breakable step failed and the remaining steps were skipped.
    pub aborted: bool,
}

impl PipelineReport {
    pub fn executed(&self) -> usize {
        self.steps.len()
    }

    pub fn failed(&self) -> impl Iterator<Item = &StepOutcome> {
        self.steps.iter().filter(|s| s.status != StepStatus::Success)
    }
}

/// The standard lab build: fetch the student's and the reference
/// repository, merge them, install dependencies, run the lab's tests.
pub fn standard_steps(request: &BuildRequest, test_repo: &str, git_host: &str) -> Vec<PipelineStep> {
    let base = &request.base_folder;
    let dest = format!("{base}{}/", request.dest_folder);
    let tests = format!("{base}{test_repo}/");
    let lab = format!("{dest}{}/", request.lab_folder);

    vec![
        PipelineStep::new("prepare", format!("mkdir -p {base}"), true),
        PipelineStep::new(
            "clone",
            format!(
                "git clone {} {dest}",
                clone_url(&request.admin_token, git_host, &request.org, &request.repo)
            ),
            true,
        ),
        PipelineStep::new(
            "clone_tests",
            format!(
                "git clone {} {tests}",
                clone_url(&request.admin_token, git_host, &request.org, test_repo)
            ),
            true,
        ),
        PipelineStep::new(
            "merge_tests",
            format!("/bin/bash -c \"cp -rf {tests}* {dest}\""),
            true,
        ),
        PipelineStep::new("chmod_dependencies", format!("chmod 777 {dest}dependencies.sh"), true),
        PipelineStep::new(
            "dependencies",
            format!("/bin/sh -c \"(cd {dest} && ./dependencies.sh)\""),
            true,
        ),
        PipelineStep::new("chmod_tests", format!("chmod 777 {lab}test.sh"), true),
        PipelineStep::new(
            "test",
            format!("/bin/sh -c \"(cd {lab} && ./test.sh)\""),
            false,
        ),
    ]
}

/// Run `steps` in order inside the runtime's container, streaming every
/// output line into `recorder`.
///
/// A failing breakable step logs its error and the end-of-integration
/// marker, raises the build failure flag, and skips the remaining steps.
/// A failing non-breakable step only logs its error. Output of a step that
/// timed out stays in the log but earns nothing.
pub async fn run_pipeline(
    runtime: &SandboxRuntime,
    steps: &[PipelineStep],
    recorder: &mut BuildRecorder,
) -> PipelineReport {
    let mut report = PipelineReport::default();

    for step in steps {
        tracing::info!(step = step.name, "Running step");
        let started = Instant::now();
        let checkpoint = recorder.checkpoint();

        let result = runtime
            .run_command(&step.command, None, |line| recorder.log(line))
            .await
            .and_then(|status| {
                if status.success() {
                    Ok(())
                } else {
                    Err(CiError::step(step.name, describe_exit(status)))
                }
            })
            .map_err(|e| match e {
                CiError::Step { reason, .. } => CiError::step(step.name, reason),
                other => other,
            });

        let duration_ms = started.elapsed().as_millis() as u64;
        metrics::step_duration(step.name, duration_ms);

        let status = match &result {
            Ok(()) => StepStatus::Success,
            Err(CiError::Timeout(_)) => {
                recorder.rollback(checkpoint);
                StepStatus::TimedOut
            }
            Err(_) => StepStatus::Failure,
        };
        report.steps.push(StepOutcome {
            name: step.name.to_string(),
            status,
            duration_ms,
        });

        let Err(e) = result else {
            continue;
        };
        tracing::warn!(step = step.name, breakable = step.breakable, "Step failed: {e}");
        metrics::error_recorded(e.category());
        recorder.log(e.to_string());

        if step.breakable {
            recorder.log(UNEXPECTED_END);
            recorder.mark_build_failure();
            report.aborted = true;
            break;
        }
    }

    report
}

fn describe_exit(status: std::process::ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit status {code}"),
        None => "terminated by signal".to_string(),
    }
}
