//! Build result recorder: owns the mutable result of one run.
//!
//! Every output line passes through [`BuildRecorder::log`], which redacts
//! credentials, picks up structured score lines, and counts pass/fail
//! markers before appending the line to the log.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::CiError;
use crate::models::build::{BuildResult, TestScore};
use crate::store::Storage;

/// Logged when a breakable step fails and the remaining steps are skipped.
pub const UNEXPECTED_END: &str = "Unexpected end of integration.";

static PASS_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(--- PASS|PASS:)").unwrap());
static FAIL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(--- FAIL|FAIL:)").unwrap());
static BUILD_FAILED_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(build|setup) failed\]").unwrap());

/// Score counters at a point in the run, see [`BuildRecorder::checkpoint`].
#[derive(Debug, Clone)]
pub struct ScoreCheckpoint {
    num_passes: u32,
    num_fails: u32,
    test_scores: BTreeMap<String, TestScore>,
}

pub struct BuildRecorder {
    result: BuildResult,
    admin_token: String,
    secret: String,
}

impl BuildRecorder {
    pub fn new(result: BuildResult, admin_token: &str, secret: &str) -> Self {
        Self {
            result,
            admin_token: admin_token.to_string(),
            secret: secret.to_string(),
        }
    }

    pub fn result(&self) -> &BuildResult {
        &self.result
    }

    pub fn result_mut(&mut self) -> &mut BuildResult {
        &mut self.result
    }

    pub fn checkpoint(&self) -> ScoreCheckpoint {
        ScoreCheckpoint {
            num_passes: self.result.num_passes,
            num_fails: self.result.num_fails,
            test_scores: self.result.test_scores.clone(),
        }
    }

    /// Drop the counters and structured scores gathered since `checkpoint`.
    /// Logged lines stay in the log.
    pub fn rollback(&mut self, checkpoint: ScoreCheckpoint) {
        self.result.num_passes = checkpoint.num_passes;
        self.result.num_fails = checkpoint.num_fails;
        self.result.test_scores = checkpoint.test_scores;
    }

    /// Append one output line. Never fails.
    pub fn log(&mut self, line: impl Into<String>) {
        let mut line = line.into();
        if !self.admin_token.is_empty() && line.contains(&self.admin_token) {
            line = line.replace(&self.admin_token, "<token>");
        }

        if !self.secret.is_empty() && line.contains(&self.secret) {
            if self.record_score(&line) {
                return;
            }
            line = line.replace(&self.secret, "<secret>");
        }

        if PASS_REGEX.is_match(&line) {
            self.result.num_passes += 1;
        } else if FAIL_REGEX.is_match(&line) {
            self.result.num_fails += 1;
        }
        if BUILD_FAILED_REGEX.is_match(&line) {
            self.result.build_failures += 1;
        }

        self.result.log.push(line);
    }

    /// Flag an infrastructure failure; the run can no longer earn a score.
    pub fn mark_build_failure(&mut self) {
        self.result.build_failures += 1;
    }

    fn record_score(&mut self, line: &str) -> bool {
        let Ok(mut score) = serde_json::from_str::<TestScore>(line.trim()) else {
            return false;
        };
        if score.secret != self.secret {
            return false;
        }
        score.secret.clear();
        self.result
            .test_scores
            .insert(score.test_name.clone(), score);
        true
    }

    /// Persist the result under its id.
    pub async fn save(&self, storage: &dyn Storage) -> Result<(), CiError> {
        storage
            .put_build(&self.result)
            .await
            .map_err(|e| CiError::storage("put_build", e))
    }
}
