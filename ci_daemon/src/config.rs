//! Daemon configuration: loaded from environment variables, plus the
//! course registry loaded from a JSON file.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::CiError;
use crate::models::course::Course;

/// Which container backend runs the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SandboxKind {
    Docker,
    /// Plain `sh` in a temporary directory. Development and tests only.
    Host,
}

impl std::str::FromStr for SandboxKind {
    type Err = CiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "docker" => Ok(Self::Docker),
            "host" => Ok(Self::Host),
            other => Err(CiError::Config(format!("unknown sandbox backend `{other}`"))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CiConfig {
    /// GitHub webhook secret for HMAC validation.
    pub github_webhook_secret: String,
    pub sandbox: SandboxKind,
    /// Base image every build container is created from.
    pub sandbox_image: String,
    /// Container CLI used by the docker backend.
    pub docker_bin: String,
    /// Per-command time budget.
    pub command_timeout: Duration,
    /// Execution slots shared by all builds. 1 keeps command execution
    /// strictly sequential.
    pub max_concurrent: usize,
    pub git_host: String,
    /// Shared repository holding the reference tests.
    pub test_repo: String,
    pub courses_file: Option<String>,
}

impl Default for CiConfig {
    fn default() -> Self {
        Self {
            github_webhook_secret: String::new(),
            sandbox: SandboxKind::Docker,
            sandbox_image: "autograder".to_string(),
            docker_bin: "docker".to_string(),
            command_timeout: crate::sandbox::DEFAULT_COMMAND_TIMEOUT,
            max_concurrent: 1,
            git_host: "github.com".to_string(),
            test_repo: "labs-test".to_string(),
            courses_file: None,
        }
    }
}

impl CiConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let github_webhook_secret = std::env::var("CI_WEBHOOK_SECRET").unwrap_or_default();
        let sandbox = match std::env::var("CI_SANDBOX_BACKEND") {
            Ok(s) => s.parse().unwrap_or_else(|e| {
                tracing::warn!("{e}, falling back to docker");
                SandboxKind::Docker
            }),
            Err(_) => defaults.sandbox,
        };
        let sandbox_image =
            std::env::var("CI_SANDBOX_IMAGE").unwrap_or(defaults.sandbox_image);
        let docker_bin = std::env::var("CI_DOCKER_BIN").unwrap_or(defaults.docker_bin);
        let command_timeout = std::env::var("CI_COMMAND_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.command_timeout);
        let max_concurrent = std::env::var("CI_MAX_CONCURRENT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_concurrent);
        let git_host = std::env::var("CI_GIT_HOST").unwrap_or(defaults.git_host);
        let test_repo = std::env::var("CI_TEST_REPO").unwrap_or(defaults.test_repo);
        let courses_file = std::env::var("CI_COURSES_FILE").ok();

        if github_webhook_secret.is_empty() {
            tracing::warn!("CI_WEBHOOK_SECRET not set -- webhook signature validation disabled");
        }
        if max_concurrent > 1 {
            tracing::warn!(
                max_concurrent,
                "More than one execution slot -- sandbox commands may run in parallel"
            );
        }

        Self {
            github_webhook_secret,
            sandbox,
            sandbox_image,
            docker_bin,
            command_timeout,
            max_concurrent,
            git_host,
            test_repo,
            courses_file,
        }
    }
}

/// Courses the daemon builds labs for, keyed by course name.
#[derive(Clone, Debug, Default)]
pub struct CourseRegistry {
    courses: BTreeMap<String, Course>,
}

impl CourseRegistry {
    pub fn new(courses: impl IntoIterator<Item = Course>) -> Self {
        Self {
            courses: courses.into_iter().map(|c| (c.name.clone(), c)).collect(),
        }
    }

    /// Parse a JSON array of courses.
    pub fn from_json(json: &str) -> Result<Self, CiError> {
        let courses: Vec<Course> = serde_json::from_str(json)
            .map_err(|e| CiError::Config(format!("invalid course registry: {e}")))?;
        Ok(Self::new(courses))
    }

    /// Load the registry file. A missing file yields an empty registry.
    pub fn load(path: Option<&Path>) -> Result<Self, CiError> {
        let Some(path) = path else {
            tracing::warn!("CI_COURSES_FILE not set -- no courses registered");
            return Ok(Self::default());
        };
        match std::fs::read_to_string(path) {
            Ok(json) => {
                let registry = Self::from_json(&json)?;
                tracing::info!(path = %path.display(), courses = registry.len(), "Loaded course registry");
                Ok(registry)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Course registry not found -- no courses registered");
                Ok(Self::default())
            }
            Err(e) => Err(CiError::Config(format!(
                "cannot read course registry {}: {e}",
                path.display()
            ))),
        }
    }

    pub fn course(&self, name: &str) -> Option<&Course> {
        self.courses.get(name)
    }

    pub fn len(&self) -> usize {
        self.courses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.courses.is_empty()
    }
}
