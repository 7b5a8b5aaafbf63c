//! Shared fixtures: a daemon on the host sandbox with in-memory storage.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use autograder_ci::models::build::BuildResult;
use autograder_ci::models::build_step::PipelineStep;
use autograder_ci::models::trigger::{BuildRequest, TriggerKind};
use autograder_ci::sandbox::{ContainerBackend, ExecSlot, HostBackend};
use autograder_ci::store::{EntityStore, MemoryStorage, Storage};
use autograder_ci::{Daemon, DaemonSettings};

pub const TOKEN: &str = "tok-123";
pub const SECRET: &str = "sec-456";

pub struct Harness {
    pub dir: TempDir,
    pub storage: Arc<MemoryStorage>,
    pub daemon: Arc<Daemon>,
}

impl Harness {
    pub fn new(timeout: Duration) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let backend: Arc<dyn ContainerBackend> = Arc::new(HostBackend::new(dir.path()));
        Self::with_backend(dir, backend, timeout)
    }

    pub fn with_backend(dir: TempDir, backend: Arc<dyn ContainerBackend>, timeout: Duration) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        Self::with_storage(dir, backend, storage.clone(), storage, timeout)
    }

    pub fn with_storage(
        dir: TempDir,
        backend: Arc<dyn ContainerBackend>,
        memory: Arc<MemoryStorage>,
        storage: Arc<dyn Storage>,
        timeout: Duration,
    ) -> Self {
        let settings = DaemonSettings {
            command_timeout: timeout,
            git_host: "127.0.0.1:1".to_string(),
            ..DaemonSettings::default()
        };
        let store = Arc::new(EntityStore::new(storage));
        let daemon = Arc::new(Daemon::new(backend, ExecSlot::new(1), store, settings));
        Self {
            dir,
            storage: memory,
            daemon,
        }
    }

    pub async fn result(&self, id: i64) -> BuildResult {
        self.daemon.store().build(id).await.unwrap().unwrap()
    }
}

pub fn request(user: &str, group: i64, trigger: TriggerKind) -> BuildRequest {
    BuildRequest {
        org: "cs101".to_string(),
        user: user.to_string(),
        group,
        repo: format!("{user}-labs"),
        base_folder: "work/".to_string(),
        lab_folder: "lab1".to_string(),
        lab_number: 1,
        admin_token: TOKEN.to_string(),
        dest_folder: "labs".to_string(),
        secret: SECRET.to_string(),
        trigger,
    }
}

pub fn step(name: &'static str, command: &str, breakable: bool) -> PipelineStep {
    PipelineStep::new(name, command, breakable)
}
