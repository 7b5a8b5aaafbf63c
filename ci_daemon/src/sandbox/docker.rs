//! Docker backend: drives the container CLI, which talks to the daemon over
//! its local control socket.

use async_trait::async_trait;
use tokio::process::Command;

use super::ContainerBackend;
use crate::error::CiError;

pub struct DockerBackend {
    cli: String,
}

impl DockerBackend {
    /// `cli` is the container CLI binary (e.g. `"docker"`).
    pub fn new(cli: impl Into<String>) -> Self {
        Self { cli: cli.into() }
    }

    async fn run(&self, args: &[&str]) -> Result<String, String> {
        let output = Command::new(&self.cli)
            .args(args)
            .output()
            .await
            .map_err(|e| format!("failed to run {}: {e}", self.cli))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
        }
    }
}

impl Default for DockerBackend {
    fn default() -> Self {
        Self::new("docker")
    }
}

#[async_trait]
impl ContainerBackend for DockerBackend {
    fn backend_name(&self) -> &'static str {
        "docker"
    }

    async fn create(&self, image: &str) -> Result<String, CiError> {
        let id = self
            .run(&["create", "--interactive", image, "/bin/bash"])
            .await
            .map_err(|e| CiError::Provision(format!("docker create {image}: {e}")))?;

        if id.is_empty() {
            return Err(CiError::Provision(format!(
                "docker create {image} returned no container id"
            )));
        }
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), CiError> {
        self.run(&["start", id])
            .await
            .map(|_| ())
            .map_err(|e| CiError::Provision(format!("docker start {id}: {e}")))
    }

    fn exec_command(&self, id: &str, command: &str) -> Command {
        let mut cmd = Command::new(&self.cli);
        cmd.args(["exec", id, "/bin/sh", "-c", command]);
        cmd
    }

    fn attach_command(&self, id: &str) -> Command {
        let mut cmd = Command::new(&self.cli);
        cmd.args(["attach", id]);
        cmd
    }

    async fn kill(&self, id: &str) -> Result<(), CiError> {
        self.run(&["kill", id])
            .await
            .map(|_| ())
            .map_err(|e| CiError::Fault(format!("docker kill {id}: {e}")))
    }

    async fn remove(&self, id: &str) -> Result<(), CiError> {
        self.run(&["rm", "--force", "--volumes", id])
            .await
            .map(|_| ())
            .map_err(|e| CiError::Fault(format!("docker rm {id}: {e}")))
    }
}
