//! Host backend: each "container" is a scratch directory on the host and
//! commands run through `/bin/sh` inside it. No isolation; meant for
//! development machines and tests.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use super::ContainerBackend;
use crate::error::CiError;

pub struct HostBackend {
    root: PathBuf,
}

impl HostBackend {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl ContainerBackend for HostBackend {
    fn backend_name(&self) -> &'static str {
        "host"
    }

    async fn create(&self, image: &str) -> Result<String, CiError> {
        let dir = self.root.join(format!("sandbox-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| CiError::Provision(format!("{}: {e}", dir.display())))?;
        tracing::debug!(image, dir = %dir.display(), "Host sandbox ignores image");
        Ok(dir.to_string_lossy().into_owned())
    }

    async fn start(&self, id: &str) -> Result<(), CiError> {
        match tokio::fs::metadata(id).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            _ => Err(CiError::NotReady),
        }
    }

    fn exec_command(&self, id: &str, command: &str) -> Command {
        let mut cmd = Command::new("/bin/sh");
        cmd.args(["-c", command]).current_dir(id);
        cmd
    }

    fn attach_command(&self, id: &str) -> Command {
        let mut cmd = Command::new("/bin/sh");
        cmd.current_dir(id);
        cmd
    }

    async fn kill(&self, _id: &str) -> Result<(), CiError> {
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), CiError> {
        match tokio::fs::remove_dir_all(id).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CiError::Fault(format!("remove {id}: {e}"))),
        }
    }
}
