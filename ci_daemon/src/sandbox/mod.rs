//! Sandbox runtime: disposable containers that build commands run inside.
//!
//! A [`ContainerBackend`] knows how to create, start, and remove containers
//! and how to build the subprocess that runs a command inside one.
//! [`SandboxRuntime`] owns at most one container at a time and adds the
//! execution slot, stream plumbing, and timeout handling on top.

pub mod docker;
pub mod host;

use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};

use crate::error::CiError;

pub use docker::DockerBackend;
pub use host::HostBackend;

/// Default per-command time budget.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// How long to keep collecting buffered output after a timeout kill.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Trait for container implementations (docker, plain host directories).
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Human-readable backend name (e.g. "docker", "host").
    fn backend_name(&self) -> &'static str;

    /// Provision a container from `image` and return its id.
    async fn create(&self, image: &str) -> Result<String, CiError>;

    /// Start the container. Starting a running container is not an error.
    async fn start(&self, id: &str) -> Result<(), CiError>;

    /// Subprocess that runs `command` through a shell inside the container.
    fn exec_command(&self, id: &str, command: &str) -> Command;

    /// Subprocess connected to the container's interactive shell.
    fn attach_command(&self, id: &str) -> Command;

    async fn kill(&self, id: &str) -> Result<(), CiError>;

    /// Force-remove the container together with its volumes.
    async fn remove(&self, id: &str) -> Result<(), CiError>;
}

static GLOBAL_SLOT: LazyLock<ExecSlot> = LazyLock::new(|| ExecSlot::new(1));

/// Gate around command execution. With one permit, at most one sandbox
/// subprocess runs at a time no matter how many builds are in flight.
#[derive(Clone)]
pub struct ExecSlot {
    permits: Arc<Semaphore>,
}

impl ExecSlot {
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(permits.max(1))),
        }
    }

    /// The process-wide single slot.
    pub fn global() -> Self {
        GLOBAL_SLOT.clone()
    }

    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, CiError> {
        self.permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CiError::Fault("execution slot closed".to_string()))
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

/// Handle to at most one live container.
pub struct SandboxRuntime {
    backend: Arc<dyn ContainerBackend>,
    slot: ExecSlot,
    timeout: Duration,
    container: Option<String>,
}

impl SandboxRuntime {
    pub fn new(backend: Arc<dyn ContainerBackend>, slot: ExecSlot, timeout: Duration) -> Self {
        Self {
            backend,
            slot,
            timeout,
            container: None,
        }
    }

    pub fn container_id(&self) -> Option<&str> {
        self.container.as_deref()
    }

    /// Provision a fresh container, replacing any container this handle owns.
    pub async fn create(&mut self, image: &str) -> Result<(), CiError> {
        if self.container.is_some() {
            if let Err(e) = self.destroy().await {
                tracing::warn!("Failed to remove previous container: {e}");
            }
        }

        let id = self.backend.create(image).await?;
        tracing::debug!(
            backend = self.backend.backend_name(),
            container = %id,
            image,
            "Container created"
        );
        self.container = Some(id);
        Ok(())
    }

    /// Force-remove the container. A handle without a container is a no-op.
    ///
    /// The handle forgets the container even when removal fails.
    pub async fn destroy(&mut self) -> Result<(), CiError> {
        let Some(id) = self.container.take() else {
            return Ok(());
        };
        self.backend.remove(&id).await?;
        tracing::debug!(container = %id, "Container removed");
        Ok(())
    }

    /// Run `command` inside the container, feeding each output line (stdout
    /// and stderr, in arrival order) to `on_line`.
    ///
    /// Holds the execution slot from container start until the subprocess
    /// has exited. On timeout the subprocess group is killed and reaped, the
    /// container's processes are killed, and lines captured before the kill
    /// are still delivered.
    pub async fn run_command<F>(
        &self,
        command: &str,
        stdin: Option<Vec<u8>>,
        mut on_line: F,
    ) -> Result<ExitStatus, CiError>
    where
        F: FnMut(String) + Send,
    {
        let id = self.container.as_deref().ok_or(CiError::NotReady)?;
        let _permit = self.slot.acquire().await?;

        self.backend.start(id).await?;

        let mut cmd = self.backend.exec_command(id, command);
        cmd.stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| CiError::step("exec", format!("Failed to execute command: {e}")))?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            tokio::spawn(async move {
                let _ = pipe.write_all(&input).await;
                let _ = pipe.shutdown().await;
            });
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(out) = child.stdout.take() {
            forward_lines(out, tx.clone());
        }
        if let Some(err) = child.stderr.take() {
            forward_lines(err, tx.clone());
        }
        drop(tx);

        let waited = tokio::time::timeout(self.timeout, async {
            while let Some(line) = rx.recv().await {
                on_line(line);
            }
            child.wait().await
        })
        .await;

        match waited {
            Ok(Ok(status)) => Ok(status),
            Ok(Err(e)) => Err(CiError::step(
                "exec",
                format!("Failed to wait for command: {e}"),
            )),
            Err(_) => {
                terminate(&mut child).await;
                if let Err(e) = self.backend.kill(id).await {
                    tracing::warn!(container = %id, "Failed to kill container processes: {e}");
                }
                let _ = tokio::time::timeout(DRAIN_GRACE, async {
                    while let Some(line) = rx.recv().await {
                        on_line(line);
                    }
                })
                .await;
                tracing::warn!(
                    container = %id,
                    timeout_secs = self.timeout.as_secs(),
                    "Command killed on timeout"
                );
                crate::metrics::command_timed_out();
                Err(CiError::Timeout(self.timeout))
            }
        }
    }

    /// Connect the given streams to the container's shell until it exits.
    pub async fn attach<I, O, E>(
        &self,
        mut stdin: I,
        mut stdout: O,
        mut stderr: E,
    ) -> Result<ExitStatus, CiError>
    where
        I: AsyncRead + Unpin + Send + 'static,
        O: AsyncWrite + Unpin + Send + 'static,
        E: AsyncWrite + Unpin + Send + 'static,
    {
        let id = self.container.as_deref().ok_or(CiError::NotReady)?;
        let _permit = self.slot.acquire().await?;

        self.backend.start(id).await?;

        let mut child = self
            .backend
            .attach_command(id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CiError::step("attach", e))?;

        let mut child_in = child.stdin.take().ok_or(CiError::NotReady)?;
        let mut child_out = child.stdout.take().ok_or(CiError::NotReady)?;
        let mut child_err = child.stderr.take().ok_or(CiError::NotReady)?;

        let feed = tokio::spawn(async move {
            let _ = tokio::io::copy(&mut stdin, &mut child_in).await;
            let _ = child_in.shutdown().await;
        });
        let out = tokio::spawn(async move {
            let _ = tokio::io::copy(&mut child_out, &mut stdout).await;
            let _ = stdout.flush().await;
        });
        let err = tokio::spawn(async move {
            let _ = tokio::io::copy(&mut child_err, &mut stderr).await;
            let _ = stderr.flush().await;
        });

        let status = child
            .wait()
            .await
            .map_err(|e| CiError::step("attach", e))?;

        feed.abort();
        let _ = out.await;
        let _ = err.await;
        Ok(status)
    }
}

impl Drop for SandboxRuntime {
    fn drop(&mut self) {
        // Last-resort cleanup for runs that unwound before `destroy`.
        let Some(id) = self.container.take() else {
            return;
        };
        let backend = self.backend.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = backend.remove(&id).await {
                        tracing::error!(container = %id, "Container cleanup failed: {e}");
                    }
                });
            }
            Err(_) => tracing::error!(container = %id, "Container leaked: no runtime for cleanup"),
        }
    }
}

fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r', '\0']).to_string();
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

/// Kill the subprocess and everything it spawned, then reap it.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: plain syscall; the group was created for this child, and a
        // group that already exited only yields ESRCH.
        unsafe {
            libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
        }
    }
    let _ = child.kill().await;
    let _ = child.wait().await;
}
