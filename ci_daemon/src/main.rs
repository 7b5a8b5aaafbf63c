//! Autograder CI server.
//!
//! Receives repository pushes and manual triggers, builds the submitted
//! lab inside a disposable container, and records a scored result for the
//! student or group that owns the repository.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tower_http::trace::TraceLayer;

use autograder_ci::config::{CiConfig, CourseRegistry, SandboxKind};
use autograder_ci::routes::{self, CiRouterState};
use autograder_ci::sandbox::{ContainerBackend, DockerBackend, ExecSlot, HostBackend};
use autograder_ci::store::{EntityStore, MemoryStorage, PgStorage, Storage};
use autograder_ci::{metrics, Daemon, DaemonSettings};

#[derive(Parser)]
#[command(name = "autograder-ci", about = "Autograder CI build daemon")]
struct Cli {
    /// Server port
    #[arg(short, long, env = "CI_PORT", default_value = "9090")]
    port: u16,

    /// PostgreSQL connection URL. Results are kept in memory when unset.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP daemon (default).
    Serve,
    /// Open an interactive shell in a fresh sandbox, for debugging images.
    Shell,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    }

    let cli = Cli::parse();
    let config = CiConfig::from_env();

    let backend: Arc<dyn ContainerBackend> = match config.sandbox {
        SandboxKind::Docker => Arc::new(DockerBackend::new(config.docker_bin.clone())),
        SandboxKind::Host => {
            tracing::warn!("Host sandbox selected -- build commands run without isolation");
            Arc::new(HostBackend::new(std::env::temp_dir().join("autograder-ci")))
        }
    };
    let slot = if config.max_concurrent == 1 {
        ExecSlot::global()
    } else {
        ExecSlot::new(config.max_concurrent)
    };

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(cli.port, cli.database_url, config, backend, slot).await,
        Command::Shell => shell(config, backend, slot).await,
    }
}

async fn serve(
    port: u16,
    database_url: Option<String>,
    config: CiConfig,
    backend: Arc<dyn ContainerBackend>,
    slot: ExecSlot,
) -> anyhow::Result<()> {
    tracing::info!("Starting Autograder CI daemon...");

    let storage: Arc<dyn Storage> = match database_url {
        Some(url) => Arc::new(PgStorage::connect(&url, 5).await?),
        None => {
            tracing::warn!("DATABASE_URL not set -- build results are kept in memory only");
            Arc::new(MemoryStorage::new())
        }
    };
    tracing::info!(storage = storage.backend_name(), sandbox = backend.backend_name(), "Backends ready");

    let courses = CourseRegistry::load(config.courses_file.as_deref().map(Path::new))?;

    let settings = DaemonSettings {
        image: config.sandbox_image.clone(),
        command_timeout: config.command_timeout,
        test_repo: config.test_repo.clone(),
        git_host: config.git_host.clone(),
    };
    let store = Arc::new(EntityStore::new(storage));
    let daemon = Arc::new(Daemon::new(backend, slot, store, settings));

    let state = CiRouterState {
        daemon,
        courses: Arc::new(courses),
        config,
    };
    let app = routes::ci_router(state).layer(TraceLayer::new_for_http());

    // Initialize metrics
    metrics::init_metrics();

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Autograder CI daemon listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shell(config: CiConfig, backend: Arc<dyn ContainerBackend>, slot: ExecSlot) -> anyhow::Result<()> {
    let mut runtime =
        autograder_ci::sandbox::SandboxRuntime::new(backend, slot, config.command_timeout);
    runtime.create(&config.sandbox_image).await?;
    tracing::info!(container = runtime.container_id().unwrap_or_default(), "Attached to sandbox");

    let status = runtime
        .attach(tokio::io::stdin(), tokio::io::stdout(), tokio::io::stderr())
        .await;
    runtime.destroy().await?;

    let status = status?;
    tracing::info!(%status, "Sandbox shell exited");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
