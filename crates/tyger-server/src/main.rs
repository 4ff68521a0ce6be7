//! The `tyger-server` binary: load config, hydrate the registries from
//! disk, spawn the background sweepers, and serve the control-plane API.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tyger_config::ServerConfig;
use tyger_logstore::LogArchive;
use tyger_registry::{BufferRecord, BufferRegistry, CodespecHistory, CodespecRegistry};
use tyger_runs::RunCoordinator;
use tyger_runstate::RunWatchHub;
use tyger_server::{build_router, AppState};
use tyger_store::FileRegistryStore;
use tyger_sweep::{NoopStorageDeleter, Sweepers};

#[derive(Parser, Debug)]
#[command(name = "tyger-server", version, about = "Tyger control-plane server")]
struct Cli {
    /// Directory to search for `.tyger-server.toml`, defaulting to the
    /// current directory.
    #[arg(long, default_value = ".")]
    config_dir: String,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = ServerConfig::load(Path::new(&cli.config_dir)).context("loading server config")?;

    std::fs::create_dir_all(&config.state_dir)
        .with_context(|| format!("creating state dir {}", config.state_dir.display()))?;

    let buffers_store: Arc<dyn tyger_store::Durable<BufferRecord>> =
        Arc::new(FileRegistryStore::new(config.state_dir.join("buffers")));
    let codespecs_store: Arc<dyn tyger_store::Durable<CodespecHistory>> =
        Arc::new(FileRegistryStore::new(config.state_dir.join("codespecs")));

    let buffers = Arc::new(
        BufferRegistry::load(buffers_store)
            .await
            .context("loading persisted buffers")?,
    );
    let codespecs = Arc::new(
        CodespecRegistry::load(codespecs_store)
            .await
            .context("loading persisted codespecs")?,
    );
    let watch_hub = Arc::new(RunWatchHub::new());
    let log_archive = Arc::new(LogArchive::new(config.state_dir.join("logs")));

    // No real compute backend is wired in yet (an Open Question this
    // repo resolves by shipping a working control plane whose dispatch
    // seam any scheduler can implement; see DESIGN.md).
    let backend: Arc<dyn tyger_runs::BackendHandle> = Arc::new(tyger_runs::test_support::FakeBackend::new());
    let runs = Arc::new(RunCoordinator::new(
        None,
        buffers.clone(),
        codespecs.clone(),
        watch_hub.clone(),
        log_archive.clone(),
        backend,
    ));

    let storage_deleter: Arc<dyn tyger_sweep::BufferStorageDeleter> = Arc::new(NoopStorageDeleter);
    let sweepers = Sweepers::spawn(
        buffers.clone(),
        storage_deleter,
        runs.clone(),
        std::time::Duration::from_secs(config.sweep.interval_secs),
        config.dataplane.dop,
    );

    let state = AppState {
        config: Arc::new(config.clone()),
        buffers,
        codespecs,
        runs,
        watch_hub,
        log_archive,
    };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_address)
        .await
        .with_context(|| format!("binding {}", config.listen_address))?;
    tracing::info!(address = %config.listen_address, "tyger-server listening");

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    };
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await.context("server error")?;

    sweepers.shutdown();
    Ok(())
}
