//! Process-wide shared state: one `Arc` per registry/coordinator, cloned
//! cheaply into every request handler the way an `engine`
//! threads a single `Arc<ExecutionState>` through its worker tasks.

use std::sync::Arc;

use tyger_config::ServerConfig;
use tyger_logstore::LogArchive;
use tyger_registry::{BufferRegistry, CodespecRegistry};
use tyger_runs::RunCoordinator;
use tyger_runstate::RunWatchHub;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub buffers: Arc<BufferRegistry>,
    pub codespecs: Arc<CodespecRegistry>,
    pub runs: Arc<RunCoordinator>,
    pub watch_hub: Arc<RunWatchHub>,
    pub log_archive: Arc<LogArchive>,
}
