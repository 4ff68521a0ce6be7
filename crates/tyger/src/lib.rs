//! # Tyger
//!
//! Facade crate over the tyger workspace's micro-crates: a compute-
//! orchestration control plane (buffers, codespecs, runs) with a
//! streaming data plane for buffer content.
//!
//! ## Modules
//!
//! - [`core`] — domain types and the `TygerError` error model (always available)
//! - [`duration`] — serde helpers for `Duration` (seconds/millis, string-or-number)
//! - [`retry`] — retry policies and the async retry executor
//! - [`dataplane`] *(feature `dataplane`)* — access URLs, the block codec, and the streaming writer/reader
//! - [`store`] *(feature `store`)* — `RecordStore`/`Durable` persistence primitives
//! - [`runstate`] *(feature `runstate`)* — the buffer/run status state machines
//! - [`logstore`] *(feature `logstore`)* — per-run log archive
//! - [`logmerge`] *(feature `logmerge`)* — multi-source log merging
//! - [`registry`] *(feature `registry`)* — buffer and codespec registries
//! - [`runs`] *(feature `runs`)* — the run coordinator and compute-backend seam
//! - [`config`] *(feature `config`)* — server and client configuration loading
//! - [`client`] *(feature `client`)* — the async control-plane HTTP client
//!
//! `full` enables every optional module; a consumer that only needs the
//! domain types and retry policy (e.g. a custom backend adapter) can
//! depend on this crate with default features only.

/// Domain types (`Buffer`, `Codespec`, `Run`, ...) and the `TygerError` model.
pub use tyger_core as core;

/// Serde helpers for `Duration` (seconds/millis, string-or-number).
pub use tyger_duration as duration;

/// Retry policies and the async retry executor.
pub use tyger_retry as retry;

/// Access URLs, the block codec, and the streaming writer/reader.
#[cfg(feature = "dataplane")]
pub use tyger_dataplane as dataplane;

/// `RecordStore`/`Durable` persistence primitives.
#[cfg(feature = "store")]
pub use tyger_store as store;

/// The buffer and run status state machines.
#[cfg(feature = "runstate")]
pub use tyger_runstate as runstate;

/// Per-run log archive.
#[cfg(feature = "logstore")]
pub use tyger_logstore as logstore;

/// Multi-source log merging.
#[cfg(feature = "logmerge")]
pub use tyger_logmerge as logmerge;

/// Buffer and codespec registries.
#[cfg(feature = "registry")]
pub use tyger_registry as registry;

/// The run coordinator and compute-backend seam.
#[cfg(feature = "runs")]
pub use tyger_runs as runs;

/// Server and client configuration loading.
#[cfg(feature = "config")]
pub use tyger_config as config;

/// The async control-plane HTTP client.
#[cfg(feature = "client")]
pub use tyger_client as client;
