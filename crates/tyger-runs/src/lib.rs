//! The run coordinator (C7, §4.7): resolves codespecs and buffer
//! bindings at creation time, dispatches runs to a [`BackendHandle`],
//! tracks the `Pending -> Running -> {Succeeded, Failed}` /
//! `-> Canceling -> Canceled` status machine, and sweeps terminated
//! runs to archive their logs and finalize status once the backend
//! reports they are gone.

mod backend;
mod coordinator;
mod types;

pub use backend::{BackendHandle, BackendPresence};
pub use coordinator::{RunCoordinator, RunRecord};
pub use types::{declared_buffer_names, resolve_codespec, RunCodeTargetSpec, RunCreateSpec};

#[cfg(any(test, feature = "test-support"))]
pub use backend::test_support;
