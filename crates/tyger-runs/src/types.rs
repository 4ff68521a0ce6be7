//! Inputs to [`crate::coordinator::RunCoordinator::create`] and the
//! resolution helpers §4.7 "Creation" describes: codespec reference
//! lookup and buffer-parameter binding validation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use tyger_core::{BufferParameter, Codespec, CodespecRef, CodespecVariant, RunKind, TygerError};
use tyger_registry::CodespecRegistry;

/// The client-submitted shape of one side (job or worker) of a run,
/// before buffer auto-allocation has resolved `_`/`""` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCodeTargetSpec {
    pub codespec: CodespecRef,
    #[serde(default)]
    pub buffers: BTreeMap<String, BufferParameter>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default, with = "tyger_duration::millis")]
    pub buffer_ttl: std::time::Duration,
    pub node_pool: Option<String>,
    pub replicas: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCreateSpec {
    #[serde(default = "default_run_kind")]
    pub kind: RunKind,
    pub job: RunCodeTargetSpec,
    pub worker: Option<RunCodeTargetSpec>,
    pub cluster: Option<String>,
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default, with = "tyger_duration::millis")]
    pub buffer_access_ttl: std::time::Duration,
}

fn default_run_kind() -> RunKind {
    RunKind::User
}

/// Resolve a [`CodespecRef`] to a concrete [`Codespec`]: a named
/// reference is looked up in the registry (pinned version or latest);
/// an inline spec is validated but never persisted (§4.7 step 1).
pub async fn resolve_codespec(
    reference: &CodespecRef,
    registry: &CodespecRegistry,
) -> Result<Codespec, TygerError> {
    match reference {
        CodespecRef::Named { name, version: Some(v) } => registry.get_version(name, *v).await,
        CodespecRef::Named { name, version: None } => registry.get_latest(name).await,
        CodespecRef::Inline(spec) => {
            tyger_core::validate_codespec_name(&spec.name)?;
            if spec.image.trim().is_empty() {
                return Err(TygerError::InvalidArgument("codespec image must not be empty".to_string()));
            }
            Ok((**spec).clone())
        }
    }
}

/// The codespec's declared input/output buffer parameter names, if it
/// is a `Job` codespec (a `Worker` codespec declares endpoints instead
/// and has no buffer parameters to bind).
pub fn declared_buffer_names(codespec: &Codespec) -> Vec<String> {
    match &codespec.variant {
        CodespecVariant::Job { buffers, .. } => {
            buffers.inputs.iter().chain(buffers.outputs.iter()).cloned().collect()
        }
        CodespecVariant::Worker { .. } => Vec::new(),
    }
}
