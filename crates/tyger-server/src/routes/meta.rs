//! `/metadata` and `/healthcheck` (§4.9): the only two endpoints that are
//! both anonymous and version-agnostic, so a client can discover
//! `supportedApiVersions` before it ever has to guess one.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct Metadata {
    #[serde(rename = "supportedApiVersions")]
    supported_api_versions: Vec<String>,
}

pub async fn metadata(State(state): State<AppState>) -> Json<Metadata> {
    Json(Metadata { supported_api_versions: state.config.supported_api_versions.clone() })
}

pub async fn healthcheck() -> &'static str {
    "OK"
}
