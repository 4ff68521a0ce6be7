//! The `api-version` query parameter every request (other than
//! `/metadata` and `/healthcheck`) must carry, per §4.9. An unsupported
//! or missing version is rejected before the handler runs, the same
//! seam `/metadata` advertises `supported_api_versions` to let a client
//! discover a value that will be accepted.

use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;
use tyger_core::TygerError;

#[derive(Deserialize)]
struct ApiVersionQuery {
    #[serde(rename = "api-version")]
    api_version: Option<String>,
}

/// Extracted and validated `api-version`. Handlers that need it simply
/// take this as an argument; axum runs the check before the body is
/// even read.
pub struct ApiVersion(pub String);

impl FromRequestParts<AppState> for ApiVersion {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Query(q) = Query::<ApiVersionQuery>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError(TygerError::InvalidArgument(e.to_string())))?;
        let version = q.api_version.ok_or_else(|| {
            ApiError(TygerError::UnsupportedApiVersion {
                supported: state.config.supported_api_versions.clone(),
            })
        })?;
        if !state.config.supported_api_versions.iter().any(|v| v == &version) {
            return Err(ApiError(TygerError::UnsupportedApiVersion {
                supported: state.config.supported_api_versions.clone(),
            }));
        }
        Ok(ApiVersion(version))
    }
}
