//! Codespec endpoints (§4.6/§6.1): `put` dedupes by content hash and
//! reports 200 for an unchanged version, 201 for a newly appended one.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use tyger_core::{Codespec, Page};
use tyger_registry::PutOutcome;

use crate::api_version::ApiVersion;
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn put(
    _v: ApiVersion,
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(mut spec): Json<Codespec>,
) -> ApiResult<Response> {
    spec.name = name;
    let (spec, outcome) = state.codespecs.put(spec).await?;
    let status = match outcome {
        PutOutcome::CreatedNew => StatusCode::CREATED,
        PutOutcome::ReturnedExisting => StatusCode::OK,
    };
    Ok((status, Json(spec)).into_response())
}

pub async fn get_latest(
    _v: ApiVersion,
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Codespec>> {
    Ok(Json(state.codespecs.get_latest(&name).await?))
}

pub async fn get_version(
    _v: ApiVersion,
    State(state): State<AppState>,
    Path((name, version)): Path<(String, u64)>,
) -> ApiResult<Json<Codespec>> {
    Ok(Json(state.codespecs.get_version(&name, version).await?))
}

#[derive(Deserialize)]
pub struct ListCodespecsQuery {
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub cursor: Option<String>,
}

fn default_limit() -> usize {
    100
}

pub async fn list(
    _v: ApiVersion,
    State(state): State<AppState>,
    Query(q): Query<ListCodespecsQuery>,
) -> ApiResult<Json<Page<Codespec>>> {
    let page = state.codespecs.list(q.prefix.as_deref(), q.limit, q.cursor.as_deref()).await?;
    Ok(Json(page))
}
