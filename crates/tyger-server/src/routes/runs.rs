//! Run endpoints (§4.7/§6.1): create/get/list/cancel, log retrieval, a
//! long-poll watch, and the admin `_sweep` trigger.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use tyger_core::{Page, Run, RunStatus, TygerError};
use tyger_registry::TagFilters;
use tyger_runs::RunCreateSpec;

use crate::api_version::ApiVersion;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub async fn create(
    _v: ApiVersion,
    State(state): State<AppState>,
    Json(spec): Json<RunCreateSpec>,
) -> ApiResult<Response> {
    let run = state.runs.create(spec, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(run)).into_response())
}

#[derive(Deserialize)]
pub struct GetRunQuery {
    #[serde(default)]
    pub watch: bool,
}

/// How long one long-poll request may wait for a status change before
/// returning the current snapshot anyway, so a client's HTTP timeout
/// never races a server-side hang.
const WATCH_TIMEOUT: Duration = Duration::from_secs(55);

pub async fn get(
    _v: ApiVersion,
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(q): Query<GetRunQuery>,
) -> ApiResult<Json<Run>> {
    if !q.watch {
        return Ok(Json(state.runs.get(id).await?));
    }

    let current = state.runs.get(id).await?;
    if current.status.is_terminal() {
        return Ok(Json(current));
    }
    let Some(mut rx) = state.watch_hub.subscribe(id).await else {
        return Ok(Json(current));
    };
    match tokio::time::timeout(WATCH_TIMEOUT, tyger_runstate::next_snapshot(&mut rx)).await {
        Ok(Ok(snapshot)) => Ok(Json(snapshot)),
        _ => Ok(Json(current)),
    }
}

#[derive(Deserialize)]
pub struct ListRunsQuery {
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(rename = "exclude-tag", default)]
    pub exclude_tag: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub cursor: Option<String>,
}

fn default_limit() -> usize {
    100
}

fn parse_tag_pairs(raw: &str) -> std::collections::BTreeMap<String, String> {
    raw.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn parse_status(s: &str) -> Result<RunStatus, ApiError> {
    match s {
        "Pending" => Ok(RunStatus::Pending),
        "Running" => Ok(RunStatus::Running),
        "Succeeded" => Ok(RunStatus::Succeeded),
        "Failed" => Ok(RunStatus::Failed),
        "Canceling" => Ok(RunStatus::Canceling),
        "Canceled" => Ok(RunStatus::Canceled),
        other => Err(ApiError(TygerError::InvalidArgument(format!("unknown run status {other}")))),
    }
}

pub async fn list(
    _v: ApiVersion,
    State(state): State<AppState>,
    Query(q): Query<ListRunsQuery>,
) -> ApiResult<Json<Page<Run>>> {
    let filters = TagFilters {
        include: q.tag.as_deref().map(parse_tag_pairs).unwrap_or_default(),
        exclude: q.exclude_tag.as_deref().map(parse_tag_pairs).unwrap_or_default(),
    };
    let statuses = q.status.as_deref().map(|s| parse_status(s)).transpose()?.map(|s| vec![s]);
    let page = state
        .runs
        .list(q.since, &filters, statuses.as_deref(), q.limit, q.cursor.as_deref())
        .await?;
    Ok(Json(page))
}

pub async fn cancel(
    _v: ApiVersion,
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<Json<Run>> {
    Ok(Json(state.runs.cancel(id, Utc::now()).await?))
}

#[derive(Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(rename = "tailLines", default)]
    pub tail_lines: Option<usize>,
    #[serde(default)]
    pub timestamps: bool,
    /// Accepted for API compatibility; this endpoint always returns the
    /// archive as it stands rather than holding the connection open for
    /// new lines (no streaming transport is wired to a live backend).
    #[serde(default)]
    pub follow: bool,
}

/// Archived log lines are the only source this endpoint serves from: a
/// live, still-running backend's stdout is merged and tailed by
/// `tyger-logmerge` only up to the point where the sweep archives it
/// (§4.7 "Sweep"). Reading a non-terminal run's logs before that
/// point returns whatever has been archived so far, which may be
/// nothing.
pub async fn logs(
    _v: ApiVersion,
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(q): Query<LogsQuery>,
) -> ApiResult<String> {
    let _ = state.runs.get(id).await?;
    let _ = q.follow;
    let lines = state
        .log_archive
        .read(id, q.since, q.tail_lines)
        .map_err(|e| TygerError::Backend(e.to_string()))?;
    let body: String = lines
        .iter()
        .map(|l| {
            if q.timestamps {
                tyger_logmerge::render_line(l.timestamp, &l.line)
            } else {
                format!("{}\n", l.line)
            }
        })
        .collect();
    Ok(body)
}

pub async fn sweep(_v: ApiVersion, State(state): State<AppState>) -> ApiResult<StatusCode> {
    state.runs.sweep(Utc::now()).await?;
    Ok(StatusCode::NO_CONTENT)
}
