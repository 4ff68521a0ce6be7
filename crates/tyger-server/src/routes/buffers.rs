//! Buffer endpoints (§4.5/§6.1): create/get/list/tag-set/ttl-update,
//! access-URL issuance, and delete/restore/purge by id, filter, or all.

use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use tyger_core::{AccessUrl, Buffer, Page};
use tyger_registry::{BufferPatch, TagFilters};

use crate::api_version::ApiVersion;
use crate::error::ApiResult;
use crate::state::AppState;

fn if_match(headers: &HeaderMap) -> Option<String> {
    headers.get("If-Match").and_then(|v| v.to_str().ok()).map(|s| s.to_string())
}

#[derive(Deserialize)]
pub struct CreateBufferRequest {
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default, with = "tyger_duration::millis::option")]
    pub ttl: Option<std::time::Duration>,
}

pub async fn create(
    _v: ApiVersion,
    State(state): State<AppState>,
    Json(req): Json<CreateBufferRequest>,
) -> ApiResult<Json<Buffer>> {
    let buffer = state.buffers.create(req.tags, None, req.ttl, Utc::now()).await?;
    Ok(Json(buffer))
}

#[derive(Deserialize)]
pub struct GetBufferQuery {
    #[serde(rename = "soft-deleted", default)]
    pub soft_deleted: bool,
}

pub async fn get(
    _v: ApiVersion,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<GetBufferQuery>,
) -> ApiResult<Json<Buffer>> {
    let buffer = state.buffers.get(&id, q.soft_deleted).await?;
    Ok(Json(buffer))
}

fn parse_tag_pairs(raw: &str) -> BTreeMap<String, String> {
    raw.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[derive(Deserialize)]
pub struct ListBuffersQuery {
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(rename = "exclude-tag", default)]
    pub exclude_tag: Option<String>,
    #[serde(rename = "soft-deleted", default)]
    pub soft_deleted: bool,
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
    Query(q): Query<ListBuffersQuery>,
) -> ApiResult<Json<Page<Buffer>>> {
    let filters = TagFilters {
        include: q.tag.as_deref().map(parse_tag_pairs).unwrap_or_default(),
        exclude: q.exclude_tag.as_deref().map(parse_tag_pairs).unwrap_or_default(),
    };
    let page = state.buffers.list(&filters, q.soft_deleted, q.limit, q.cursor.as_deref()).await?;
    Ok(Json(page))
}

#[derive(Deserialize)]
pub struct TagPatchRequest {
    #[serde(default)]
    pub set: BTreeMap<String, String>,
    #[serde(default)]
    pub remove: Vec<String>,
    #[serde(default)]
    pub clear: bool,
}

pub async fn set_tags(
    _v: ApiVersion,
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<TagPatchRequest>,
) -> ApiResult<Json<Buffer>> {
    let mut tag_patches = BTreeMap::new();
    for (k, v) in req.set {
        tag_patches.insert(k, Some(v));
    }
    for k in req.remove {
        tag_patches.insert(k, None);
    }
    let patch = BufferPatch { clear_tags: req.clear, tag_patches, ttl: None, allow_soft_deleted: false };
    let buffer = state.buffers.set(&id, patch, if_match(&headers).as_deref(), Utc::now()).await?;
    Ok(Json(buffer))
}

#[derive(Deserialize)]
pub struct UpdateBufferRequest {
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,
    #[serde(default, with = "tyger_duration::millis::option")]
    pub ttl: Option<std::time::Duration>,
}

pub async fn update(
    _v: ApiVersion,
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<UpdateBufferRequest>,
) -> ApiResult<Json<Buffer>> {
    let tag_patches = req
        .tags
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, Some(v)))
        .collect();
    let patch = BufferPatch { clear_tags: false, tag_patches, ttl: req.ttl, allow_soft_deleted: false };
    let buffer = state.buffers.set(&id, patch, if_match(&headers).as_deref(), Utc::now()).await?;
    Ok(Json(buffer))
}

#[derive(Deserialize)]
pub struct AccessQuery {
    #[serde(default)]
    pub writeable: bool,
}

/// Synthesizes an access URL over the buffer's storage location. The
/// location itself (a SAS-capable container URL) is issued by whatever
/// object-storage account backs this deployment — out of this crate's
/// scope per the collaborator boundary `tyger-dataplane`'s
/// `HttpBlockTransport` documents; this endpoint only attaches an
/// expiry and signs it with the server's own content-hash helper.
pub async fn access(
    _v: ApiVersion,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<AccessQuery>,
) -> ApiResult<Json<AccessUrl>> {
    let buffer = state.buffers.get(&id, false).await?;
    let location = buffer
        .location
        .clone()
        .unwrap_or_else(|| format!("file://{}/blobs/{}", state.config.state_dir.display(), id));
    let margin = std::time::Duration::from_secs(state.config.dataplane.access_url_safety_margin_secs.max(0) as u64);
    let expires_at = Utc::now() + chrono::Duration::from_std(margin * 4).unwrap_or_default();

    #[derive(Serialize)]
    struct SigInput<'a> {
        buffer_id: &'a str,
        writeable: bool,
        expires_at: chrono::DateTime<Utc>,
    }
    let sig = tyger_core::sha256_hex_json(&SigInput { buffer_id: &id, writeable: q.writeable, expires_at })?;

    let mode = if q.writeable { "w" } else { "r" };
    let separator = if location.contains('?') { '&' } else { '?' };
    let url = format!("{location}{separator}mode={mode}&exp={}&sig={sig}", expires_at.timestamp());
    Ok(Json(AccessUrl { url, expires_at }))
}

#[derive(Deserialize, Default)]
pub struct BufferSelector {
    #[serde(default)]
    pub ids: Vec<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(rename = "exclude-tag", default)]
    pub exclude_tag: Option<String>,
    #[serde(default)]
    pub all: bool,
}

pub async fn delete_one(
    _v: ApiVersion,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Buffer>> {
    let buffer = state.buffers.delete_one(&id, Utc::now()).await?;
    Ok(Json(buffer))
}

pub async fn delete_bulk(
    _v: ApiVersion,
    State(state): State<AppState>,
    Json(sel): Json<BufferSelector>,
) -> ApiResult<Json<Vec<Buffer>>> {
    let now = Utc::now();
    let result = if sel.all {
        state.buffers.delete_all(now).await?
    } else if !sel.ids.is_empty() {
        state.buffers.delete_ids(&sel.ids, now).await?
    } else {
        let filters = TagFilters {
            include: sel.tag.as_deref().map(parse_tag_pairs).unwrap_or_default(),
            exclude: sel.exclude_tag.as_deref().map(parse_tag_pairs).unwrap_or_default(),
        };
        state.buffers.delete_by_filter(&filters, now).await?
    };
    Ok(Json(result))
}

pub async fn restore_one(
    _v: ApiVersion,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Buffer>> {
    let buffer = state.buffers.restore_one(&id, Utc::now()).await?;
    Ok(Json(buffer))
}

pub async fn restore_bulk(
    _v: ApiVersion,
    State(state): State<AppState>,
    Json(sel): Json<BufferSelector>,
) -> ApiResult<Json<Vec<Buffer>>> {
    let now = Utc::now();
    let result = if sel.all {
        state.buffers.restore_all(now).await?
    } else if !sel.ids.is_empty() {
        state.buffers.restore_ids(&sel.ids, now).await?
    } else {
        let filters = TagFilters {
            include: sel.tag.as_deref().map(parse_tag_pairs).unwrap_or_default(),
            exclude: sel.exclude_tag.as_deref().map(parse_tag_pairs).unwrap_or_default(),
        };
        state.buffers.restore_by_filter(&filters, now).await?
    };
    Ok(Json(result))
}

pub async fn purge_one(
    _v: ApiVersion,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    state.buffers.purge_ids(&[id]).await?;
    Ok(())
}

pub async fn purge_bulk(
    _v: ApiVersion,
    State(state): State<AppState>,
    Json(sel): Json<BufferSelector>,
) -> ApiResult<()> {
    if sel.all {
        state.buffers.purge_all().await?;
    } else if !sel.ids.is_empty() {
        state.buffers.purge_ids(&sel.ids).await?;
    } else {
        let filters = TagFilters {
            include: sel.tag.as_deref().map(parse_tag_pairs).unwrap_or_default(),
            exclude: sel.exclude_tag.as_deref().map(parse_tag_pairs).unwrap_or_default(),
        };
        state.buffers.purge_by_filter(&filters).await?;
    }
    Ok(())
}
