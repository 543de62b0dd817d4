//! HTTP handlers for the content service.
//!
//! Implements:
//! - GET/POST /{resource} - List and create records
//! - GET/PUT/DELETE /{resource}/{id} - Read, replace and delete one record
//! - GET /admin/cache/stats, POST /admin/cache/purge, POST /admin/cache/clear
//! - GET /health - Health check endpoint

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use content_sync_core::{ApiEnvelope, ContentDraft, ContentRecord, ListFilter, ResourceType};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::{CacheStats, ResponseCache};
use crate::error::{ApiError, Result};
use crate::repository::ContentRepository;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<ContentRepository>,
    pub cache: Arc<ResponseCache>,
}

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: &'static str,
}

/// GET /health - Health check endpoint.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Resolve a route segment such as `articles`. Only the canonical plural is
/// accepted so every cached path stays under its resource's purge prefix.
fn resource_from_segment(segment: &str) -> Result<ResourceType> {
    ResourceType::ALL
        .into_iter()
        .find(|r| r.route_prefix().trim_start_matches('/') == segment)
        .ok_or_else(|| ApiError::UnknownResource(segment.to_string()))
}

fn draft_from(
    body: std::result::Result<Json<ContentDraft>, JsonRejection>,
) -> Result<ContentDraft> {
    body.map(|Json(draft)| draft)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

/// GET /{resource}
pub async fn list_handler(
    State(state): State<AppState>,
    Path(segment): Path<String>,
    query: std::result::Result<Query<ListFilter>, QueryRejection>,
) -> Result<Json<ApiEnvelope<Vec<ContentRecord>>>> {
    let resource = resource_from_segment(&segment)?;
    let Query(filter) = query.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    Ok(Json(ApiEnvelope::ok(state.repository.list(resource, &filter))))
}

/// GET /{resource}/{id}
pub async fn get_handler(
    State(state): State<AppState>,
    Path((segment, id)): Path<(String, String)>,
) -> Result<Json<ApiEnvelope<ContentRecord>>> {
    let resource = resource_from_segment(&segment)?;
    Ok(Json(ApiEnvelope::ok(state.repository.get(resource, &id)?)))
}

/// POST /{resource}
pub async fn create_handler(
    State(state): State<AppState>,
    Path(segment): Path<String>,
    body: std::result::Result<Json<ContentDraft>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiEnvelope<ContentRecord>>)> {
    let resource = resource_from_segment(&segment)?;
    let record = state.repository.create(resource, draft_from(body)?)?;
    Ok((StatusCode::CREATED, Json(ApiEnvelope::ok(record))))
}

/// PUT /{resource}/{id}
pub async fn update_handler(
    State(state): State<AppState>,
    Path((segment, id)): Path<(String, String)>,
    body: std::result::Result<Json<ContentDraft>, JsonRejection>,
) -> Result<Json<ApiEnvelope<ContentRecord>>> {
    let resource = resource_from_segment(&segment)?;
    let record = state.repository.update(resource, &id, draft_from(body)?)?;
    Ok(Json(ApiEnvelope::ok(record)))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeletedResponse {
    pub id: String,
}

/// DELETE /{resource}/{id}
pub async fn delete_handler(
    State(state): State<AppState>,
    Path((segment, id)): Path<(String, String)>,
) -> Result<Json<ApiEnvelope<DeletedResponse>>> {
    let resource = resource_from_segment(&segment)?;
    state.repository.delete(resource, &id)?;
    Ok(Json(ApiEnvelope::ok(DeletedResponse { id })))
}

/// GET /admin/cache/stats
pub async fn cache_stats_handler(
    State(state): State<AppState>,
) -> Json<ApiEnvelope<CacheStats>> {
    Json(ApiEnvelope::ok(state.cache.stats().await))
}

#[derive(Debug, Deserialize)]
pub struct PurgeRequest {
    pub prefix: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PurgeResponse {
    pub prefix: String,
    pub purged: u64,
}

/// POST /admin/cache/purge
pub async fn cache_purge_handler(
    State(state): State<AppState>,
    body: std::result::Result<Json<PurgeRequest>, JsonRejection>,
) -> Result<Json<ApiEnvelope<PurgeResponse>>> {
    let Json(request) = body.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    if !request.prefix.starts_with('/') {
        return Err(ApiError::BadRequest("prefix must start with '/'".to_string()));
    }

    let purged = state.cache.purge_prefix(&request.prefix).await;
    info!("Admin purge of {} removed {} cached responses", request.prefix, purged);
    Ok(Json(ApiEnvelope::ok(PurgeResponse {
        prefix: request.prefix,
        purged,
    })))
}

/// POST /admin/cache/clear
pub async fn cache_clear_handler(
    State(state): State<AppState>,
) -> Json<ApiEnvelope<CacheStats>> {
    state.cache.clear().await;
    info!("Admin cleared the response cache");
    Json(ApiEnvelope::ok(state.cache.stats().await))
}
