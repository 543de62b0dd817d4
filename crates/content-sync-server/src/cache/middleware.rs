use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_TYPE, ETAG, IF_NONE_MATCH};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use content_sync_core::ResourceType;
use tracing::{debug, warn};

use super::{CachedResponse, ResponseCache};
use crate::error::ApiError;

/// Response header reporting `HIT` or `MISS`.
pub const CACHE_STATUS_HEADER: &str = "x-cache";

/// Largest body the cache will buffer.
const MAX_CACHED_BODY: usize = 8 * 1024 * 1024;

fn is_mutation(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// Cache GETs under resource routes; purge a resource's entries after it changes.
pub async fn response_cache(
    State(cache): State<Arc<ResponseCache>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(resource) = ResourceType::from_path(request.uri().path()) else {
        return next.run(request).await;
    };

    if request.method() == Method::GET {
        return serve_cached(&cache, resource, request, next).await;
    }

    let mutation = is_mutation(request.method());
    let response = next.run(request).await;
    if mutation && response.status().is_success() {
        let purged = cache.invalidate_resource(resource).await;
        debug!("Write to {} invalidated {} cached responses", resource, purged);
    }
    response
}

async fn serve_cached(
    cache: &ResponseCache,
    resource: ResourceType,
    request: Request,
    next: Next,
) -> Response {
    let target = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let key = ResponseCache::key(Method::GET.as_str(), &target);
    let if_none_match = request.headers().get(IF_NONE_MATCH).cloned();

    if let Some(entry) = cache.lookup(&key).await {
        let revalidated = if_none_match
            .as_ref()
            .and_then(|v| v.to_str().ok())
            .is_some_and(|tag| tag == entry.etag);
        if revalidated {
            return not_modified(&entry);
        }
        return hit(&entry);
    }

    let ticket = cache.ticket(resource);
    let response = next.run(request).await;
    if !response.status().is_success() {
        return with_cache_status(response, "MISS");
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_CACHED_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to buffer response for {}: {}", key, e);
            return ApiError::Internal("failed to read response body".to_string()).into_response();
        }
    };

    let content_type = parts.headers.get(CONTENT_TYPE).cloned();
    let stored = cache
        .store(key, ticket, parts.status, content_type, bytes.clone())
        .await;

    if let Some(entry) = &stored {
        set_etag(&mut parts.headers, entry);
    }
    with_cache_status(Response::from_parts(parts, Body::from(bytes)), "MISS")
}

fn hit(entry: &CachedResponse) -> Response {
    let mut response = Response::new(Body::from(entry.body.clone()));
    *response.status_mut() = entry.status;
    if let Some(content_type) = &entry.content_type {
        response
            .headers_mut()
            .insert(CONTENT_TYPE, content_type.clone());
    }
    set_etag(response.headers_mut(), entry);
    with_cache_status(response, "HIT")
}

fn not_modified(entry: &CachedResponse) -> Response {
    let mut response = StatusCode::NOT_MODIFIED.into_response();
    set_etag(response.headers_mut(), entry);
    with_cache_status(response, "HIT")
}

fn set_etag(headers: &mut axum::http::HeaderMap, entry: &CachedResponse) {
    if let Ok(value) = HeaderValue::from_str(&entry.etag) {
        headers.insert(ETAG, value);
    }
}

fn with_cache_status(mut response: Response, status: &'static str) -> Response {
    response.headers_mut().insert(
        HeaderName::from_static(CACHE_STATUS_HEADER),
        HeaderValue::from_static(status),
    );
    response
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    use super::*;
    use crate::cache::CachePolicy;

    /// Articles route whose GET renders a snapshot, then stalls before replying.
    async fn spawn_slow_articles(version: Arc<AtomicU64>) -> String {
        let cache = Arc::new(ResponseCache::new(CachePolicy::default()));
        let reader = version.clone();
        let app = Router::new()
            .route(
                "/articles",
                get(move || {
                    let reader = reader.clone();
                    async move {
                        let snapshot = reader.load(Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(300)).await;
                        Json(json!({ "data": snapshot }))
                    }
                })
                .post(move || {
                    let version = version.clone();
                    async move {
                        let now = version.fetch_add(1, Ordering::SeqCst) + 1;
                        Json(json!({ "data": now }))
                    }
                }),
            )
            .layer(axum::middleware::from_fn_with_state(cache, response_cache));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_read_straddling_write_is_not_cached() {
        let version = Arc::new(AtomicU64::new(0));
        let base = spawn_slow_articles(version.clone()).await;
        let client = reqwest::Client::new();

        let in_flight = {
            let client = client.clone();
            let url = format!("{}/articles", base);
            tokio::spawn(async move {
                let response = client.get(url).send().await.unwrap();
                let status = response
                    .headers()
                    .get(CACHE_STATUS_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                let body: Value = response.json().await.unwrap();
                (status, body)
            })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        let write = client.post(format!("{}/articles", base)).send().await.unwrap();
        assert!(write.status().is_success());

        let (status, body) = in_flight.await.unwrap();
        assert_eq!(status, "MISS");
        assert_eq!(body, json!({ "data": 0 }));

        let after = client.get(format!("{}/articles", base)).send().await.unwrap();
        assert_eq!(
            after.headers().get(CACHE_STATUS_HEADER).unwrap(),
            "MISS"
        );
        let body: Value = after.json().await.unwrap();
        assert_eq!(body, json!({ "data": 1 }));
        assert_eq!(version.load(Ordering::SeqCst), 1);
    }
}
