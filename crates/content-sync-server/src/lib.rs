//! Authoritative content service for content-sync.
//!
//! Serves articles, events and recordings over HTTP in the
//! `{ success, data, message }` envelope and fronts the resource routes
//! with a TTL response cache that is purged per resource on every write.

pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod repository;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use cache::{CachePolicy, CacheStats, Clock, ManualClock, ResponseCache, SystemClock};
pub use config::Config;
pub use error::ApiError;
pub use handlers::AppState;
pub use repository::ContentRepository;

impl AppState {
    pub fn new(policy: CachePolicy) -> Self {
        Self::with_cache(ResponseCache::new(policy))
    }

    pub fn with_cache(cache: ResponseCache) -> Self {
        Self {
            repository: Arc::new(ContentRepository::new()),
            cache: Arc::new(cache),
        }
    }
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/admin/cache/stats", get(handlers::cache_stats_handler))
        .route("/admin/cache/purge", post(handlers::cache_purge_handler))
        .route("/admin/cache/clear", post(handlers::cache_clear_handler))
        .route(
            "/{resource}",
            get(handlers::list_handler).post(handlers::create_handler),
        )
        .route(
            "/{resource}/{id}",
            get(handlers::get_handler)
                .put(handlers::update_handler)
                .delete(handlers::delete_handler),
        )
        .layer(middleware::from_fn_with_state(
            state.cache.clone(),
            cache::response_cache,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use content_sync_client::{
        AccessConfig, ChangePropagationBus, DataAccessLayer, DataSource, HttpRemoteStore,
        SyncError,
    };
    use content_sync_core::{
        ApiEnvelope, ApplicationErrorKind, ArticleFields, ContentDraft, ContentPayload,
        ContentRecord, ContentStatus, ListFilter, RemoteError, ResourceType,
    };
    use content_sync_local::MemoryFallbackStore;
    use reqwest::header::{ETAG, IF_NONE_MATCH};
    use reqwest::StatusCode;
    use serde_json::json;

    use crate::cache::CACHE_STATUS_HEADER;

    async fn spawn(state: AppState) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn manual_state() -> (AppState, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = ResponseCache::with_clock(CachePolicy::default(), clock.clone());
        (AppState::with_cache(cache), clock)
    }

    fn article_draft(title: &str) -> ContentDraft {
        ContentDraft::new(
            ContentStatus::Published,
            ContentPayload::Article(ArticleFields {
                title: title.to_string(),
                slug: "spring-newsletter".to_string(),
                summary: None,
                body: "What happened this season".to_string(),
                author: None,
                tags: Vec::new(),
            }),
        )
    }

    fn cache_status(response: &reqwest::Response) -> String {
        response
            .headers()
            .get(CACHE_STATUS_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }

    #[tokio::test]
    async fn test_write_invalidates_cached_list() {
        let (state, clock) = manual_state();
        let base = spawn(state).await;
        let client = reqwest::Client::new();
        let seconds = chrono::Duration::seconds;

        // t=0: empty list is fetched and cached
        let first = client.get(format!("{}/articles", base)).send().await.unwrap();
        assert_eq!(cache_status(&first), "MISS");
        let envelope: ApiEnvelope<Vec<ContentRecord>> = first.json().await.unwrap();
        assert_eq!(envelope.data.unwrap().len(), 0);

        // t=10: a new article is published
        clock.advance(seconds(10));
        let created = client
            .post(format!("{}/articles", base))
            .json(&article_draft("Spring newsletter"))
            .send()
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);

        // t=11: its list entry was purged, so the article shows up
        clock.advance(seconds(1));
        let second = client.get(format!("{}/articles", base)).send().await.unwrap();
        assert_eq!(cache_status(&second), "MISS");
        let second_body = second.text().await.unwrap();
        let envelope: ApiEnvelope<Vec<ContentRecord>> =
            serde_json::from_str(&second_body).unwrap();
        let records = envelope.data.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload.title(), "Spring newsletter");

        // t=12: served from the cache, byte for byte
        clock.advance(seconds(1));
        let third = client.get(format!("{}/articles", base)).send().await.unwrap();
        assert_eq!(cache_status(&third), "HIT");
        assert_eq!(third.text().await.unwrap(), second_body);
    }

    #[tokio::test]
    async fn test_cached_list_expires_after_ttl() {
        let (state, clock) = manual_state();
        let base = spawn(state).await;
        let client = reqwest::Client::new();

        client.get(format!("{}/events", base)).send().await.unwrap();
        clock.advance(chrono::Duration::seconds(299));
        let fresh = client.get(format!("{}/events", base)).send().await.unwrap();
        assert_eq!(cache_status(&fresh), "HIT");

        clock.advance(chrono::Duration::seconds(1));
        let expired = client.get(format!("{}/events", base)).send().await.unwrap();
        assert_eq!(cache_status(&expired), "MISS");
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let (state, _clock) = manual_state();
        let cache = state.cache.clone();
        let base = spawn(state).await;
        let client = reqwest::Client::new();

        for _ in 0..2 {
            let response = client
                .get(format!("{}/articles/99", base))
                .send()
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
            assert_eq!(cache_status(&response), "MISS");
            let envelope: ApiEnvelope<serde_json::Value> = response.json().await.unwrap();
            assert!(!envelope.success);
            assert!(envelope.message.unwrap().contains("not found"));
        }
        assert_eq!(cache.stats().await.entries, 0);
    }

    #[tokio::test]
    async fn test_write_leaves_other_resources_cached() {
        let (state, _clock) = manual_state();
        let base = spawn(state).await;
        let client = reqwest::Client::new();

        client.get(format!("{}/events", base)).send().await.unwrap();
        client
            .post(format!("{}/articles", base))
            .json(&article_draft("Board minutes"))
            .send()
            .await
            .unwrap();

        let events = client.get(format!("{}/events", base)).send().await.unwrap();
        assert_eq!(cache_status(&events), "HIT");
    }

    #[tokio::test]
    async fn test_rejected_write_keeps_cache() {
        let (state, _clock) = manual_state();
        let base = spawn(state).await;
        let client = reqwest::Client::new();

        client.get(format!("{}/articles", base)).send().await.unwrap();
        let mut draft = article_draft("Untitled");
        if let ContentPayload::Article(fields) = &mut draft.payload {
            fields.title = String::new();
        }
        let rejected = client
            .post(format!("{}/articles", base))
            .json(&draft)
            .send()
            .await
            .unwrap();
        assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);

        let list = client.get(format!("{}/articles", base)).send().await.unwrap();
        assert_eq!(cache_status(&list), "HIT");
    }

    #[tokio::test]
    async fn test_admin_stats_and_purge() {
        let (state, _clock) = manual_state();
        let base = spawn(state).await;
        let client = reqwest::Client::new();

        client
            .post(format!("{}/articles", base))
            .json(&article_draft("Annual report"))
            .send()
            .await
            .unwrap();
        for target in ["/articles", "/articles/1", "/events"] {
            client.get(format!("{}{}", base, target)).send().await.unwrap();
        }
        client.get(format!("{}/events", base)).send().await.unwrap();

        let purge: ApiEnvelope<handlers::PurgeResponse> = client
            .post(format!("{}/admin/cache/purge", base))
            .json(&json!({ "prefix": "/articles" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(purge.data.unwrap().purged, 2);

        let stats: ApiEnvelope<serde_json::Value> = client
            .get(format!("{}/admin/cache/stats", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(
            stats.data.unwrap(),
            json!({ "entries": 1, "hits": 1, "misses": 3, "invalidations": 2 })
        );

        let bad = client
            .post(format!("{}/admin/cache/purge", base))
            .json(&json!({ "prefix": "articles" }))
            .send()
            .await
            .unwrap();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

        let cleared: ApiEnvelope<serde_json::Value> = client
            .post(format!("{}/admin/cache/clear", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(cleared.data.unwrap()["entries"], 0);
    }

    #[tokio::test]
    async fn test_bad_requests_use_envelope() {
        let (state, _clock) = manual_state();
        let base = spawn(state).await;
        let client = reqwest::Client::new();

        let unknown = client.get(format!("{}/widgets", base)).send().await.unwrap();
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
        let envelope: ApiEnvelope<serde_json::Value> = unknown.json().await.unwrap();
        assert!(!envelope.success);

        let malformed = client
            .post(format!("{}/articles", base))
            .header("content-type", "application/json")
            .body("{ not json")
            .send()
            .await
            .unwrap();
        assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
        let envelope: ApiEnvelope<serde_json::Value> = malformed.json().await.unwrap();
        assert!(!envelope.success);

        let mismatched = client
            .post(format!("{}/events", base))
            .json(&article_draft("Wrong shelf"))
            .send()
            .await
            .unwrap();
        assert_eq!(mismatched.status(), StatusCode::BAD_REQUEST);

        let health = client.get(format!("{}/health", base)).send().await.unwrap();
        assert_eq!(health.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_status_filter_is_part_of_cache_key() {
        let (state, _clock) = manual_state();
        let base = spawn(state).await;
        let client = reqwest::Client::new();

        let mut draft = article_draft("Work in progress");
        draft.status = ContentStatus::Draft;
        client
            .post(format!("{}/articles", base))
            .json(&draft)
            .send()
            .await
            .unwrap();

        let all: ApiEnvelope<Vec<ContentRecord>> = client
            .get(format!("{}/articles", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(all.data.unwrap().len(), 1);

        let published = client
            .get(format!("{}/articles?status=published", base))
            .send()
            .await
            .unwrap();
        assert_eq!(cache_status(&published), "MISS");
        let envelope: ApiEnvelope<Vec<ContentRecord>> = published.json().await.unwrap();
        assert!(envelope.data.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_if_none_match_returns_not_modified() {
        let (state, _clock) = manual_state();
        let base = spawn(state).await;
        let client = reqwest::Client::new();

        let first = client.get(format!("{}/recordings", base)).send().await.unwrap();
        let etag = first.headers().get(ETAG).unwrap().clone();

        let revalidated = client
            .get(format!("{}/recordings", base))
            .header(IF_NONE_MATCH, etag.clone())
            .send()
            .await
            .unwrap();
        assert_eq!(revalidated.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(revalidated.headers().get(ETAG), Some(&etag));

        let stale = client
            .get(format!("{}/recordings", base))
            .header(IF_NONE_MATCH, "\"something-else\"")
            .send()
            .await
            .unwrap();
        assert_eq!(stale.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_concurrent_creates_get_unique_ids() {
        let base = spawn(AppState::new(CachePolicy::default())).await;
        let client = reqwest::Client::new();

        let requests = (0..16).map(|i| {
            let client = client.clone();
            let url = format!("{}/articles", base);
            async move {
                let envelope: ApiEnvelope<ContentRecord> = client
                    .post(url)
                    .json(&article_draft(&format!("Issue {}", i)))
                    .send()
                    .await
                    .unwrap()
                    .json()
                    .await
                    .unwrap();
                envelope.data.unwrap().id
            }
        });
        let mut ids = futures::future::join_all(requests).await;
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 16);
    }

    #[tokio::test]
    async fn test_data_access_layer_against_server() {
        let base = spawn(AppState::new(CachePolicy::default())).await;
        let fallback = Arc::new(MemoryFallbackStore::new());
        let layer = DataAccessLayer::new(
            Arc::new(HttpRemoteStore::new(base)),
            fallback.clone(),
            Arc::new(ChangePropagationBus::new()),
            AccessConfig::default(),
        );

        let before = layer
            .read_all(ResourceType::Article, &ListFilter::default())
            .await
            .unwrap();
        assert!(before.value.is_empty());

        let created = layer
            .create(ResourceType::Article, &article_draft("Volunteer day"))
            .await
            .unwrap();
        assert_eq!(created.source, DataSource::Remote);
        assert!(!created.value.is_provisional());

        let listed = layer
            .read_all(ResourceType::Article, &ListFilter::default())
            .await
            .unwrap();
        assert_eq!(listed.value.len(), 1);

        let fetched = layer
            .read_one(ResourceType::Article, &created.value.id)
            .await
            .unwrap();
        assert_eq!(fetched.source, DataSource::Remote);
        assert_eq!(fetched.value, Some(created.value.clone()));
        let saves = fallback.save_count();

        match layer
            .update(ResourceType::Article, "999", &article_draft("Ghost"))
            .await
        {
            Err(SyncError::Remote(RemoteError::Application(e))) => {
                assert_eq!(e.kind(), ApplicationErrorKind::NotFound)
            }
            other => panic!("expected a not-found rejection, got {:?}", other),
        }
        assert_eq!(fallback.save_count(), saves);
        assert!(layer.divergences().is_empty());
    }
}
