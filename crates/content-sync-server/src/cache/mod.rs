//! Server-side response cache with per-resource TTLs and coarse invalidation.

mod clock;
mod middleware;

pub use clock::{Clock, ManualClock, SystemClock};
pub use middleware::{response_cache, CACHE_STATUS_HEADER};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::http::{HeaderValue, StatusCode};
use chrono::{DateTime, Utc};
use content_sync_core::{path_has_prefix, ResourceType};
use dashmap::DashMap;
use moka::future::Cache;
use moka::Expiry;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

/// TTL per resource type and overall capacity.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub article_ttl: Duration,
    pub event_ttl: Duration,
    pub recording_ttl: Duration,
    pub max_entries: u64,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            article_ttl: Duration::from_secs(1800),
            event_ttl: Duration::from_secs(300),
            recording_ttl: Duration::from_secs(3600),
            max_entries: 10_000,
        }
    }
}

impl CachePolicy {
    pub fn ttl_for(&self, resource: ResourceType) -> Duration {
        match resource {
            ResourceType::Article => self.article_ttl,
            ResourceType::Event => self.event_ttl,
            ResourceType::Recording => self.recording_ttl,
        }
    }
}

/// A stored successful response.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
    pub etag: String,
    pub stored_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    ttl: Duration,
}

/// Lets moka evict each entry once its own TTL has passed.
struct PerEntryTtl;

impl Expiry<String, CachedResponse> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedResponse,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedResponse,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Permission to fill the cache for one resource, taken before the handler runs.
///
/// A fill whose resource was invalidated after the ticket was issued is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillTicket {
    resource: ResourceType,
    generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: u64,
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
}

/// Response cache keyed by `"{METHOD} {path}[?query]"`.
///
/// Freshness is judged against the injected [`Clock`]; an entry is served
/// while `now < expires_at`. There is no stampede protection: concurrent
/// misses on one key all reach the handler. Each resource carries a
/// generation bumped by every invalidation touching it, so a response
/// rendered before a write is never stored after that write's purge.
pub struct ResponseCache {
    entries: Cache<String, CachedResponse>,
    generations: DashMap<ResourceType, u64>,
    policy: CachePolicy,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl ResponseCache {
    pub fn new(policy: CachePolicy) -> Self {
        Self::with_clock(policy, Arc::new(SystemClock))
    }

    pub fn with_clock(policy: CachePolicy, clock: Arc<dyn Clock>) -> Self {
        let entries = Cache::builder()
            .max_capacity(policy.max_entries)
            .expire_after(PerEntryTtl)
            .build();

        Self {
            entries,
            generations: DashMap::new(),
            policy,
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Cache key of a request target.
    pub fn key(method: &str, path_and_query: &str) -> String {
        format!("{} {}", method, path_and_query)
    }

    /// Fresh entry for `key`, counting a hit or a miss.
    pub async fn lookup(&self, key: &str) -> Option<CachedResponse> {
        match self.entries.get(key).await {
            Some(entry) if self.clock.now() < entry.expires_at => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            Some(_) => {
                self.entries.invalidate(key).await;
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Ticket for a fill of `resource`, valid until its next invalidation.
    pub fn ticket(&self, resource: ResourceType) -> FillTicket {
        FillTicket {
            resource,
            generation: self.generation(resource),
        }
    }

    fn generation(&self, resource: ResourceType) -> u64 {
        self.generations
            .get(&resource)
            .map(|g| *g.value())
            .unwrap_or(0)
    }

    fn bump(&self, resource: ResourceType) {
        *self.generations.entry(resource).or_insert(0) += 1;
    }

    /// Store a response body under `key` with the resource's TTL.
    ///
    /// Returns `None` without keeping anything when the resource was
    /// invalidated since `ticket` was taken.
    pub async fn store(
        &self,
        key: String,
        ticket: FillTicket,
        status: StatusCode,
        content_type: Option<HeaderValue>,
        body: Bytes,
    ) -> Option<CachedResponse> {
        if self.generation(ticket.resource) != ticket.generation {
            debug!("Skipping fill of {}: {} changed", key, ticket.resource);
            return None;
        }

        let ttl = self.policy.ttl_for(ticket.resource);
        let stored_at = self.clock.now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|delta| stored_at.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let entry = CachedResponse {
            status,
            content_type,
            etag: etag_for(&body),
            body,
            stored_at,
            expires_at,
            ttl,
        };
        self.entries.insert(key.clone(), entry.clone()).await;

        // An invalidation may have started between the check and the insert
        if self.generation(ticket.resource) != ticket.generation {
            self.entries.invalidate(&key).await;
            return None;
        }

        debug!("Caching {} until {}", key, expires_at);
        Some(entry)
    }

    /// Remove every entry whose path lies under `prefix`. Returns the count.
    ///
    /// Matching is per path segment, so `/articles` does not cover `/articles-old`.
    pub async fn purge_prefix(&self, prefix: &str) -> u64 {
        for resource in ResourceType::ALL {
            let root = resource.route_prefix();
            if path_has_prefix(root, prefix) || path_has_prefix(prefix, root) {
                self.bump(resource);
            }
        }

        let doomed: Vec<String> = self
            .entries
            .iter()
            .filter(|(key, _)| key_under_prefix(key, prefix))
            .map(|(key, _)| key.to_string())
            .collect();

        for key in &doomed {
            self.entries.invalidate(key).await;
        }

        let purged = doomed.len() as u64;
        self.invalidations.fetch_add(purged, Ordering::Relaxed);
        if purged > 0 {
            debug!("Purged {} cached responses under {}", purged, prefix);
        }
        purged
    }

    /// Purge everything cached for a resource type.
    pub async fn invalidate_resource(&self, resource: ResourceType) -> u64 {
        self.purge_prefix(resource.route_prefix()).await
    }

    /// Drop all entries and reset the counters.
    pub async fn clear(&self) {
        for resource in ResourceType::ALL {
            self.bump(resource);
        }
        self.entries.invalidate_all();
        self.entries.run_pending_tasks().await;
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.invalidations.store(0, Ordering::Relaxed);
    }

    pub async fn stats(&self) -> CacheStats {
        self.entries.run_pending_tasks().await;
        let now = self.clock.now();
        let entries = self
            .entries
            .iter()
            .filter(|(_, entry)| now < entry.expires_at)
            .count() as u64;

        CacheStats {
            entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

fn key_under_prefix(key: &str, prefix: &str) -> bool {
    key.split_once(' ')
        .map(|(_, target)| path_has_prefix(target, prefix))
        .unwrap_or(false)
}

/// Strong ETag of a body.
fn etag_for(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    format!("\"{}\"", hex::encode(hasher.finalize()))
}
