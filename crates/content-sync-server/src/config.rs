use std::time::Duration;

use clap::Parser;

use crate::cache::CachePolicy;

/// Configuration for the content-sync-server.
#[derive(Parser, Debug, Clone)]
#[command(name = "content-sync-server")]
#[command(about = "Authoritative content service with a TTL response cache")]
pub struct Config {
    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0", env = "CONTENT_SYNC_HOST")]
    pub host: String,

    /// Port to bind to
    #[arg(long, default_value = "8080", env = "CONTENT_SYNC_PORT")]
    pub port: u16,

    /// Cached article responses TTL in seconds
    #[arg(long, default_value = "1800", env = "ARTICLE_CACHE_TTL_SECS")]
    pub article_cache_ttl_secs: u64,

    /// Cached event responses TTL in seconds
    #[arg(long, default_value = "300", env = "EVENT_CACHE_TTL_SECS")]
    pub event_cache_ttl_secs: u64,

    /// Cached recording responses TTL in seconds
    #[arg(long, default_value = "3600", env = "RECORDING_CACHE_TTL_SECS")]
    pub recording_cache_ttl_secs: u64,

    /// Maximum number of cached responses
    #[arg(long, default_value = "10000", env = "CACHE_MAX_ENTRIES")]
    pub cache_max_entries: u64,
}

impl Config {
    pub fn cache_policy(&self) -> CachePolicy {
        CachePolicy {
            article_ttl: Duration::from_secs(self.article_cache_ttl_secs),
            event_ttl: Duration::from_secs(self.event_cache_ttl_secs),
            recording_ttl: Duration::from_secs(self.recording_cache_ttl_secs),
            max_entries: self.cache_max_entries,
        }
    }
}
