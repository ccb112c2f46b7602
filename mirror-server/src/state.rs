use std::time::{Instant, SystemTime, UNIX_EPOCH};

use mirror_config::Config;
use mirror_ratelimit::RateLimiter;
use mirror_ttlcache::TtlCache;

#[derive(Clone)]
pub struct CachedResponse {
    pub status: u16,
    pub content_type: String,
    pub body: bytes::Bytes,
}

/// Everything a request handler needs, owned by a single `Arc` and handed
/// out through axum's `State` extractor.
pub struct AppState {
    pub config: Config,
    pub rate_limiter: RateLimiter,
    pub registry: mirror_registry::Client,
    pub ghproxy: mirror_ghproxy::Client,
    pub hub_http: reqwest::Client,
    pub search_cache: TtlCache<String, CachedResponse>,
    pub start_time: Instant,
    pub start_time_unix: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("building registry client: {0}")]
    Registry(#[from] mirror_registry::Error),
    #[error("building GitHub proxy client: {0}")]
    GhProxy(#[from] mirror_ghproxy::Error),
    #[error("building Hub API client: {0}")]
    Hub(#[from] reqwest::Error),
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, StartupError> {
        let rate_limiter = RateLimiter::new(
            config.rate_limit.request_limit,
            config.rate_limit.period_hours,
            config.security.allow.clone(),
            config.security.deny.clone(),
        );
        let registry = mirror_registry::Client::new(500, config.token_cache.default_ttl)?;
        let ghproxy = mirror_ghproxy::Client::new()?;
        let hub_http = reqwest::Client::builder().https_only(true).build()?;

        let start_time_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Ok(Self {
            config,
            rate_limiter,
            registry,
            ghproxy,
            hub_http,
            search_cache: TtlCache::new(1000, std::time::Duration::from_secs(30 * 60)),
            start_time: Instant::now(),
            start_time_unix,
        })
    }
}
