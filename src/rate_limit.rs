//! Fixed-window rate limiting.
//!
//! A [`RateLimiter`] picks its backend once, at construction: Redis when a
//! distributed counter is supplied and preferred, in-memory otherwise. Every
//! `limit` call still tries Redis first when it is active and falls back to
//! the in-memory windows if the call errors, so a Redis outage degrades to
//! per-instance limits instead of failing requests.
//!
//! Introspection (`get_status`, `reset`, `would_be_rate_limited`) always reads
//! the in-memory windows.

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use moka::future::Cache;
use redis::aio::ConnectionManager;
use regex::Regex;
use serde::Serialize;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

const MEMORY_MAX_KEYS: u64 = 100_000;

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("invalid rate limit window: {0:?}")]
    InvalidWindow(String),
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

fn window_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(\d+)\s*(ms|s|m|h|d)\s*$").expect("window regex is valid")
    })
}

/// Parses `"30 s"`, `"1m"`, `"500 ms"`, `"1 h"`, `"7 d"` into milliseconds.
pub fn parse_window_to_ms(window: &str) -> Result<u64, RateLimitError> {
    let invalid = || RateLimitError::InvalidWindow(window.to_string());
    let caps = window_regex().captures(window).ok_or_else(invalid)?;

    let amount: u64 = caps[1].parse().map_err(|_| invalid())?;
    let unit_ms: u64 = match &caps[2] {
        "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        _ => return Err(invalid()),
    };

    match amount.checked_mul(unit_ms) {
        Some(0) | None => Err(invalid()),
        Some(ms) => Ok(ms),
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub prefix: String,
    pub limit: u32,
    pub window_ms: u64,
    pub prefer_redis: bool,
}

impl RateLimitConfig {
    pub fn new(prefix: &str, limit: u32, window: &str) -> Result<Self, RateLimitError> {
        Ok(Self::from_millis(prefix, limit, parse_window_to_ms(window)?))
    }

    pub fn from_millis(prefix: &str, limit: u32, window_ms: u64) -> Self {
        Self {
            prefix: prefix.to_string(),
            limit,
            window_ms: window_ms.max(1),
            prefer_redis: true,
        }
    }

    pub fn prefer_redis(mut self, prefer: bool) -> Self {
        self.prefer_redis = prefer;
        self
    }

    /// General dashboard API traffic: 100 requests per minute.
    pub fn api() -> Self {
        Self::from_millis("ratelimit:api", 100, 60_000)
    }

    /// DNS verification attempts: 5 per hour.
    pub fn domain_verification() -> Self {
        Self::from_millis("ratelimit:domain-verify", 5, 3_600_000)
    }

    /// Billing mutations: 10 per minute.
    pub fn billing() -> Self {
        Self::from_millis("ratelimit:billing", 10, 60_000)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Redis,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitResult {
    pub success: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Unix epoch milliseconds at which the current window closes.
    pub reset_ms: i64,
    pub backend: Backend,
}

impl RateLimitResult {
    pub fn retry_after_secs(&self, now_ms: i64) -> u64 {
        let ms = (self.reset_ms - now_ms).max(0) as u64;
        ms.div_ceil(1_000).max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatus {
    pub limit: u32,
    pub remaining: u32,
    pub reset_ms: i64,
    pub blocked: bool,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Shared counter store (Redis in production).
#[async_trait]
pub trait DistributedCounter: Send + Sync {
    /// Increments `key`, arming a `window_ms` expiry on first hit. Returns the new count.
    async fn increment(&self, key: &str, window_ms: u64) -> Result<u64, RateLimitError>;
}

#[derive(Clone)]
pub struct RedisCounter {
    conn: ConnectionManager,
}

impl RedisCounter {
    pub async fn connect(redis_url: &str) -> Result<Self, RateLimitError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl DistributedCounter for RedisCounter {
    async fn increment(&self, key: &str, window_ms: u64) -> Result<u64, RateLimitError> {
        let mut conn = self.conn.clone();
        let (count, ttl): (u64, i64) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .pttl(key)
            .query_async(&mut conn)
            .await?;

        if ttl < 0 {
            let _: () = redis::cmd("PEXPIRE")
                .arg(key)
                .arg(window_ms)
                .query_async(&mut conn)
                .await?;
        }
        Ok(count)
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    reset_at_ms: i64,
}

/// Process-local fixed windows. Entries expire from the cache one window
/// after they are created.
#[derive(Clone)]
pub struct MemoryRateLimiter {
    limit: u32,
    window_ms: u64,
    windows: Cache<String, Arc<Mutex<Window>>>,
}

impl MemoryRateLimiter {
    pub fn new(limit: u32, window_ms: u64) -> Self {
        Self {
            limit,
            window_ms,
            windows: Cache::builder()
                .time_to_live(Duration::from_millis(window_ms))
                .max_capacity(MEMORY_MAX_KEYS)
                .build(),
        }
    }

    pub async fn limit(&self, key: &str) -> RateLimitResult {
        let now = now_ms();
        let window_ms = self.window_ms as i64;
        let slot = self
            .windows
            .get_with(key.to_string(), async move {
                Arc::new(Mutex::new(Window {
                    count: 0,
                    reset_at_ms: now + window_ms,
                }))
            })
            .await;

        let mut window = slot.lock().unwrap_or_else(|e| e.into_inner());
        if now >= window.reset_at_ms {
            window.count = 0;
            window.reset_at_ms = now + window_ms;
        }

        let success = window.count < self.limit;
        if success {
            window.count += 1;
        }

        RateLimitResult {
            success,
            limit: self.limit,
            remaining: self.limit.saturating_sub(window.count),
            reset_ms: window.reset_at_ms,
            backend: Backend::Memory,
        }
    }

    pub async fn get_status(&self, key: &str) -> RateLimitStatus {
        let now = now_ms();
        let current = match self.windows.get(key).await {
            Some(slot) => {
                let window = *slot.lock().unwrap_or_else(|e| e.into_inner());
                (now < window.reset_at_ms).then_some(window)
            }
            None => None,
        };

        match current {
            Some(window) => {
                let remaining = self.limit.saturating_sub(window.count);
                RateLimitStatus {
                    limit: self.limit,
                    remaining,
                    reset_ms: window.reset_at_ms,
                    blocked: remaining == 0,
                }
            }
            None => RateLimitStatus {
                limit: self.limit,
                remaining: self.limit,
                reset_ms: now + self.window_ms as i64,
                blocked: self.limit == 0,
            },
        }
    }

    pub async fn reset(&self, key: &str) {
        self.windows.invalidate(key).await;
    }
}

pub struct RateLimiter {
    config: RateLimitConfig,
    backend: Backend,
    redis: Option<Arc<dyn DistributedCounter>>,
    memory: MemoryRateLimiter,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, redis: Option<Arc<dyn DistributedCounter>>) -> Self {
        let redis = redis.filter(|_| config.prefer_redis);
        let backend = if redis.is_some() {
            Backend::Redis
        } else {
            Backend::Memory
        };
        tracing::debug!("Rate limiter '{}' using {:?} backend", config.prefix, backend);

        Self {
            memory: MemoryRateLimiter::new(config.limit, config.window_ms),
            config,
            backend,
            redis,
        }
    }

    pub fn memory_only(config: RateLimitConfig) -> Self {
        Self::new(config, None)
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn key(&self, identifier: &str) -> String {
        format!("{}:{}", self.config.prefix, identifier)
    }

    /// Consumes one request for `identifier`.
    pub async fn limit(&self, identifier: &str) -> RateLimitResult {
        let key = self.key(identifier);

        if let Some(ref redis) = self.redis {
            match self.limit_redis(redis.as_ref(), &key).await {
                Ok(result) => return result,
                Err(e) => {
                    tracing::warn!(
                        "Redis rate limit failed for '{}', falling back to memory: {}",
                        self.config.prefix,
                        e
                    );
                }
            }
        }

        self.memory.limit(&key).await
    }

    async fn limit_redis(
        &self,
        redis: &dyn DistributedCounter,
        key: &str,
    ) -> Result<RateLimitResult, RateLimitError> {
        let window_ms = self.config.window_ms as i64;
        let window_index = now_ms() / window_ms;
        let window_key = format!("{}:{}", key, window_index);

        let count = redis.increment(&window_key, self.config.window_ms).await?;
        let limit = self.config.limit;

        Ok(RateLimitResult {
            success: count <= u64::from(limit),
            limit,
            remaining: u64::from(limit).saturating_sub(count) as u32,
            reset_ms: (window_index + 1) * window_ms,
            backend: Backend::Redis,
        })
    }

    pub async fn get_status(&self, identifier: &str) -> RateLimitStatus {
        self.memory.get_status(&self.key(identifier)).await
    }

    pub async fn reset(&self, identifier: &str) {
        self.memory.reset(&self.key(identifier)).await
    }

    /// True when the next request from `identifier` would be denied. Does not consume.
    pub async fn would_be_rate_limited(&self, identifier: &str) -> bool {
        self.get_status(identifier).await.blocked
    }
}

/// Standard `X-RateLimit-*` response headers. Reset is in epoch seconds.
pub fn rate_limit_headers(result: &RateLimitResult) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let pairs = [
        ("x-ratelimit-limit", result.limit.to_string()),
        ("x-ratelimit-remaining", result.remaining.to_string()),
        ("x-ratelimit-reset", (result.reset_ms / 1_000).to_string()),
    ];
    for (name, value) in pairs {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
    headers
}
