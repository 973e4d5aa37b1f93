//! Request rate limiting.
//!
//! A [`RateLimiter`] pairs a validated [`RateLimitConfig`] with a
//! [`RateLimitStore`] that keeps the counters. Three algorithms are supported:
//!
//! - **token bucket** (default): `burst` tokens, refilled at `limit / window`
//! - **sliding window**: at most `limit` hits in any trailing `window`
//! - **fixed window**: at most `limit` hits per window starting at the first hit
//!
//! The Redis store shares counters across instances; the in-memory store is
//! per-process and used in tests and local runs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::warn;

use walletd_core::BoxError;

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use in_memory::InMemoryRateLimitStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisRateLimitStore;

pub const DEFAULT_LIMIT: u64 = 20;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
/// Longest accepted window; larger values are clamped.
pub const MAX_WINDOW: Duration = Duration::from_secs(366 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Algorithm {
    #[default]
    TokenBucket,
    SlidingWindow,
    FixedWindow,
}

impl Algorithm {
    /// Permissive parse: anything unrecognised is a token bucket.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "sliding_window" => Algorithm::SlidingWindow,
            "fixed_window" => Algorithm::FixedWindow,
            _ => Algorithm::TokenBucket,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::TokenBucket => "token_bucket",
            Algorithm::SlidingWindow => "sliding_window",
            Algorithm::FixedWindow => "fixed_window",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub algorithm: Algorithm,
    /// Requests allowed per `window`.
    pub limit: u64,
    pub window: Duration,
    /// Token bucket capacity. Zero means "same as `limit`".
    pub burst: u64,
}

impl RateLimitConfig {
    pub fn new(algorithm: Algorithm, limit: u64, window: Duration) -> Self {
        Self {
            algorithm,
            limit,
            window,
            burst: limit,
        }
    }

    pub fn with_burst(mut self, burst: u64) -> Self {
        self.burst = burst;
        self
    }

    /// Window in milliseconds, never above [`MAX_WINDOW`].
    pub fn window_ms(&self) -> i64 {
        i64::try_from(self.window.min(MAX_WINDOW).as_millis()).unwrap_or(i64::MAX)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(Algorithm::TokenBucket, DEFAULT_LIMIT, DEFAULT_WINDOW)
    }
}

/// Outcome of a single rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
    /// Zero when allowed.
    pub retry_after: Duration,
}

impl RateLimitResult {
    /// Whole seconds a denied client should wait; never below one.
    pub fn retry_after_secs(&self) -> u64 {
        self.retry_after.as_secs().max(1)
    }
}

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("invalid rate limit config: {0}")]
    InvalidConfig(&'static str),

    #[error("rate limit key must not be empty")]
    EmptyKey,

    #[error("rate limit store failed during {operation}: {source}")]
    Store {
        operation: &'static str,
        #[source]
        source: BoxError,
    },
}

impl RateLimitError {
    pub fn store(operation: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Store {
            operation,
            source: source.into(),
        }
    }
}

/// Counter storage for rate limiting.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Record one hit for `key` and report whether it is within `config`.
    async fn allow(&self, key: &str, config: &RateLimitConfig) -> Result<RateLimitResult, RateLimitError>;

    /// Forget all state for `key`.
    async fn reset(&self, key: &str) -> Result<(), RateLimitError>;
}

/// Hook invoked with the key and result whenever a request is denied.
pub type OnLimited = Arc<dyn Fn(&str, &RateLimitResult) + Send + Sync>;

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    config: RateLimitConfig,
    on_limited: Option<OnLimited>,
}

impl core::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, mut config: RateLimitConfig) -> Result<Self, RateLimitError> {
        if config.limit == 0 {
            return Err(RateLimitError::InvalidConfig("limit must be greater than 0"));
        }
        if config.window.is_zero() {
            return Err(RateLimitError::InvalidConfig("window must be greater than 0"));
        }
        if config.burst == 0 {
            config.burst = config.limit;
        }
        if config.window > MAX_WINDOW {
            warn!(window_secs = config.window.as_secs(), "rate limit window clamped");
            config.window = MAX_WINDOW;
        }

        Ok(Self {
            store,
            config,
            on_limited: None,
        })
    }

    pub fn with_on_limited(mut self, hook: OnLimited) -> Self {
        self.on_limited = Some(hook);
        self
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub async fn allow(&self, key: &str) -> Result<RateLimitResult, RateLimitError> {
        if key.trim().is_empty() {
            return Err(RateLimitError::EmptyKey);
        }

        let result = self.store.allow(key, &self.config).await?;
        if !result.allowed {
            match &self.on_limited {
                Some(hook) => hook(key, &result),
                None => warn!(key, limit = result.limit, "rate limit exceeded"),
            }
        }
        Ok(result)
    }

    pub async fn reset(&self, key: &str) -> Result<(), RateLimitError> {
        if key.trim().is_empty() {
            return Err(RateLimitError::EmptyKey);
        }
        self.store.reset(key).await
    }
}

/// `<scope>:user:<id>`
pub fn user_key(scope: &str, user_id: &str) -> String {
    format!("{scope}:user:{user_id}")
}

/// `<scope>:ip:<addr>`
pub fn ip_key(scope: &str, addr: &str) -> String {
    format!("{scope}:ip:{addr}")
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn limiter(algorithm: Algorithm, limit: u64) -> RateLimiter {
        let store = Arc::new(InMemoryRateLimitStore::new());
        RateLimiter::new(store, RateLimitConfig::new(algorithm, limit, Duration::from_secs(60))).unwrap()
    }

    #[test]
    fn algorithm_parse_is_permissive() {
        assert_eq!(Algorithm::parse(" Sliding_Window "), Algorithm::SlidingWindow);
        assert_eq!(Algorithm::parse("fixed_window"), Algorithm::FixedWindow);
        assert_eq!(Algorithm::parse("token_bucket"), Algorithm::TokenBucket);
        assert_eq!(Algorithm::parse("leaky"), Algorithm::TokenBucket);
        assert_eq!(Algorithm::parse(""), Algorithm::TokenBucket);
    }

    #[test]
    fn zero_limit_or_window_is_rejected_and_burst_defaults_to_limit() {
        let store: Arc<dyn RateLimitStore> = Arc::new(InMemoryRateLimitStore::new());

        let zero_limit = RateLimitConfig::new(Algorithm::TokenBucket, 0, Duration::from_secs(1));
        assert!(matches!(
            RateLimiter::new(store.clone(), zero_limit),
            Err(RateLimitError::InvalidConfig(_))
        ));

        let zero_window = RateLimitConfig::new(Algorithm::TokenBucket, 5, Duration::ZERO);
        assert!(matches!(
            RateLimiter::new(store.clone(), zero_window),
            Err(RateLimitError::InvalidConfig(_))
        ));

        let cfg = RateLimitConfig::new(Algorithm::TokenBucket, 5, Duration::from_secs(1)).with_burst(0);
        assert_eq!(RateLimiter::new(store, cfg).unwrap().config().burst, 5);
    }

    #[tokio::test]
    async fn oversized_window_is_clamped_and_still_answers() {
        let store: Arc<dyn RateLimitStore> = Arc::new(InMemoryRateLimitStore::new());
        let huge = Duration::from_secs(u64::MAX / 2);

        assert_eq!(
            RateLimitConfig::new(Algorithm::FixedWindow, 1, huge).window_ms(),
            MAX_WINDOW.as_millis() as i64
        );

        for algorithm in [Algorithm::TokenBucket, Algorithm::SlidingWindow, Algorithm::FixedWindow] {
            let limiter = RateLimiter::new(store.clone(), RateLimitConfig::new(algorithm, 1, huge)).unwrap();
            assert_eq!(limiter.config().window, MAX_WINDOW);

            let key = format!("huge:{}", algorithm.as_str());
            assert!(limiter.allow(&key).await.unwrap().allowed);
            let denied = limiter.allow(&key).await.unwrap();
            assert!(!denied.allowed, "{algorithm:?}");
            assert!(denied.reset_at > Utc::now(), "{algorithm:?}");
        }
    }

    #[tokio::test]
    async fn every_algorithm_admits_exactly_limit_then_denies() {
        for algorithm in [Algorithm::TokenBucket, Algorithm::SlidingWindow, Algorithm::FixedWindow] {
            let limiter = limiter(algorithm, 3);

            for i in 0..3u64 {
                let r = limiter.allow("withdraw:user:u1").await.unwrap();
                assert!(r.allowed, "{algorithm:?} request {i} should pass");
                assert_eq!(r.remaining, 2 - i, "{algorithm:?} remaining after request {i}");
                assert_eq!(r.limit, 3);
            }

            let denied = limiter.allow("withdraw:user:u1").await.unwrap();
            assert!(!denied.allowed, "{algorithm:?} fourth request should be denied");
            assert_eq!(denied.remaining, 0);
            assert!(denied.retry_after > Duration::ZERO, "{algorithm:?} retry_after");
            assert!(denied.retry_after_secs() >= 1);
        }
    }

    #[tokio::test]
    async fn keys_are_independent_and_reset_clears_state() {
        let limiter = limiter(Algorithm::FixedWindow, 1);

        assert!(limiter.allow("a").await.unwrap().allowed);
        assert!(!limiter.allow("a").await.unwrap().allowed);
        assert!(limiter.allow("b").await.unwrap().allowed);

        limiter.reset("a").await.unwrap();
        assert!(limiter.allow("a").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn on_limited_hook_sees_denials_only() {
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = seen.clone();
        let limiter = limiter(Algorithm::SlidingWindow, 1).with_on_limited(Arc::new(move |key, result| {
            assert!(!result.allowed);
            sink.lock().unwrap().push(key.to_string());
        }));

        limiter.allow("k").await.unwrap();
        limiter.allow("k").await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["k".to_string()]);
    }

    #[tokio::test]
    async fn empty_key_is_rejected() {
        assert!(matches!(limiter(Algorithm::TokenBucket, 1).allow(" ").await, Err(RateLimitError::EmptyKey)));
    }

    #[test]
    fn key_builders() {
        assert_eq!(user_key("withdraw", "u-1"), "withdraw:user:u-1");
        assert_eq!(ip_key("withdraw", "10.0.0.1"), "withdraw:ip:10.0.0.1");
    }

    #[test]
    fn retry_after_secs_rounds_down_but_never_below_one() {
        let mut r = RateLimitResult {
            allowed: false,
            limit: 1,
            remaining: 0,
            reset_at: Utc::now(),
            retry_after: Duration::from_millis(300),
        };
        assert_eq!(r.retry_after_secs(), 1);
        r.retry_after = Duration::from_millis(2_900);
        assert_eq!(r.retry_after_secs(), 2);
    }
}
