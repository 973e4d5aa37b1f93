//! Redis-backed rate limit store (shared across instances).
//!
//! Each algorithm is a single Lua script so the read-modify-write on a key is
//! atomic on the Redis side. All keys live under `<prefix>:<key>`.
//!
//! Every script returns `{allowed, remaining, ms}` where `ms` is the retry
//! delay for the token bucket and sliding window, and the key's PTTL for the
//! fixed window.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::instrument;

use super::{Algorithm, RateLimitConfig, RateLimitError, RateLimitResult, RateLimitStore};

/// Default key namespace.
pub const DEFAULT_PREFIX: &str = "walletd:ratelimit";

const TOKEN_BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local burst = tonumber(ARGV[2])
local window = tonumber(ARGV[3])
local now = tonumber(ARGV[4])
local requested = tonumber(ARGV[5])

local data = redis.call('HMGET', key, 'tokens', 'last_refill')
local tokens = tonumber(data[1]) or burst
local last_refill = tonumber(data[2]) or now

local elapsed = math.max(0, now - last_refill)
local rate = limit / window
tokens = math.min(burst, tokens + (elapsed * rate))

local allowed = 0
local remaining = 0
local retry_after = 0

if tokens >= requested then
  tokens = tokens - requested
  allowed = 1
  remaining = tokens
else
  retry_after = (requested - tokens) / rate
end

redis.call('HSET', key, 'tokens', tokens, 'last_refill', now)
redis.call('PEXPIRE', key, window * 2)

return {allowed, math.floor(remaining), math.floor(retry_after)}
"#;

const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local member = ARGV[4]

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)

local count = redis.call('ZCARD', key)
local allowed = 0
local remaining = 0
local retry_after = 0

if count < limit then
  redis.call('ZADD', key, now, member)
  allowed = 1
  remaining = limit - count - 1
else
  local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
  if oldest[2] then
    retry_after = math.max(0, tonumber(oldest[2]) + window - now)
  end
end

redis.call('PEXPIRE', key, window * 2)

return {allowed, remaining, math.floor(retry_after)}
"#;

const FIXED_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local window = tonumber(ARGV[2])

local current = tonumber(redis.call('INCR', key))
if current == 1 then
  redis.call('PEXPIRE', key, window)
end

local ttl = redis.call('PTTL', key)
local allowed = 0
local remaining = 0

if current <= limit then
  allowed = 1
  remaining = limit - current
end

return {allowed, remaining, ttl}
"#;

#[derive(Clone)]
pub struct RedisRateLimitStore {
    conn: ConnectionManager,
    prefix: String,
    token_bucket: Script,
    sliding_window: Script,
    fixed_window: Script,
}

impl core::fmt::Debug for RedisRateLimitStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisRateLimitStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl RedisRateLimitStore {
    /// Open a managed (auto-reconnecting) connection to `redis_url`.
    pub async fn connect(redis_url: impl AsRef<str>, prefix: Option<String>) -> Result<Self, RateLimitError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(|e| RateLimitError::store("connect", e))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| RateLimitError::store("connect", e))?;
        Ok(Self::new(conn, prefix))
    }

    pub fn new(conn: ConnectionManager, prefix: Option<String>) -> Self {
        Self {
            conn,
            prefix: normalize_prefix(prefix),
            token_bucket: Script::new(TOKEN_BUCKET_SCRIPT),
            sliding_window: Script::new(SLIDING_WINDOW_SCRIPT),
            fixed_window: Script::new(FIXED_WINDOW_SCRIPT),
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }
}

fn normalize_prefix(prefix: Option<String>) -> String {
    prefix
        .map(|p| p.trim().trim_end_matches(':').to_string())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| DEFAULT_PREFIX.to_string())
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    #[instrument(skip(self, config), fields(algorithm = config.algorithm.as_str()), err)]
    async fn allow(&self, key: &str, config: &RateLimitConfig) -> Result<RateLimitResult, RateLimitError> {
        let full_key = self.full_key(key);
        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let window_ms = config.window_ms();
        let mut conn = self.conn.clone();

        let reply: Vec<i64> = match config.algorithm {
            Algorithm::TokenBucket => {
                self.token_bucket
                    .key(&full_key)
                    .arg(config.limit)
                    .arg(config.burst)
                    .arg(window_ms)
                    .arg(now_ms)
                    .arg(1)
                    .invoke_async(&mut conn)
                    .await
            }
            Algorithm::SlidingWindow => {
                let member = format!("{now_ms}-{}", uuid::Uuid::now_v7().simple());
                self.sliding_window
                    .key(&full_key)
                    .arg(config.limit)
                    .arg(window_ms)
                    .arg(now_ms)
                    .arg(member)
                    .invoke_async(&mut conn)
                    .await
            }
            Algorithm::FixedWindow => {
                self.fixed_window
                    .key(&full_key)
                    .arg(config.limit)
                    .arg(window_ms)
                    .invoke_async(&mut conn)
                    .await
            }
        }
        .map_err(|e| RateLimitError::store("eval", e))?;

        let [allowed, remaining, ms] = reply[..] else {
            return Err(RateLimitError::store(
                "eval",
                format!("unexpected script reply of {} elements", reply.len()),
            ));
        };
        let allowed = allowed == 1;
        let ms = ms.max(0);

        let (retry_after_ms, reset_in_ms) = match config.algorithm {
            Algorithm::FixedWindow => (if allowed { 0 } else { ms }, ms),
            Algorithm::TokenBucket | Algorithm::SlidingWindow => (ms, window_ms),
        };

        Ok(RateLimitResult {
            allowed,
            limit: config.limit,
            remaining: remaining.max(0) as u64,
            reset_at: now + TimeDelta::milliseconds(reset_in_ms),
            retry_after: Duration::from_millis(retry_after_ms as u64),
        })
    }

    #[instrument(skip(self), err)]
    async fn reset(&self, key: &str) -> Result<(), RateLimitError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(self.full_key(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| RateLimitError::store("reset", e))?;
        Ok(())
    }
}
