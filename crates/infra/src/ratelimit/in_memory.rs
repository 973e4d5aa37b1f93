//! Process-local rate limit store.
//!
//! Mirrors the arithmetic of the Redis scripts so both stores answer the same
//! sequence of hits the same way. Counters expire like their Redis keys
//! (`2 x window` after the last hit, or at the end of a fixed window); expired
//! counters are swept at most once per second.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};

use super::{Algorithm, RateLimitConfig, RateLimitError, RateLimitResult, RateLimitStore};

const SWEEP_INTERVAL_MS: i64 = 1_000;

#[derive(Debug)]
enum Counter {
    TokenBucket { tokens: f64, last_refill_ms: i64 },
    SlidingWindow { hits: VecDeque<i64> },
    FixedWindow { count: u64, expires_at_ms: i64 },
}

impl Counter {
    fn algorithm(&self) -> Algorithm {
        match self {
            Counter::TokenBucket { .. } => Algorithm::TokenBucket,
            Counter::SlidingWindow { .. } => Algorithm::SlidingWindow,
            Counter::FixedWindow { .. } => Algorithm::FixedWindow,
        }
    }
}

#[derive(Debug)]
struct Entry {
    counter: Counter,
    expires_at_ms: i64,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
    next_sweep_ms: i64,
}

#[derive(Debug, Default)]
pub struct InMemoryRateLimitStore {
    state: Mutex<State>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired, unswept) counters.
    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn allow(&self, key: &str, config: &RateLimitConfig) -> Result<RateLimitResult, RateLimitError> {
        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let window_ms = config.window_ms();

        let mut state = self
            .state
            .lock()
            .map_err(|_| RateLimitError::store("allow", "rate limit state lock poisoned"))?;

        if now_ms >= state.next_sweep_ms {
            state.entries.retain(|_, e| e.expires_at_ms > now_ms);
            state.next_sweep_ms = now_ms.saturating_add(SWEEP_INTERVAL_MS);
        }

        let entry = state
            .entries
            .entry(key.to_string())
            .and_modify(|e| {
                if e.expires_at_ms <= now_ms || e.counter.algorithm() != config.algorithm {
                    *e = fresh(config, now_ms);
                }
            })
            .or_insert_with(|| fresh(config, now_ms));
        let counter = &mut entry.counter;

        let (allowed, remaining, retry_after_ms, reset_in_ms) = match counter {
            Counter::TokenBucket { tokens, last_refill_ms } => {
                let rate = config.limit as f64 / window_ms as f64;
                let elapsed = (now_ms - *last_refill_ms).max(0) as f64;
                *tokens = (config.burst as f64).min(*tokens + elapsed * rate);
                *last_refill_ms = now_ms;

                if *tokens >= 1.0 {
                    *tokens -= 1.0;
                    (true, tokens.floor() as u64, 0, window_ms)
                } else {
                    let wait = ((1.0 - *tokens) / rate).floor() as i64;
                    (false, 0, wait, window_ms)
                }
            }
            Counter::SlidingWindow { hits } => {
                let window_start = now_ms - window_ms;
                while hits.front().is_some_and(|&t| t <= window_start) {
                    hits.pop_front();
                }

                let count = hits.len() as u64;
                if count < config.limit {
                    hits.push_back(now_ms);
                    (true, config.limit - count - 1, 0, window_ms)
                } else {
                    let oldest = hits.front().copied().unwrap_or(now_ms);
                    let wait = (oldest + window_ms - now_ms).max(0);
                    (false, 0, wait, window_ms)
                }
            }
            Counter::FixedWindow { count, expires_at_ms } => {
                if now_ms >= *expires_at_ms {
                    *count = 0;
                    *expires_at_ms = now_ms.saturating_add(window_ms);
                }
                *count += 1;
                let ttl = (*expires_at_ms - now_ms).max(0);

                if *count <= config.limit {
                    (true, config.limit - *count, 0, ttl)
                } else {
                    (false, 0, ttl, ttl)
                }
            }
        };

        entry.expires_at_ms = match &entry.counter {
            Counter::FixedWindow { expires_at_ms, .. } => *expires_at_ms,
            Counter::TokenBucket { .. } | Counter::SlidingWindow { .. } => {
                now_ms.saturating_add(window_ms.saturating_mul(2))
            }
        };

        Ok(RateLimitResult {
            allowed,
            limit: config.limit,
            remaining,
            reset_at: now + TimeDelta::milliseconds(reset_in_ms),
            retry_after: Duration::from_millis(retry_after_ms as u64),
        })
    }

    async fn reset(&self, key: &str) -> Result<(), RateLimitError> {
        self.state
            .lock()
            .map_err(|_| RateLimitError::store("reset", "rate limit state lock poisoned"))?
            .entries
            .remove(key);
        Ok(())
    }
}

fn fresh(config: &RateLimitConfig, now_ms: i64) -> Entry {
    let counter = match config.algorithm {
        Algorithm::TokenBucket => Counter::TokenBucket {
            tokens: config.burst as f64,
            last_refill_ms: now_ms,
        },
        Algorithm::SlidingWindow => Counter::SlidingWindow { hits: VecDeque::new() },
        Algorithm::FixedWindow => Counter::FixedWindow {
            count: 0,
            expires_at_ms: now_ms.saturating_add(config.window_ms()),
        },
    };
    Entry {
        counter,
        expires_at_ms: now_ms.saturating_add(config.window_ms()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expired_counters_are_swept() {
        let store = InMemoryRateLimitStore::new();
        let cfg = RateLimitConfig::new(Algorithm::SlidingWindow, 1, Duration::from_millis(10));

        for i in 0..5 {
            store.allow(&format!("user:{i}"), &cfg).await.unwrap();
        }
        assert_eq!(store.len(), 5);

        // Past 2 x window and the sweep interval.
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert!(store.allow("user:fresh", &cfg).await.unwrap().allowed);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn fixed_window_counter_restarts_after_expiry() {
        let store = InMemoryRateLimitStore::new();
        let cfg = RateLimitConfig::new(Algorithm::FixedWindow, 1, Duration::from_millis(20));

        assert!(store.allow("k", &cfg).await.unwrap().allowed);
        assert!(!store.allow("k", &cfg).await.unwrap().allowed);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.allow("k", &cfg).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn token_bucket_honours_burst_above_limit() {
        let store = InMemoryRateLimitStore::new();
        let cfg = RateLimitConfig::new(Algorithm::TokenBucket, 1, Duration::from_secs(60)).with_burst(3);

        for _ in 0..3 {
            assert!(store.allow("k", &cfg).await.unwrap().allowed);
        }
        assert!(!store.allow("k", &cfg).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn sliding_window_admits_again_after_window_passes() {
        let store = InMemoryRateLimitStore::new();
        let cfg = RateLimitConfig::new(Algorithm::SlidingWindow, 1, Duration::from_millis(30));

        assert!(store.allow("k", &cfg).await.unwrap().allowed);
        assert!(!store.allow("k", &cfg).await.unwrap().allowed);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.allow("k", &cfg).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn fixed_window_reset_at_tracks_window_expiry() {
        let store = InMemoryRateLimitStore::new();
        let cfg = RateLimitConfig::new(Algorithm::FixedWindow, 5, Duration::from_secs(10));

        let before = Utc::now();
        let r = store.allow("k", &cfg).await.unwrap();
        assert!(r.reset_at > before);
        assert!(r.reset_at <= before + TimeDelta::seconds(11));
    }

    #[tokio::test]
    async fn switching_algorithm_starts_a_fresh_counter() {
        let store = InMemoryRateLimitStore::new();
        let fixed = RateLimitConfig::new(Algorithm::FixedWindow, 1, Duration::from_secs(60));
        let sliding = RateLimitConfig::new(Algorithm::SlidingWindow, 1, Duration::from_secs(60));

        assert!(store.allow("k", &fixed).await.unwrap().allowed);
        assert!(!store.allow("k", &fixed).await.unwrap().allowed);
        assert!(store.allow("k", &sliding).await.unwrap().allowed);
    }

    proptest::proptest! {
        #[test]
        fn never_admits_more_than_limit_within_one_window(
            limit in 1u64..15,
            hits in 0usize..40,
            algorithm in proptest::sample::select(vec![
                Algorithm::TokenBucket,
                Algorithm::SlidingWindow,
                Algorithm::FixedWindow,
            ]),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
            let store = InMemoryRateLimitStore::new();
            let cfg = RateLimitConfig::new(algorithm, limit, Duration::from_secs(3600));

            let admitted = rt.block_on(async {
                let mut admitted = 0usize;
                for _ in 0..hits {
                    if store.allow("k", &cfg).await.unwrap().allowed {
                        admitted += 1;
                    }
                }
                admitted
            });

            proptest::prop_assert_eq!(admitted, hits.min(limit as usize));
        }
    }
}
