//! Process configuration read from environment variables.
//!
//! Every knob has a default; only `DATABASE_URL` is mandatory, and only when
//! persistent stores are enabled. Numeric values that do not parse are
//! errors, zero or negative values fall back to the default, and unknown
//! enum strings fall back permissively.

use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::ratelimit::{Algorithm, RateLimitConfig, DEFAULT_LIMIT, DEFAULT_WINDOW};
use walletd_auth::token::MIN_SECRET_LEN;

const DEV_JWT_SECRET: &str = "walletd-dev-secret";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be an integer, got {value:?}")]
    InvalidNumber { key: &'static str, value: String },

    #[error("{0} is required when persistent stores are enabled")]
    Missing(&'static str),
}

/// Which route groups this process serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Modules {
    #[default]
    All,
    /// Login and balance inquiry.
    Inquiry,
    Withdraw,
}

impl Modules {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "inquiry" | "inqury" => Modules::Inquiry,
            "withdraw" => Modules::Withdraw,
            _ => Modules::All,
        }
    }

    pub fn serves_inquiry(&self) -> bool {
        matches!(self, Modules::All | Modules::Inquiry)
    }

    pub fn serves_withdraw(&self) -> bool {
        matches!(self, Modules::All | Modules::Withdraw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

#[derive(Clone, PartialEq, Eq)]
pub struct JwtConfig {
    pub secret: Vec<u8>,
    pub algorithm: String,
    pub issuer: Option<String>,
    pub ttl: Duration,
}

impl core::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.issuer)
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub server_addr: String,
    pub use_persistent_stores: bool,
    pub database: Option<DatabaseConfig>,
    pub redis_url: String,
    pub jwt: JwtConfig,
    pub withdraw_rate_limit: RateLimitConfig,
    pub rate_limit_prefix: String,
    pub idempotency_lock_ttl: Duration,
    pub modules: Modules,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let positive = |key: &'static str| -> Result<Option<u64>, ConfigError> {
            match get(key) {
                None => Ok(None),
                Some(raw) => {
                    let n: i64 = raw
                        .parse()
                        .map_err(|_| ConfigError::InvalidNumber { key, value: raw.clone() })?;
                    Ok(u64::try_from(n).ok().filter(|n| *n > 0))
                }
            }
        };

        let use_persistent_stores = get("USE_PERSISTENT_STORES").is_some_and(|v| parse_bool(&v));

        let database = match get("DATABASE_URL") {
            Some(url) => Some(DatabaseConfig {
                url,
                max_connections: positive("DATABASE_MAX_CONNECTIONS")?
                    .and_then(|n| u32::try_from(n).ok())
                    .unwrap_or(10),
                acquire_timeout: Duration::from_secs(positive("DATABASE_ACQUIRE_TIMEOUT_SECS")?.unwrap_or(5)),
            }),
            None if use_persistent_stores => return Err(ConfigError::Missing("DATABASE_URL")),
            None => None,
        };

        let secret = match get("JWT_SECRET") {
            Some(secret) => secret,
            None => {
                warn!("JWT_SECRET not set; using insecure dev default");
                DEV_JWT_SECRET.to_string()
            }
        };

        let limit = positive("RATE_LIMIT_WITHDRAW_LIMIT")?.unwrap_or(DEFAULT_LIMIT);
        let window = positive("RATE_LIMIT_WITHDRAW_WINDOW_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_WINDOW);
        let burst = positive("RATE_LIMIT_WITHDRAW_BURST")?.unwrap_or(limit);
        let algorithm = get("RATE_LIMIT_WITHDRAW_ALGORITHM")
            .map(|v| Algorithm::parse(&v))
            .unwrap_or_default();

        Ok(Self {
            server_addr: get("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            use_persistent_stores,
            database,
            redis_url: get("REDIS_URL").unwrap_or_else(|| "redis://localhost:6379".to_string()),
            jwt: JwtConfig {
                secret: pad_secret(secret.into_bytes()),
                algorithm: get("JWT_ALGORITHM").unwrap_or_else(|| "HS256".to_string()),
                issuer: get("JWT_ISSUER"),
                ttl: Duration::from_secs(positive("JWT_TTL_SECS")?.unwrap_or(15 * 60)),
            },
            withdraw_rate_limit: RateLimitConfig::new(algorithm, limit, window).with_burst(burst),
            rate_limit_prefix: get("RATE_LIMIT_PREFIX").unwrap_or_else(|| "walletd:withdraw".to_string()),
            idempotency_lock_ttl: Duration::from_secs(positive("IDEMPOTENCY_LOCK_TTL_SECS")?.unwrap_or(30)),
            modules: get("WALLETD_MODULES").map(|v| Modules::parse(&v)).unwrap_or_default(),
        })
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Right-pad short secrets with `x` up to the HMAC minimum.
fn pad_secret(mut secret: Vec<u8>) -> Vec<u8> {
    if secret.len() < MIN_SECRET_LEN {
        secret.resize(MIN_SECRET_LEN, b'x');
    }
    secret
}
