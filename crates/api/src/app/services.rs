//! Infrastructure wiring: picks in-memory or persistent backends and builds
//! the use-case services on top of them.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::PgPool;

use walletd_auth::{BcryptHasher, HmacTokenManager, LoginService, TokenOptions, TokenVerifier, UserDirectory};
use walletd_infra::{
    config::{AppConfig, Modules},
    db,
    idempotency::{IdempotencyStore, InMemoryIdempotencyStore, PostgresIdempotencyStore},
    ratelimit::{
        InMemoryRateLimitStore, RateLimitResult, RateLimitStore, RateLimiter, RedisRateLimitStore,
    },
    users::{InMemoryUserDirectory, PostgresUserDirectory},
    wallet_store::{InMemoryWalletStore, PostgresWalletStore},
};
use walletd_wallet::{BalanceInquiryService, WalletStore, WithdrawService};

/// Handles to the storage backends, kept so callers can seed in-memory state
/// or close the pool on shutdown.
#[derive(Debug, Clone)]
pub enum Backends {
    InMemory {
        wallets: Arc<InMemoryWalletStore>,
        users: Arc<InMemoryUserDirectory>,
    },
    Persistent {
        pool: PgPool,
    },
}

#[derive(Clone)]
pub struct AppServices {
    pub withdraw: WithdrawService,
    pub inquiry: BalanceInquiryService,
    pub login: LoginService,
    pub tokens: Arc<dyn TokenVerifier>,
    pub idempotency: Arc<dyn IdempotencyStore>,
    pub idempotency_lock_ttl: Duration,
    pub withdraw_limiter: Arc<RateLimiter>,
    pub modules: Modules,
    pub backends: Backends,
}

impl AppServices {
    pub fn in_memory_wallets(&self) -> Option<&Arc<InMemoryWalletStore>> {
        match &self.backends {
            Backends::InMemory { wallets, .. } => Some(wallets),
            Backends::Persistent { .. } => None,
        }
    }

    pub fn in_memory_users(&self) -> Option<&Arc<InMemoryUserDirectory>> {
        match &self.backends {
            Backends::InMemory { users, .. } => Some(users),
            Backends::Persistent { .. } => None,
        }
    }

    /// Release backend resources. The pool refuses new acquisitions afterwards.
    pub async fn shutdown(&self) {
        if let Backends::Persistent { pool } = &self.backends {
            pool.close().await;
            tracing::info!("postgres pool closed");
        }
    }
}

/// Build services for `config`, connecting to Postgres and Redis when
/// persistent stores are enabled.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    if !config.use_persistent_stores {
        tracing::info!("using in-memory stores");
        return build_in_memory_services(config);
    }

    let database = config
        .database
        .as_ref()
        .context("DATABASE_URL is required when persistent stores are enabled")?;
    let pool = db::connect(database)
        .await
        .context("failed to connect to postgres")?;
    db::apply_schema(&pool)
        .await
        .context("failed to apply database schema")?;

    let rate_limits: Arc<dyn RateLimitStore> = Arc::new(
        RedisRateLimitStore::connect(&config.redis_url, Some(config.rate_limit_prefix.clone()))
            .await
            .context("failed to connect to redis")?,
    );

    let wallets = Arc::new(PostgresWalletStore::new(pool.clone()));
    let users = Arc::new(PostgresUserDirectory::new(pool.clone()));
    let idempotency: Arc<dyn IdempotencyStore> = Arc::new(PostgresIdempotencyStore::new(pool.clone()));

    tracing::info!("using persistent stores (postgres + redis)");
    assemble(
        config,
        wallets,
        users,
        idempotency,
        rate_limits,
        Backends::Persistent { pool },
    )
}

/// Services over in-memory backends only.
pub fn build_in_memory_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let wallets = Arc::new(InMemoryWalletStore::new());
    let users = Arc::new(InMemoryUserDirectory::new());

    assemble(
        config,
        wallets.clone(),
        users.clone(),
        Arc::new(InMemoryIdempotencyStore::new()),
        Arc::new(InMemoryRateLimitStore::new()),
        Backends::InMemory { wallets, users },
    )
}

fn assemble(
    config: &AppConfig,
    wallets: Arc<dyn WalletStore>,
    users: Arc<dyn UserDirectory>,
    idempotency: Arc<dyn IdempotencyStore>,
    rate_limits: Arc<dyn RateLimitStore>,
    backends: Backends,
) -> anyhow::Result<AppServices> {
    let ttl = chrono::Duration::from_std(config.jwt.ttl).context("JWT_TTL_SECS out of range")?;
    let tokens = Arc::new(
        HmacTokenManager::new(TokenOptions {
            secret: config.jwt.secret.clone(),
            algorithm: config.jwt.algorithm.clone(),
            issuer: config.jwt.issuer.clone(),
            ttl,
        })
        .context("invalid token configuration")?,
    );

    let withdraw_limiter = RateLimiter::new(rate_limits, config.withdraw_rate_limit.clone())
        .context("invalid withdraw rate limit configuration")?
        .with_on_limited(Arc::new(|key: &str, result: &RateLimitResult| {
            tracing::warn!(
                scope = "withdraw",
                key = %key,
                limit = result.limit,
                retry_after_secs = result.retry_after_secs(),
                "withdraw rate limit exceeded"
            );
        }));

    Ok(AppServices {
        withdraw: WithdrawService::new(wallets.clone()),
        inquiry: BalanceInquiryService::new(wallets),
        login: LoginService::new(users, Arc::new(BcryptHasher::default()), tokens.clone()),
        tokens,
        idempotency,
        idempotency_lock_ttl: config.idempotency_lock_ttl,
        withdraw_limiter: Arc::new(withdraw_limiter),
        modules: config.modules,
        backends,
    })
}
