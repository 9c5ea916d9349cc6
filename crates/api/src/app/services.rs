//! Control-plane wiring: storage backend, policies and shared in-memory state.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Context;
use chrono::Utc;
use tracing::{info, warn};

use keystone_auth::{
    AccountLockout, BearerValidator, CsrfGuard, CsrfPolicy, InMemoryAuthStore, LockoutPolicy,
    PasswordPolicy, PasswordRules, PermissionCache, RateLimiter, RateLimits, RejectAllBearer,
    ResetTokenSink, Role, SessionManager, SessionPolicy, Stores, TokenGenerator,
};
use keystone_infra::{
    ApiKeyValidator, PostgresAuthStore, RandomTokenGenerator, RecordingResetTokenSink,
};

use crate::config::{ApiConfig, BootstrapAdmin};

/// Tunables and injected capabilities for [`AppServices::new`].
#[derive(Clone)]
pub struct ServiceOptions {
    pub password_rules: PasswordRules,
    pub lockout: LockoutPolicy,
    pub session: SessionPolicy,
    pub csrf: CsrfPolicy,
    pub rate_limits: RateLimits,
    pub allowed_origins: Vec<String>,
    pub tokens: Arc<dyn TokenGenerator>,
    pub bearer: Arc<dyn BearerValidator>,
    pub reset_sink: Arc<dyn ResetTokenSink>,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            password_rules: PasswordRules::default(),
            lockout: LockoutPolicy::default(),
            session: SessionPolicy::default(),
            csrf: CsrfPolicy::default(),
            rate_limits: RateLimits::default(),
            allowed_origins: Vec::new(),
            tokens: Arc::new(RandomTokenGenerator),
            bearer: Arc::new(RejectAllBearer),
            reset_sink: Arc::new(RecordingResetTokenSink::new()),
        }
    }
}

/// Everything the middleware chain and handlers share.
///
/// The permission cache and the rate limiter are the only mutable
/// in-process state; everything else lives behind the stores.
#[derive(Clone)]
pub struct AppServices {
    pub stores: Stores,
    pub passwords: PasswordPolicy,
    pub lockout: AccountLockout,
    pub sessions: SessionManager,
    pub csrf: CsrfGuard,
    pub permissions: Arc<PermissionCache>,
    pub rate_limiter: Arc<RateLimiter>,
    pub rate_limits: RateLimits,
    pub allowed_origins: Arc<Vec<String>>,
    pub tokens: Arc<dyn TokenGenerator>,
    pub bearer: Arc<dyn BearerValidator>,
    pub reset_sink: Arc<dyn ResetTokenSink>,
}

impl AppServices {
    pub fn new(stores: Stores, options: ServiceOptions) -> Self {
        Self {
            passwords: PasswordPolicy::new(options.password_rules, &stores),
            lockout: AccountLockout::new(options.lockout, stores.users.clone()),
            sessions: SessionManager::new(options.session, &stores, options.tokens.clone()),
            csrf: CsrfGuard::new(options.csrf, &stores, options.tokens.clone()),
            permissions: Arc::new(PermissionCache::new(stores.permissions.clone())),
            rate_limiter: Arc::new(RateLimiter::new()),
            rate_limits: options.rate_limits,
            allowed_origins: Arc::new(options.allowed_origins),
            tokens: options.tokens,
            bearer: options.bearer,
            reset_sink: options.reset_sink,
            stores,
        }
    }

    /// Seed and load role grants. Must run before serving traffic.
    pub async fn initialize(&self) -> anyhow::Result<()> {
        self.permissions
            .initialize()
            .await
            .context("failed to initialize permission cache")
    }

    /// Create the configured administrator unless the username exists.
    pub async fn ensure_admin(&self, admin: &BootstrapAdmin) -> anyhow::Result<()> {
        if self
            .stores
            .users
            .find_by_username(&admin.username)
            .await
            .context("failed to look up bootstrap admin")?
            .is_some()
        {
            return Ok(());
        }

        let user = self
            .passwords
            .create_user_at(&admin.username, &admin.password, Role::ADMIN, Utc::now())
            .await
            .context("failed to create bootstrap admin")?;
        info!(user_id = %user.id, username = %user.username, "bootstrap admin created");
        Ok(())
    }
}

/// Build services from configuration: pick the storage backend, parse API
/// keys, seed grants and the bootstrap admin.
pub async fn build_services(config: &ApiConfig) -> anyhow::Result<AppServices> {
    let stores = match &config.database_url {
        Some(url) => {
            let store = PostgresAuthStore::connect(url, 10)
                .await
                .context("failed to connect to database")?;
            store.apply_schema().await.context("failed to apply schema")?;
            info!("using postgres storage");
            Stores::from_backend(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set; using in-memory storage");
            Stores::from_backend(Arc::new(InMemoryAuthStore::new()))
        }
    };

    let api_keys = ApiKeyValidator::parse(&config.api_keys).context("invalid KEYSTONE_API_KEYS")?;
    let bearer: Arc<dyn BearerValidator> = if api_keys.is_empty() {
        Arc::new(RejectAllBearer)
    } else {
        info!(keys = api_keys.len(), "api keys configured");
        Arc::new(api_keys)
    };

    let services = AppServices::new(
        stores,
        ServiceOptions {
            rate_limits: config.rate_limits,
            allowed_origins: config.allowed_origins.clone(),
            bearer,
            ..ServiceOptions::default()
        },
    );

    services.initialize().await?;
    if let Some(admin) = &config.bootstrap_admin {
        services.ensure_admin(admin).await?;
    }
    Ok(services)
}

/// Periodically drop rate-limit buckets idle for longer than the longest window.
pub fn spawn_rate_limit_sweeper(
    limiter: Arc<RateLimiter>,
    limits: RateLimits,
    every: StdDuration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let evicted = limiter.sweep_idle_at(Utc::now(), limits.longest_window());
            if evicted > 0 {
                tracing::debug!(evicted, remaining = limiter.tracked_keys(), "rate-limit sweep");
            }
        }
    })
}
