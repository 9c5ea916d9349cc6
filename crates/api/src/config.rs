//! Service configuration read from the environment at startup.

use std::time::Duration as StdDuration;

use chrono::Duration;
use thiserror::Error;

use keystone_auth::{RateLimitRule, RateLimits};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a positive integer, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },

    #[error("KEYSTONE_BOOTSTRAP_ADMIN must be username:password")]
    InvalidBootstrapAdmin,
}

/// Administrator created at startup when absent.
#[derive(Clone, PartialEq, Eq)]
pub struct BootstrapAdmin {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for BootstrapAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapAdmin")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: String,
    /// PostgreSQL when set; in-memory storage otherwise.
    pub database_url: Option<String>,
    pub allowed_origins: Vec<String>,
    /// Raw `key:user_id:role` list; parsed by the API key validator.
    pub api_keys: String,
    pub rate_limits: RateLimits,
    pub rate_limit_sweep_interval: StdDuration,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            database_url: None,
            allowed_origins: Vec::new(),
            api_keys: String::new(),
            rate_limits: RateLimits::default(),
            rate_limit_sweep_interval: StdDuration::from_secs(60),
            bootstrap_admin: None,
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let login_limit = parse_positive(
            "KEYSTONE_LOGIN_RATE_LIMIT",
            get("KEYSTONE_LOGIN_RATE_LIMIT"),
            defaults.rate_limits.login.limit as u64,
        )?;
        let api_limit = parse_positive(
            "KEYSTONE_API_RATE_LIMIT",
            get("KEYSTONE_API_RATE_LIMIT"),
            defaults.rate_limits.api.limit as u64,
        )?;
        let sweep_secs = parse_positive(
            "KEYSTONE_RATE_LIMIT_SWEEP_SECS",
            get("KEYSTONE_RATE_LIMIT_SWEEP_SECS"),
            defaults.rate_limit_sweep_interval.as_secs(),
        )?;

        let bootstrap_admin = get("KEYSTONE_BOOTSTRAP_ADMIN")
            .map(|raw| {
                raw.split_once(':')
                    .filter(|(user, pass)| !user.is_empty() && !pass.is_empty())
                    .map(|(user, pass)| BootstrapAdmin {
                        username: user.to_string(),
                        password: pass.to_string(),
                    })
                    .ok_or(ConfigError::InvalidBootstrapAdmin)
            })
            .transpose()?;

        Ok(Self {
            bind_addr: get("KEYSTONE_BIND_ADDR").unwrap_or(defaults.bind_addr),
            database_url: get("DATABASE_URL"),
            allowed_origins: get("KEYSTONE_ALLOWED_ORIGINS")
                .map(|raw| {
                    raw.split(',')
                        .map(|o| o.trim().trim_end_matches('/').to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            api_keys: get("KEYSTONE_API_KEYS").unwrap_or_default(),
            rate_limits: RateLimits {
                login: RateLimitRule {
                    limit: login_limit as u32,
                    window: Duration::minutes(1),
                },
                api: RateLimitRule {
                    limit: api_limit as u32,
                    window: Duration::minutes(1),
                },
            },
            rate_limit_sweep_interval: StdDuration::from_secs(sweep_secs),
            bootstrap_admin,
        })
    }
}

fn parse_positive(var: &'static str, raw: Option<String>, default: u64) -> Result<u64, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.trim().parse::<u32>() {
        Ok(n) if n > 0 => Ok(n as u64),
        _ => Err(ConfigError::InvalidNumber { var, value: raw }),
    }
}
