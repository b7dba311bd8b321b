// src/config.rs

use std::env;
use std::str::FromStr;

use dotenvy::dotenv;

use crate::error::AppError;

/// Number of option slots on every question (A-D).
pub const OPTION_COUNT: usize = 4;

/// Passing threshold used when an admin does not supply one.
pub const DEFAULT_PASSING_SCORE: f64 = 40.0;

/// Countdown tick used by the client session.
pub const COUNTDOWN_TICK_SECS: u64 = 1;

/// How long after the deadline a closing client may still hand over the
/// answers it held when time ran out. The reaper waits this long too.
pub const EXPIRY_GRACE_SECS: i64 = 30;

/// Outbox retry bounds for answer writes that failed to persist.
pub const OUTBOX_MAX_RETRIES: u8 = 5;
pub const OUTBOX_BACKOFF_BASE_MS: u64 = 500;
pub const OUTBOX_BACKOFF_MAX_MS: u64 = 30_000;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    /// Token lifetime in seconds.
    pub jwt_expiration: u64,
    pub rust_log: String,
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
    pub port: u16,
    /// How often the abandoned-attempt reaper scans.
    pub reaper_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let database_url = required("DATABASE_URL")?;
        let jwt_secret = required("JWT_SECRET")?;

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            database_url,
            jwt_secret,
            jwt_expiration: parsed_or("JWT_EXPIRATION", 86_400)?,
            rust_log,
            admin_username: env::var("ADMIN_USERNAME").ok(),
            admin_password: env::var("ADMIN_PASSWORD").ok(),
            port: parsed_or("PORT", 3000)?,
            reaper_interval_secs: parsed_or("REAPER_INTERVAL_SECS", 60)?,
        })
    }
}

fn required(key: &str) -> Result<String, AppError> {
    env::var(key).map_err(|_| AppError::InternalServerError(format!("{} must be set", key)))
}

fn parsed_or<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| AppError::InternalServerError(format!("{} is not a valid value: {}", key, raw))),
        Err(_) => Ok(default),
    }
}
