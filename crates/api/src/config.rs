//! Application configuration loaded from environment variables.

use std::time::Duration;

/// Server and background-task configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `DATABASE_URL` — PostgreSQL connection string; unset runs on the
///   in-memory stores
/// - `RESERVATION_TTL_MINUTES` — default hold TTL (default: `15`)
/// - `REAPER_INTERVAL_SECS` — expiry sweep period (default: `30`)
/// - `OUTBOX_INTERVAL_SECS` — outbox publisher period (default: `5`)
/// - `OUTBOX_MAX_RETRIES` — publish attempts per row (default: `5`)
/// - `CONSUMER_MAX_ATTEMPTS` — deliveries before dead-letter (default: `5`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub reservation_ttl_minutes: u32,
    pub reaper_interval: Duration,
    pub outbox_interval: Duration,
    pub outbox_max_retries: u32,
    pub consumer_max_attempts: u32,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Loads configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_parse("PORT", 3000),
            database_url: std::env::var("DATABASE_URL").ok(),
            reservation_ttl_minutes: env_parse("RESERVATION_TTL_MINUTES", 15),
            reaper_interval: Duration::from_secs(env_parse("REAPER_INTERVAL_SECS", 30)),
            outbox_interval: Duration::from_secs(env_parse("OUTBOX_INTERVAL_SECS", 5)),
            outbox_max_retries: env_parse("OUTBOX_MAX_RETRIES", 5),
            consumer_max_attempts: env_parse("CONSUMER_MAX_ATTEMPTS", 5),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            database_url: None,
            reservation_ttl_minutes: 15,
            reaper_interval: Duration::from_secs(30),
            outbox_interval: Duration::from_secs(5),
            outbox_max_retries: 5,
            consumer_max_attempts: 5,
        }
    }
}
