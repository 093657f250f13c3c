//! Environment-backed configuration.

use std::time::Duration;

const DEFAULT_DATABASE_URL: &str = "sqlite://feedsync.db?mode=rwc";
const DEFAULT_RECENCY_PERIOD_SECS: u64 = 300;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 20;
const DEFAULT_ARCHIVE_MAX_AGE_DAYS: u64 = 2;
const DEFAULT_FAVICON_MAX_AGE_DAYS: u64 = 30;
const DEFAULT_USER_AGENT: &str = concat!("feedsync/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: String,
    /// Minimum gap between unforced poll runs.
    pub recency_period: Duration,
    /// Per-fetch deadline used by the poller and subscribe.
    pub fetch_timeout: Duration,
    /// Read entries older than this are shrunk to the archived projection.
    pub archive_max_age: Duration,
    /// Cached favicons older than this are considered stale.
    pub favicon_max_age: Duration,
    pub user_agent: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            recency_period: Duration::from_secs(DEFAULT_RECENCY_PERIOD_SECS),
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            archive_max_age: Duration::from_secs(DEFAULT_ARCHIVE_MAX_AGE_DAYS * 24 * 3600),
            favicon_max_age: Duration::from_secs(DEFAULT_FAVICON_MAX_AGE_DAYS * 24 * 3600),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl SyncConfig {
    /// Reads configuration from the environment, falling back to defaults.
    /// A `.env` file is honored when present.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();
        Self {
            database_url: env_string("FEEDSYNC_DATABASE_URL", defaults.database_url),
            recency_period: env_secs("FEEDSYNC_RECENCY_PERIOD_SECS", defaults.recency_period),
            fetch_timeout: env_secs("FEEDSYNC_FETCH_TIMEOUT_SECS", defaults.fetch_timeout),
            archive_max_age: env_days("FEEDSYNC_ARCHIVE_MAX_AGE_DAYS", defaults.archive_max_age),
            favicon_max_age: env_days("FEEDSYNC_FAVICON_MAX_AGE_DAYS", defaults.favicon_max_age),
            user_agent: env_string("FEEDSYNC_USER_AGENT", defaults.user_agent),
        }
    }
}

fn env_string(key: &str, default: String) -> String {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    parse_u64(key).map(Duration::from_secs).unwrap_or(default)
}

fn env_days(key: &str, default: Duration) -> Duration {
    parse_u64(key)
        .map(|days| Duration::from_secs(days * 24 * 3600))
        .unwrap_or(default)
}

fn parse_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok()?.trim().parse().ok()
}
