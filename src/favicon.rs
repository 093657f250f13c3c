//! TTL cache mapping page URLs to favicon URLs.
//!
//! Lookups hit the `favicons` table first; on a miss or a stale row the
//! caller-provided discovery runs and the result is written back. Discovery
//! failures fall back to the stale value rather than erasing it.

use tracing::debug;

use crate::feed::normalize_url;
use crate::storage::repository::{cutoff_rfc3339, now_rfc3339, Store, StoreError};
use std::time::Duration;

/// Canonical cache key for a page URL.
pub fn normalize_page_url(raw: &str) -> String {
    normalize_url(raw)
}

/// Resolves a page URL to its favicon URL. Implementations are expected to
/// go to the network; the cache only calls them on a miss or a stale hit.
pub trait IconDiscovery {
    fn discover(&self, page_url: &str) -> impl std::future::Future<Output = Option<String>> + Send;
}

/// Deadline on the whole favicon probe, independent of the poll deadline.
const ICON_FETCH_TIMEOUT_SECS: u64 = 10;

/// Probes `{origin}/favicon.ico` and reports it when the server answers 200.
#[derive(Debug, Clone)]
pub struct HttpIconDiscovery {
    client: reqwest::Client,
}

impl HttpIconDiscovery {
    pub fn new(user_agent: &str) -> Result<Self, reqwest::Error> {
        Self::with_timeout(user_agent, Duration::from_secs(ICON_FETCH_TIMEOUT_SECS))
    }

    pub fn with_timeout(user_agent: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout.min(Duration::from_secs(ICON_FETCH_TIMEOUT_SECS)))
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }
}

impl IconDiscovery for HttpIconDiscovery {
    async fn discover(&self, page_url: &str) -> Option<String> {
        let page = url::Url::parse(page_url).ok()?;
        let icon = page.join("/favicon.ico").ok()?;
        let response = self.client.get(icon.clone()).send().await.ok()?;
        if response.status().is_success() {
            Some(icon.to_string())
        } else {
            None
        }
    }
}

/// Favicon cache backed by the store's database.
#[derive(Debug, Clone)]
pub struct FaviconCache {
    pool: sqlx::SqlitePool,
}

impl FaviconCache {
    pub fn new(store: &Store) -> Self {
        Self {
            pool: store.pool().clone(),
        }
    }

    /// Returns the icon URL for `page_url`, consulting `discovery` when the
    /// cached row is missing or older than `max_age`.
    pub async fn lookup<D: IconDiscovery>(
        &self,
        page_url: &str,
        max_age: Duration,
        discovery: &D,
    ) -> Result<Option<String>, StoreError> {
        let key = normalize_page_url(page_url);
        let cached: Option<(String, String)> =
            sqlx::query_as("SELECT icon_url, date_updated FROM favicons WHERE page_url = ?1")
                .bind(&key)
                .fetch_optional(&self.pool)
                .await?;

        let cutoff = cutoff_rfc3339(max_age);
        if let Some((icon_url, date_updated)) = &cached {
            if date_updated.as_str() > cutoff.as_str() {
                return Ok(Some(icon_url.clone()));
            }
        }

        match discovery.discover(&key).await {
            Some(icon_url) => {
                self.put(&key, &icon_url).await?;
                Ok(Some(icon_url))
            }
            None => {
                if cached.is_some() {
                    debug!(page_url = %key, "icon discovery failed, keeping stale favicon");
                }
                Ok(cached.map(|(icon_url, _)| icon_url))
            }
        }
    }

    /// Upserts a cache row and refreshes its timestamp.
    pub async fn put(&self, page_url: &str, icon_url: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO favicons (page_url, icon_url, date_updated) VALUES (?1, ?2, ?3) \
             ON CONFLICT(page_url) DO UPDATE SET icon_url = excluded.icon_url, \
             date_updated = excluded.date_updated",
        )
        .bind(normalize_page_url(page_url))
        .bind(icon_url)
        .bind(now_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Deletes rows older than `max_age`. Returns the number removed.
    pub async fn compact(&self, max_age: Duration) -> Result<u64, StoreError> {
        let cutoff = cutoff_rfc3339(max_age);
        let removed = sqlx::query("DELETE FROM favicons WHERE date_updated <= ?1")
            .bind(&cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(removed)
    }
}
