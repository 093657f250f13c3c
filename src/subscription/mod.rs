//! Subscribe and unsubscribe flows.
//!
//! Subscribing validates the feed over the network before anything is
//! persisted: fetch, parse, then one atomic feed creation. Only metadata is
//! stored at subscribe time; entries arrive with the next poll. Duplicate
//! detection covers both the requested URL and the redirect-resolved one.

use std::time::Duration;

use tracing::warn;

use crate::config::SyncConfig;
use crate::favicon::{FaviconCache, HttpIconDiscovery, IconDiscovery};
use crate::feed::fetcher::{FeedFetcher, FetchError, FetchStatus};
use crate::feed::normalize_url;
use crate::feed::parser::{parse_feed_bytes, FeedParseError};
use crate::storage::models::{FeedRecord, NewFeed};
use crate::storage::repository::{Store, StoreError};

const SUBSCRIBE_RETRIES: usize = 1;

#[derive(Debug, thiserror::Error)]
pub enum SubscribeError {
    #[error("already subscribed: {0}")]
    AlreadySubscribed(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] FeedParseError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct Subscriber<D: IconDiscovery = HttpIconDiscovery> {
    store: Store,
    fetcher: FeedFetcher,
    favicons: FaviconCache,
    icon_discovery: D,
    fetch_deadline: Duration,
    favicon_max_age: Duration,
}

impl Subscriber<HttpIconDiscovery> {
    pub fn new(store: Store, config: &SyncConfig) -> Result<Self, FetchError> {
        let icon_discovery =
            HttpIconDiscovery::new(&config.user_agent).map_err(FetchError::Request)?;
        Self::with_discovery(store, config, icon_discovery)
    }
}

impl<D: IconDiscovery> Subscriber<D> {
    /// As [`Subscriber::new`], with a caller-provided icon discovery.
    pub fn with_discovery(
        store: Store,
        config: &SyncConfig,
        icon_discovery: D,
    ) -> Result<Self, FetchError> {
        let fetcher = FeedFetcher::new(&config.user_agent)?;
        let favicons = FaviconCache::new(&store);
        Ok(Self {
            store,
            fetcher,
            favicons,
            icon_discovery,
            fetch_deadline: config.fetch_timeout,
            favicon_max_age: config.favicon_max_age,
        })
    }

    /// Subscribes to the feed at `url`. The feed must fetch and parse before
    /// anything is persisted; when the fetch resolves through a redirect,
    /// both the requested and the resolved URL are recorded.
    pub async fn subscribe(&self, url: &str) -> Result<FeedRecord, SubscribeError> {
        let requested = normalize_url(url);
        // Duplicate check before any network work.
        if let Some(existing) = self.store.feed_id_by_url(&requested).await? {
            return Err(SubscribeError::AlreadySubscribed(format!(
                "{requested} already belongs to feed {existing}"
            )));
        }

        let fetched = self
            .fetcher
            .fetch_with_retry(&requested, self.fetch_deadline, None, None, SUBSCRIBE_RETRIES)
            .await?;
        let payload = match fetched {
            FetchStatus::Updated(payload) => payload,
            // No conditional headers were sent, so a 304 is a server bug.
            FetchStatus::NotModified => return Err(FetchError::HttpStatus(304).into()),
        };

        let resolved = normalize_url(&payload.final_url);
        if resolved != requested {
            if let Some(existing) = self.store.feed_id_by_url(&resolved).await? {
                return Err(SubscribeError::AlreadySubscribed(format!(
                    "{resolved} already belongs to feed {existing}"
                )));
            }
        }

        let parsed = parse_feed_bytes(&payload.body)?;

        // Best effort, a favicon failure never blocks the subscription.
        let page_url = parsed.link.clone().unwrap_or_else(|| resolved.clone());
        let favicon_url = match self
            .favicons
            .lookup(&page_url, self.favicon_max_age, &self.icon_discovery)
            .await
        {
            Ok(icon) => icon,
            Err(error) => {
                warn!(page_url = %page_url, %error, "favicon lookup failed");
                None
            }
        };

        let mut urls = vec![requested.clone()];
        if resolved != requested {
            urls.push(resolved.clone());
        }

        let feed = self
            .store
            .create_feed(NewFeed {
                urls,
                title: parsed.title.clone().or_else(|| Some(resolved.clone())),
                description: parsed.description.clone(),
                link: parsed.link.clone(),
                feed_type: Some(parsed.format.as_str().to_string()),
                favicon_url,
                date_published: parsed.date_published.clone(),
                date_fetched: None,
                date_last_modified: payload.last_modified.clone(),
            })
            .await
            .map_err(|error| match error {
                StoreError::Constraint(message) => SubscribeError::AlreadySubscribed(message),
                other => SubscribeError::Store(other),
            })?;

        // Entries are deliberately not stored here; the next poll run picks
        // them up. Subscribing stays a metadata-only round trip.
        Ok(feed)
    }

    /// Removes the feed and every entry it owns, announcing one deletion
    /// event per removed row. Returns the number of cascaded entries.
    pub async fn unsubscribe(&self, feed_id: i64) -> Result<u64, SubscribeError> {
        Ok(self.store.delete_feed(feed_id, "unsubscribe").await?)
    }
}
