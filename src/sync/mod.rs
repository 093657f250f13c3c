//! Concurrent poll orchestration.
//!
//! A poll run refreshes every active feed in its own task, merges whatever
//! each fetch yields and records fetch metadata. One slow or failing feed
//! never blocks the rest; its task logs a warning and contributes nothing.
//! Runs are recency-guarded through the store's key-value port so repeated
//! triggers collapse into one refresh per period.

use std::time::Duration;

use chrono::DateTime;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::feed::fetcher::{FeedFetcher, FetchError, FetchStatus};
use crate::feed::normalize_url;
use crate::feed::parser::{parse_feed_bytes, FeedParseError};
use crate::feed::types::ParsedFeed;
use crate::storage::models::{CoercedEntry, FeedRecord, FetchMetadata};
use crate::storage::repository::{cutoff_rfc3339, now_rfc3339, Store, StoreError};

/// Key under which the start of the last poll run is recorded.
pub const LAST_POLL_KEY: &str = "last_poll_at";

const FETCH_RETRIES: usize = 2;

#[derive(Debug, Clone, Copy, Default)]
pub struct PollOptions {
    /// Run even when the last poll is within the recency period.
    pub ignore_recency_check: bool,
    /// Announce the aggregate result through the notifier.
    pub notify: bool,
}

/// Outward notification seam. Implementations must not block.
pub trait Notifier: Send + Sync {
    fn show(&self, title: &str, message: &str, icon_url: Option<&str>);
}

/// Default notifier: writes the notification to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn show(&self, title: &str, message: &str, _icon_url: Option<&str>) {
        info!(title, message, "notification");
    }
}

#[derive(Debug, thiserror::Error)]
enum PollFeedError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] FeedParseError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct Poller {
    store: Store,
    fetcher: FeedFetcher,
    recency_period: Duration,
    fetch_deadline: Duration,
}

impl Poller {
    pub fn new(store: Store, config: &SyncConfig) -> Result<Self, FetchError> {
        Ok(Self {
            fetcher: FeedFetcher::new(&config.user_agent)?,
            store,
            recency_period: config.recency_period,
            fetch_deadline: config.fetch_timeout,
        })
    }

    /// Polls every active feed once. Returns the number of entries added
    /// across all feeds, `0` when the recency guard suppressed the run.
    pub async fn poll_feeds(&self, options: PollOptions) -> Result<usize, StoreError> {
        self.poll_feeds_with(options, &LogNotifier).await
    }

    pub async fn poll_feeds_with<N: Notifier>(
        &self,
        options: PollOptions,
        notifier: &N,
    ) -> Result<usize, StoreError> {
        if !options.ignore_recency_check {
            if let Some(last_poll) = self.store.get_setting(LAST_POLL_KEY).await? {
                // An unreadable stored timestamp counts as never polled; the
                // run proceeds and overwrites it.
                match DateTime::parse_from_rfc3339(&last_poll) {
                    Ok(_) => {
                        let cutoff = cutoff_rfc3339(self.recency_period);
                        if last_poll.as_str() > cutoff.as_str() {
                            debug!(last_poll_at = %last_poll, "skipping poll, last run is recent");
                            return Ok(0);
                        }
                    }
                    Err(error) => {
                        warn!(last_poll_at = %last_poll, %error, "unreadable poll timestamp, polling anyway");
                    }
                }
            }
        }
        // Stamped before any network work so an overlapping trigger backs off.
        self.store.set_setting(LAST_POLL_KEY, &now_rfc3339()).await?;

        let feeds = self.store.list_active_feeds().await?;
        let feed_count = feeds.len();
        let mut tasks = JoinSet::new();
        for feed in feeds {
            let store = self.store.clone();
            let fetcher = self.fetcher.clone();
            let deadline = self.fetch_deadline;
            tasks.spawn(async move {
                let feed_id = feed.id;
                let feed_title = feed.title.clone();
                match refresh_feed(&store, &fetcher, feed, deadline).await {
                    Ok(added) => added,
                    Err(error) => {
                        warn!(feed_id, feed_title = %feed_title, %error, "feed poll failed");
                        0
                    }
                }
            });
        }

        let mut added_total = 0_usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(added) => added_total += added,
                Err(join_error) => {
                    if join_error.is_panic() {
                        std::panic::resume_unwind(join_error.into_panic());
                    }
                    warn!(%join_error, "feed poll task cancelled");
                }
            }
        }
        info!(feeds = feed_count, added = added_total, "poll run finished");

        if options.notify && added_total > 0 {
            let message = if added_total == 1 {
                "1 new entry".to_string()
            } else {
                format!("{added_total} new entries")
            };
            notifier.show("Feeds refreshed", &message, None);
        }
        Ok(added_total)
    }
}

async fn refresh_feed(
    store: &Store,
    fetcher: &FeedFetcher,
    feed: FeedRecord,
    deadline: Duration,
) -> Result<usize, PollFeedError> {
    // The most recent URL in the redirect history is the one to poll.
    let url = feed.urls.last().cloned().ok_or_else(|| {
        StoreError::InvalidState(format!("feed {} has no URL", feed.id))
    })?;

    let fetched = fetcher
        .fetch_with_retry(
            &url,
            deadline,
            None,
            feed.date_last_modified.as_deref(),
            FETCH_RETRIES,
        )
        .await?;
    let payload = match fetched {
        FetchStatus::Updated(payload) => payload,
        FetchStatus::NotModified => {
            debug!(feed_id = feed.id, "feed not modified");
            store
                .record_fetch_metadata(feed.id, FetchMetadata::default())
                .await?;
            return Ok(0);
        }
    };

    let parsed = parse_feed_bytes(&payload.body)?;
    let entries = coerce_entries(&parsed);
    let outcome = store.merge_entries(feed.id, &entries).await?;

    let resolved_url = if normalize_url(&payload.final_url) != normalize_url(&url) {
        Some(payload.final_url.clone())
    } else {
        None
    };
    store
        .record_fetch_metadata(
            feed.id,
            FetchMetadata {
                resolved_url,
                last_modified: payload.last_modified.clone(),
            },
        )
        .await?;

    debug!(
        feed_id = feed.id,
        processed = outcome.processed,
        added = outcome.added,
        "feed refreshed"
    );
    Ok(outcome.added)
}

/// Coerces a parsed feed to storage shape, dropping entries without a link.
pub(crate) fn coerce_entries(parsed: &ParsedFeed) -> Vec<CoercedEntry> {
    parsed
        .entries
        .iter()
        .filter_map(|entry| {
            let url = entry
                .link
                .as_deref()
                .map(normalize_url)
                .filter(|url| !url.is_empty())?;
            Some(CoercedEntry {
                url,
                title: entry.title.clone(),
                author: entry.author.clone(),
                content: entry.content.clone(),
                pubdate: entry.pubdate.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::{FeedPatch, NewFeed};
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::Response;
    use axum::routing::get;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    struct AppState {
        good_requests: Arc<AtomicUsize>,
    }

    async fn good_feed(State(state): State<AppState>) -> Response {
        state.good_requests.fetch_add(1, Ordering::SeqCst);
        let mut response = Response::new(axum::body::Body::from(
            include_str!("../../fixtures/sample.rss.xml").to_string(),
        ));
        response.headers_mut().insert(
            reqwest::header::CONTENT_TYPE,
            "application/rss+xml".parse().expect("header must parse"),
        );
        response
    }

    async fn broken_feed() -> (StatusCode, &'static str) {
        (StatusCode::INTERNAL_SERVER_ERROR, "boom")
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    async fn spawn_test_server() -> (String, Arc<AtomicUsize>, tokio::task::JoinHandle<()>) {
        init_tracing();
        let good_requests = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route("/good.xml", get(good_feed))
            .route("/bad.xml", get(broken_feed))
            .with_state(AppState {
                good_requests: good_requests.clone(),
            });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let address = listener.local_addr().expect("local addr should exist");
        let join_handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("server should run");
        });
        (format!("http://{address}"), good_requests, join_handle)
    }

    fn test_config() -> SyncConfig {
        SyncConfig {
            recency_period: Duration::from_secs(300),
            fetch_timeout: Duration::from_secs(5),
            ..SyncConfig::default()
        }
    }

    struct RecordingNotifier {
        messages: Mutex<Vec<String>>,
    }

    impl Notifier for RecordingNotifier {
        fn show(&self, _title: &str, message: &str, _icon_url: Option<&str>) {
            self.messages
                .lock()
                .expect("lock must not be poisoned")
                .push(message.to_string());
        }
    }

    #[tokio::test]
    async fn poll_isolates_failing_feeds_and_merges_the_rest() {
        let (base, _good_requests, server_task) = spawn_test_server().await;
        let store = Store::connect("sqlite::memory:")
            .await
            .expect("connect must succeed");
        let good = store
            .create_feed(NewFeed {
                urls: vec![format!("{base}/good.xml")],
                title: Some("Good".to_string()),
                ..NewFeed::default()
            })
            .await
            .expect("create good feed");
        store
            .create_feed(NewFeed {
                urls: vec![format!("{base}/bad.xml")],
                title: Some("Bad".to_string()),
                ..NewFeed::default()
            })
            .await
            .expect("create bad feed");

        let poller = Poller::new(store.clone(), &test_config()).expect("poller must build");
        let added = poller
            .poll_feeds(PollOptions::default())
            .await
            .expect("poll must succeed despite the failing feed");
        assert_eq!(added, 3);

        let entries = store.list_entries(Some(good.id)).await.expect("list");
        assert_eq!(entries.len(), 3);
        let refreshed = store.get_feed_by_id(good.id).await.expect("fetch feed");
        assert!(refreshed.date_fetched.is_some());

        server_task.abort();
    }

    #[tokio::test]
    async fn recency_guard_suppresses_back_to_back_runs() {
        let (base, good_requests, server_task) = spawn_test_server().await;
        let store = Store::connect("sqlite::memory:")
            .await
            .expect("connect must succeed");
        store
            .create_feed(NewFeed {
                urls: vec![format!("{base}/good.xml")],
                title: Some("Good".to_string()),
                ..NewFeed::default()
            })
            .await
            .expect("create feed");

        let poller = Poller::new(store.clone(), &test_config()).expect("poller must build");
        let first = poller
            .poll_feeds(PollOptions::default())
            .await
            .expect("first poll");
        assert_eq!(first, 3);
        let requests_after_first = good_requests.load(Ordering::SeqCst);

        let second = poller
            .poll_feeds(PollOptions::default())
            .await
            .expect("second poll");
        assert_eq!(second, 0);
        assert_eq!(good_requests.load(Ordering::SeqCst), requests_after_first);

        // Forcing bypasses the guard; the merge stays idempotent.
        let forced = poller
            .poll_feeds(PollOptions {
                ignore_recency_check: true,
                notify: false,
            })
            .await
            .expect("forced poll");
        assert_eq!(forced, 0);
        assert!(good_requests.load(Ordering::SeqCst) > requests_after_first);

        server_task.abort();
    }

    #[tokio::test]
    async fn corrupt_poll_timestamp_counts_as_never_polled() {
        let (base, good_requests, server_task) = spawn_test_server().await;
        let store = Store::connect("sqlite::memory:")
            .await
            .expect("connect must succeed");
        store
            .create_feed(NewFeed {
                urls: vec![format!("{base}/good.xml")],
                title: Some("Good".to_string()),
                ..NewFeed::default()
            })
            .await
            .expect("create feed");
        store
            .set_setting(LAST_POLL_KEY, "zzz-not-a-timestamp")
            .await
            .expect("seed bad timestamp");

        let poller = Poller::new(store.clone(), &test_config()).expect("poller must build");
        let added = poller
            .poll_feeds(PollOptions::default())
            .await
            .expect("poll must run despite the bad timestamp");
        assert_eq!(added, 3);
        assert!(good_requests.load(Ordering::SeqCst) > 0);

        // The bad value has been replaced with a readable one.
        let stamped = store
            .get_setting(LAST_POLL_KEY)
            .await
            .expect("get")
            .expect("timestamp must be stamped");
        assert!(DateTime::parse_from_rfc3339(&stamped).is_ok());

        server_task.abort();
    }

    #[tokio::test]
    #[should_panic(expected = "sanitizer invariant violated")]
    async fn task_panics_fail_the_whole_poll() {
        struct PanickingSanitizer;

        impl crate::sanitize::Sanitizer for PanickingSanitizer {
            fn sanitize(&self, _html: &str) -> String {
                panic!("sanitizer invariant violated");
            }
        }

        let (base, _good_requests, _server_task) = spawn_test_server().await;
        let store = Store::connect_with("sqlite::memory:", Arc::new(PanickingSanitizer))
            .await
            .expect("connect must succeed");
        store
            .create_feed(NewFeed {
                urls: vec![format!("{base}/good.xml")],
                title: Some("Good".to_string()),
                ..NewFeed::default()
            })
            .await
            .expect("create feed");

        let poller = Poller::new(store, &test_config()).expect("poller must build");
        // The merge path runs the sanitizer inside the per-feed task; the
        // resulting panic must resurface here instead of counting as zero.
        let _ = poller.poll_feeds(PollOptions::default()).await;
    }

    #[tokio::test]
    async fn inactive_feeds_are_not_polled() {
        let (base, good_requests, server_task) = spawn_test_server().await;
        let store = Store::connect("sqlite::memory:")
            .await
            .expect("connect must succeed");
        let feed = store
            .create_feed(NewFeed {
                urls: vec![format!("{base}/good.xml")],
                title: Some("Good".to_string()),
                ..NewFeed::default()
            })
            .await
            .expect("create feed");
        store
            .patch_feed(
                feed.id,
                FeedPatch {
                    active: Some(false),
                    deactivation_reason: Some("paused".to_string()),
                    ..FeedPatch::default()
                },
            )
            .await
            .expect("deactivate");

        let poller = Poller::new(store.clone(), &test_config()).expect("poller must build");
        let added = poller
            .poll_feeds(PollOptions::default())
            .await
            .expect("poll must succeed");
        assert_eq!(added, 0);
        assert_eq!(good_requests.load(Ordering::SeqCst), 0);

        server_task.abort();
    }

    #[tokio::test]
    async fn notify_reports_the_aggregate_count() {
        let (base, _good_requests, server_task) = spawn_test_server().await;
        let store = Store::connect("sqlite::memory:")
            .await
            .expect("connect must succeed");
        store
            .create_feed(NewFeed {
                urls: vec![format!("{base}/good.xml")],
                title: Some("Good".to_string()),
                ..NewFeed::default()
            })
            .await
            .expect("create feed");

        let poller = Poller::new(store.clone(), &test_config()).expect("poller must build");
        let notifier = RecordingNotifier {
            messages: Mutex::new(Vec::new()),
        };
        let added = poller
            .poll_feeds_with(
                PollOptions {
                    ignore_recency_check: true,
                    notify: true,
                },
                &notifier,
            )
            .await
            .expect("poll must succeed");
        assert_eq!(added, 3);
        assert_eq!(
            notifier.messages.lock().expect("lock").as_slice(),
            ["3 new entries"]
        );

        // A run that adds nothing stays quiet.
        poller
            .poll_feeds_with(
                PollOptions {
                    ignore_recency_check: true,
                    notify: true,
                },
                &notifier,
            )
            .await
            .expect("second poll must succeed");
        assert_eq!(notifier.messages.lock().expect("lock").len(), 1);

        server_task.abort();
    }
}
