use std::time::Duration;

use reqwest::header::{IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};

/// Connect timeout applied to every request.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 5;

/// Maximum accepted feed payload size.
const MAX_FEED_SIZE: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct FetchedFeed {
    pub body: Vec<u8>,
    /// URL the request actually resolved to, after redirects.
    pub final_url: String,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

#[derive(Debug, Clone)]
pub enum FetchStatus {
    Updated(FetchedFeed),
    NotModified,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(reqwest::Error),
    #[error("fetch deadline exceeded")]
    Timeout,
    #[error("unexpected status code: {0}")]
    HttpStatus(u16),
    #[error("feed too large: {size} bytes (max {limit})")]
    TooLarge { size: u64, limit: u64 },
}

impl From<reqwest::Error> for FetchError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Request(error)
        }
    }
}

/// HTTP fetch primitive shared by the poller and the subscribe path. Each
/// call carries its own deadline; a timed-out request is abandoned, not
/// cancelled mid-flight.
#[derive(Debug, Clone)]
pub struct FeedFetcher {
    client: reqwest::Client,
}

impl FeedFetcher {
    pub fn new(user_agent: &str) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(user_agent)
            .build()
            .map_err(FetchError::Request)?;
        Ok(Self { client })
    }

    /// Fetches a feed with conditional-request headers. Returns
    /// [`FetchStatus::NotModified`] on a 304.
    pub async fn fetch(
        &self,
        url: &str,
        deadline: Duration,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> Result<FetchStatus, FetchError> {
        let mut request = self.client.get(url).timeout(deadline);
        if let Some(value) = etag {
            request = request.header(IF_NONE_MATCH, value);
        }
        if let Some(value) = last_modified {
            request = request.header(IF_MODIFIED_SINCE, value);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.as_u16() == 304 {
            return Ok(FetchStatus::NotModified);
        }
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        if let Some(length) = response.content_length() {
            if length > MAX_FEED_SIZE {
                return Err(FetchError::TooLarge {
                    size: length,
                    limit: MAX_FEED_SIZE,
                });
            }
        }

        let final_url = response.url().to_string();
        let etag = header_string(&response, reqwest::header::ETAG);
        let last_modified = header_string(&response, LAST_MODIFIED);
        let content_type = header_string(&response, reqwest::header::CONTENT_TYPE);
        let body = response.bytes().await?.to_vec();
        if body.len() as u64 > MAX_FEED_SIZE {
            return Err(FetchError::TooLarge {
                size: body.len() as u64,
                limit: MAX_FEED_SIZE,
            });
        }

        Ok(FetchStatus::Updated(FetchedFeed {
            body,
            final_url,
            content_type,
            etag,
            last_modified,
        }))
    }

    /// Retries transient failures (connection errors, 5xx) with a short
    /// backoff. Client errors and timeouts are not retried.
    pub async fn fetch_with_retry(
        &self,
        url: &str,
        deadline: Duration,
        etag: Option<&str>,
        last_modified: Option<&str>,
        max_retries: usize,
    ) -> Result<FetchStatus, FetchError> {
        let mut attempt = 0_usize;
        loop {
            match self.fetch(url, deadline, etag, last_modified).await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    let should_retry = matches!(err, FetchError::Request(_))
                        || matches!(err, FetchError::HttpStatus(code) if code >= 500);
                    if !should_retry || attempt >= max_retries {
                        return Err(err);
                    }
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(40 * attempt as u64)).await;
                }
            }
        }
    }
}

fn header_string(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::{Redirect, Response};
    use axum::routing::get;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const ETAG: &str = "\"feedsync-feed-v1\"";
    const LAST_MOD: &str = "Mon, 24 Aug 2026 10:00:00 GMT";

    #[derive(Clone)]
    struct AppState {
        request_count: Arc<AtomicUsize>,
    }

    async fn feed_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
        let counter = state.request_count.fetch_add(1, Ordering::SeqCst);

        if counter == 0 {
            let mut response =
                Response::new(axum::body::Body::from("temporary failure".to_string()));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            return response;
        }

        if headers
            .get(IF_NONE_MATCH)
            .and_then(|value| value.to_str().ok())
            == Some(ETAG)
        {
            let mut response = Response::new(axum::body::Body::empty());
            *response.status_mut() = StatusCode::NOT_MODIFIED;
            return response;
        }

        let mut response = Response::new(axum::body::Body::from(
            include_str!("../../fixtures/sample.rss.xml").to_string(),
        ));
        *response.status_mut() = StatusCode::OK;
        response.headers_mut().insert(
            reqwest::header::CONTENT_TYPE,
            "application/rss+xml".parse().expect("header must parse"),
        );
        response
            .headers_mut()
            .insert(reqwest::header::ETAG, ETAG.parse().expect("header must parse"));
        response
            .headers_mut()
            .insert(LAST_MODIFIED, LAST_MOD.parse().expect("header must parse"));
        response
    }

    async fn spawn_test_server() -> (String, tokio::task::JoinHandle<()>) {
        let state = AppState {
            request_count: Arc::new(AtomicUsize::new(0)),
        };
        let app = Router::new()
            .route("/feed.xml", get(feed_handler))
            .route("/moved", get(|| async { Redirect::permanent("/feed.xml") }))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let address = listener.local_addr().expect("local addr should exist");
        let join_handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("server should run");
        });
        (format!("http://{address}"), join_handle)
    }

    #[tokio::test]
    async fn fetch_supports_retry_and_conditional_headers() {
        let (base, server_task) = spawn_test_server().await;
        let fetcher = FeedFetcher::new("feedsync-test").expect("client must build");
        let url = format!("{base}/feed.xml");
        let deadline = Duration::from_secs(5);

        let first = fetcher
            .fetch_with_retry(&url, deadline, None, None, 2)
            .await
            .expect("first fetch should succeed with retry");
        let updated = match first {
            FetchStatus::Updated(payload) => payload,
            FetchStatus::NotModified => panic!("first fetch should be updated"),
        };
        assert!(updated.body.starts_with(b"<?xml"));
        assert_eq!(updated.content_type.as_deref(), Some("application/rss+xml"));
        assert_eq!(updated.etag.as_deref(), Some(ETAG));

        let second = fetcher
            .fetch_with_retry(
                &url,
                deadline,
                updated.etag.as_deref(),
                updated.last_modified.as_deref(),
                0,
            )
            .await
            .expect("second fetch should succeed");
        assert!(matches!(second, FetchStatus::NotModified));

        server_task.abort();
    }

    #[tokio::test]
    async fn fetch_reports_redirect_resolved_url() {
        let (base, server_task) = spawn_test_server().await;
        let fetcher = FeedFetcher::new("feedsync-test").expect("client must build");

        let fetched = fetcher
            .fetch_with_retry(
                &format!("{base}/moved"),
                Duration::from_secs(5),
                None,
                None,
                2,
            )
            .await
            .expect("redirected fetch should succeed");
        let payload = match fetched {
            FetchStatus::Updated(payload) => payload,
            FetchStatus::NotModified => panic!("expected a body"),
        };
        assert!(payload.final_url.ends_with("/feed.xml"));

        server_task.abort();
    }
}
