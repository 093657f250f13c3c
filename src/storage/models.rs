use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Read lifecycle of an entry. Transitions one way: UNREAD to READ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ReadState {
    Unread,
    Read,
}

/// Archive lifecycle of an entry. UNARCHIVED to ARCHIVED, terminal, and only
/// reachable from READ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ArchiveState {
    Unarchived,
    Archived,
}

/// A persisted feed. `urls` is the ordered redirect history, most recent
/// last; it lives in its own table and is loaded alongside the row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FeedRecord {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub link: Option<String>,
    pub feed_type: Option<String>,
    pub is_active: bool,
    pub deactivate_date: Option<String>,
    pub deactivation_reason: Option<String>,
    pub favicon_url: Option<String>,
    pub date_published: Option<String>,
    pub date_fetched: Option<String>,
    pub date_last_modified: Option<String>,
    pub date_created: String,
    pub date_updated: Option<String>,
    #[sqlx(skip)]
    pub urls: Vec<String>,
}

/// A persisted entry. Archived entries keep only the projection fields;
/// title, author and content are nulled out.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EntryRecord {
    pub id: i64,
    pub feed_id: i64,
    pub title: Option<String>,
    pub author: Option<String>,
    pub content: Option<String>,
    pub read_state: ReadState,
    pub archive_state: ArchiveState,
    pub date_read: Option<String>,
    pub date_archived: Option<String>,
    pub pubdate: Option<String>,
    pub date_created: String,
    pub date_updated: Option<String>,
    #[sqlx(skip)]
    pub urls: Vec<String>,
}

/// Input shape for feed creation. Title and description are scrubbed by the
/// store before persisting.
#[derive(Debug, Clone, Default)]
pub struct NewFeed {
    pub urls: Vec<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
    pub feed_type: Option<String>,
    pub favicon_url: Option<String>,
    pub date_published: Option<String>,
    pub date_fetched: Option<String>,
    pub date_last_modified: Option<String>,
}

/// A parsed entry coerced to the storage schema; `url` is the normalized
/// dedup key.
#[derive(Debug, Clone)]
pub struct CoercedEntry {
    pub url: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub content: Option<String>,
    pub pubdate: Option<String>,
}

/// Partial update for a feed. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct FeedPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
    pub favicon_url: Option<String>,
    /// `Some(true)` activates, `Some(false)` deactivates. Re-applying the
    /// current state is rejected.
    pub active: Option<bool>,
    /// Recorded when deactivating.
    pub deactivation_reason: Option<String>,
}

/// Poll-driven feed metadata refresh.
#[derive(Debug, Clone, Default)]
pub struct FetchMetadata {
    /// Set when the fetch resolved to a different URL than requested; the
    /// URL is appended to the feed's redirect history.
    pub resolved_url: Option<String>,
    pub last_modified: Option<String>,
}

/// Result of a merge pass: entries examined vs. entries newly stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    pub processed: usize,
    pub added: usize,
}
