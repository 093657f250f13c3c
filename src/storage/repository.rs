use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Acquire, QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, warn};

use crate::events::{EventChannel, StoreEvent};
use crate::feed::normalize_url;
use crate::sanitize::{scrub_text, MarkupStripper, Sanitizer, MAX_DESCRIPTION_LEN, MAX_TITLE_LEN};

use super::models::{
    ArchiveState, CoercedEntry, EntryRecord, FeedPatch, FeedRecord, FetchMetadata, MergeOutcome,
    NewFeed, ReadState,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

const FEED_COLUMNS: &str = "id, title, description, link, feed_type, is_active, \
     deactivate_date, deactivation_reason, favicon_url, date_published, date_fetched, \
     date_last_modified, date_created, date_updated";

const ENTRY_COLUMNS: &str = "id, feed_id, title, author, content, read_state, archive_state, \
     date_read, date_archived, pubdate, date_created, date_updated";

/// Transactional store for feeds and entries. The pool is capped at one
/// connection; SQLite serializes conflicting transactions internally, and no
/// transaction is ever held open across a network call.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    events: EventChannel,
    sanitizer: Arc<dyn Sanitizer>,
}

impl fmt::Debug for Store {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Idempotent connect: opens the pool and applies the ordered schema
    /// migrations. Every migration statement is guarded so a step can run
    /// starting from any prior version.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        Self::connect_with(database_url, Arc::new(MarkupStripper)).await
    }

    /// As [`Store::connect`], with a caller-provided entry-content sanitizer.
    pub async fn connect_with(
        database_url: &str,
        sanitizer: Arc<dyn Sanitizer>,
    ) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self {
            pool,
            events: EventChannel::default(),
            sanitizer,
        })
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // Feed operations

    /// Creates a feed with its URL list in one transaction. Titles and
    /// descriptions are scrubbed before persisting. A URL already claimed by
    /// any feed fails the whole creation with [`StoreError::Constraint`].
    pub async fn create_feed(&self, feed: NewFeed) -> Result<FeedRecord, StoreError> {
        let mut urls: Vec<String> = Vec::new();
        for raw in &feed.urls {
            let url = normalize_url(raw);
            if !url.is_empty() && !urls.contains(&url) {
                urls.push(url);
            }
        }
        if urls.is_empty() {
            return Err(StoreError::InvalidState(
                "feed requires at least one URL".to_string(),
            ));
        }

        let title = scrub_text(feed.title.as_deref().unwrap_or(""), MAX_TITLE_LEN);
        let description = feed
            .description
            .as_deref()
            .map(|text| scrub_text(text, MAX_DESCRIPTION_LEN))
            .filter(|text| !text.is_empty());
        let now = now_rfc3339();

        let id;
        {
            let mut tx = self.pool.begin().await?;
            id = sqlx::query(
                r#"
                INSERT INTO feeds (title, description, link, feed_type, is_active, favicon_url,
                                   date_published, date_fetched, date_last_modified, date_created)
                VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?7, ?8, ?9)
                "#,
            )
            .bind(&title)
            .bind(&description)
            .bind(&feed.link)
            .bind(&feed.feed_type)
            .bind(&feed.favicon_url)
            .bind(&feed.date_published)
            .bind(&feed.date_fetched)
            .bind(&feed.date_last_modified)
            .bind(&now)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

            for (position, url) in urls.iter().enumerate() {
                sqlx::query("INSERT INTO feed_urls (feed_id, url, position) VALUES (?1, ?2, ?3)")
                    .bind(id)
                    .bind(url)
                    .bind(position as i64)
                    .execute(&mut *tx)
                    .await
                    .map_err(|error| {
                        if is_unique_violation(&error) {
                            StoreError::Constraint(format!("url {url} already belongs to a feed"))
                        } else {
                            StoreError::Database(error)
                        }
                    })?;
            }
            tx.commit().await?;
        }

        self.events.emit(StoreEvent::FeedCreated { id });
        self.get_feed_by_id(id).await
    }

    pub async fn get_feed_by_id(&self, id: i64) -> Result<FeedRecord, StoreError> {
        let sql = format!("SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?1");
        let mut record = sqlx::query_as::<_, FeedRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("feed {id}")))?;
        record.urls = self.feed_urls(id).await?;
        Ok(record)
    }

    /// Key-only lookup by any URL in a feed's redirect history.
    pub async fn feed_id_by_url(&self, url: &str) -> Result<Option<i64>, StoreError> {
        let id = sqlx::query_scalar::<_, i64>("SELECT feed_id FROM feed_urls WHERE url = ?1")
            .bind(normalize_url(url))
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn get_feed_by_url(&self, url: &str) -> Result<FeedRecord, StoreError> {
        match self.feed_id_by_url(url).await? {
            Some(id) => self.get_feed_by_id(id).await,
            None => Err(StoreError::NotFound(format!("feed with url {url}"))),
        }
    }

    pub async fn list_feeds(&self) -> Result<Vec<FeedRecord>, StoreError> {
        let sql = format!("SELECT {FEED_COLUMNS} FROM feeds ORDER BY id");
        let rows = sqlx::query_as::<_, FeedRecord>(&sql)
            .fetch_all(&self.pool)
            .await?;
        self.attach_feed_urls(rows).await
    }

    pub async fn list_active_feeds(&self) -> Result<Vec<FeedRecord>, StoreError> {
        let sql = format!("SELECT {FEED_COLUMNS} FROM feeds WHERE is_active = 1 ORDER BY id");
        let rows = sqlx::query_as::<_, FeedRecord>(&sql)
            .fetch_all(&self.pool)
            .await?;
        self.attach_feed_urls(rows).await
    }

    /// Transactional read-modify-write. Re-applying the current activation
    /// state is rejected; activating clears the deactivation fields,
    /// deactivating stamps `deactivate_date`.
    pub async fn patch_feed(&self, id: i64, patch: FeedPatch) -> Result<FeedRecord, StoreError> {
        let now = now_rfc3339();
        {
            let mut tx = self.pool.begin().await?;
            let sql = format!("SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?1");
            let current = sqlx::query_as::<_, FeedRecord>(&sql)
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("feed {id}")))?;

            let title = match &patch.title {
                Some(raw) => scrub_text(raw, MAX_TITLE_LEN),
                None => current.title.clone(),
            };
            let description = match &patch.description {
                Some(raw) => {
                    Some(scrub_text(raw, MAX_DESCRIPTION_LEN)).filter(|text| !text.is_empty())
                }
                None => current.description.clone(),
            };
            let link = patch.link.clone().or_else(|| current.link.clone());
            let favicon_url = patch
                .favicon_url
                .clone()
                .or_else(|| current.favicon_url.clone());

            let (is_active, deactivate_date, deactivation_reason) = match patch.active {
                None => (
                    current.is_active,
                    current.deactivate_date.clone(),
                    current.deactivation_reason.clone(),
                ),
                Some(true) => {
                    if current.is_active {
                        return Err(StoreError::InvalidState(format!(
                            "feed {id} is already active"
                        )));
                    }
                    // Activation clears the deactivation fields.
                    (true, None, None)
                }
                Some(false) => {
                    if !current.is_active {
                        return Err(StoreError::InvalidState(format!(
                            "feed {id} is already inactive"
                        )));
                    }
                    (false, Some(now.clone()), patch.deactivation_reason.clone())
                }
            };

            sqlx::query(
                r#"
                UPDATE feeds
                SET title = ?1, description = ?2, link = ?3, favicon_url = ?4,
                    is_active = ?5, deactivate_date = ?6, deactivation_reason = ?7,
                    date_updated = ?8
                WHERE id = ?9
                "#,
            )
            .bind(&title)
            .bind(&description)
            .bind(&link)
            .bind(&favicon_url)
            .bind(is_active)
            .bind(&deactivate_date)
            .bind(&deactivation_reason)
            .bind(&now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
        }

        self.events.emit(StoreEvent::FeedUpdated { id });
        self.get_feed_by_id(id).await
    }

    /// Poll-driven metadata refresh: stamps `date_fetched`, records the
    /// upstream Last-Modified, and appends a redirect-resolved URL to the
    /// feed's URL list when it is not claimed yet.
    pub async fn record_fetch_metadata(
        &self,
        id: i64,
        metadata: FetchMetadata,
    ) -> Result<(), StoreError> {
        let now = now_rfc3339();
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE feeds SET date_fetched = ?1, \
             date_last_modified = COALESCE(?2, date_last_modified), date_updated = ?1 \
             WHERE id = ?3",
        )
        .bind(&now)
        .bind(&metadata.last_modified)
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if updated == 0 {
            return Err(StoreError::NotFound(format!("feed {id}")));
        }

        if let Some(raw) = &metadata.resolved_url {
            let url = normalize_url(raw);
            let owner = sqlx::query_scalar::<_, i64>("SELECT feed_id FROM feed_urls WHERE url = ?1")
                .bind(&url)
                .fetch_optional(&mut *tx)
                .await?;
            match owner {
                Some(_) => {}
                None => {
                    sqlx::query(
                        r#"
                        INSERT INTO feed_urls (feed_id, url, position)
                        VALUES (?1, ?2, (SELECT COALESCE(MAX(position), -1) + 1
                                         FROM feed_urls WHERE feed_id = ?1))
                        "#,
                    )
                    .bind(id)
                    .bind(&url)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }
        tx.commit().await?;
        Ok(())
    }

    /// Deletes the feed and every entry referencing it in one transaction,
    /// then emits one `feed-deleted` followed by one `entry-deleted` per
    /// cascaded entry. Returns the number of cascaded entries.
    pub async fn delete_feed(&self, id: i64, reason: &str) -> Result<u64, StoreError> {
        let entry_ids: Vec<i64>;
        {
            let mut tx = self.pool.begin().await?;
            let exists = sqlx::query_scalar::<_, i64>("SELECT id FROM feeds WHERE id = ?1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
            if exists.is_none() {
                return Err(StoreError::NotFound(format!("feed {id}")));
            }

            entry_ids = sqlx::query_scalar("SELECT id FROM entries WHERE feed_id = ?1 ORDER BY id")
                .bind(id)
                .fetch_all(&mut *tx)
                .await?;
            sqlx::query(
                "DELETE FROM entry_urls WHERE entry_id IN (SELECT id FROM entries WHERE feed_id = ?1)",
            )
            .bind(id)
            .execute(&mut *tx)
            .await?;
            sqlx::query("DELETE FROM entries WHERE feed_id = ?1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM feed_urls WHERE feed_id = ?1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM feeds WHERE id = ?1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
        }

        self.events.emit(StoreEvent::FeedDeleted {
            id,
            reason: reason.to_string(),
        });
        for entry_id in &entry_ids {
            self.events.emit(StoreEvent::EntryDeleted {
                id: *entry_id,
                reason: reason.to_string(),
            });
        }
        Ok(entry_ids.len() as u64)
    }

    // Entry operations

    /// Merges coerced entries into a feed. One outer transaction with a
    /// savepoint per entry: a URL uniqueness violation rolls back only that
    /// entry (we already have it) and the merge continues.
    pub async fn merge_entries(
        &self,
        feed_id: i64,
        entries: &[CoercedEntry],
    ) -> Result<MergeOutcome, StoreError> {
        let now = now_rfc3339();
        let mut added_ids = Vec::new();
        let mut processed = 0_usize;
        {
            let mut tx = self.pool.begin().await?;
            let exists = sqlx::query_scalar::<_, i64>("SELECT id FROM feeds WHERE id = ?1")
                .bind(feed_id)
                .fetch_optional(&mut *tx)
                .await?;
            if exists.is_none() {
                return Err(StoreError::NotFound(format!("feed {feed_id}")));
            }

            for entry in entries {
                processed += 1;
                let url = normalize_url(&entry.url);
                if url.is_empty() {
                    debug!(feed_id, "skipping entry without a URL");
                    continue;
                }
                let title = entry
                    .title
                    .as_deref()
                    .map(|raw| scrub_text(raw, MAX_TITLE_LEN))
                    .filter(|scrubbed| !scrubbed.is_empty());
                let content = entry
                    .content
                    .as_deref()
                    .map(|html| self.sanitizer.sanitize(html));

                let mut savepoint = tx.begin().await?;
                let inserted = insert_entry(
                    &mut savepoint,
                    feed_id,
                    &url,
                    title.as_deref(),
                    entry.author.as_deref(),
                    content.as_deref(),
                    entry.pubdate.as_deref(),
                    &now,
                )
                .await;
                match inserted {
                    Ok(entry_id) => {
                        savepoint.commit().await?;
                        added_ids.push(entry_id);
                    }
                    Err(error) if is_unique_violation(&error) => {
                        savepoint.rollback().await?;
                        debug!(feed_id, url = %url, "entry already present, skipping");
                    }
                    Err(error) => return Err(StoreError::Database(error)),
                }
            }
            tx.commit().await?;
        }

        for entry_id in &added_ids {
            self.events.emit(StoreEvent::EntryAdded { id: *entry_id });
        }
        Ok(MergeOutcome {
            processed,
            added: added_ids.len(),
        })
    }

    pub async fn get_entry_by_id(&self, id: i64) -> Result<EntryRecord, StoreError> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = ?1");
        let mut record = sqlx::query_as::<_, EntryRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("entry {id}")))?;
        record.urls = self.entry_urls(id).await?;
        Ok(record)
    }

    /// Lists entries, optionally restricted to one feed, newest first.
    pub async fn list_entries(&self, feed_id: Option<i64>) -> Result<Vec<EntryRecord>, StoreError> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM entries WHERE (?1 IS NULL OR feed_id = ?1) \
             ORDER BY COALESCE(pubdate, date_created) DESC, id DESC"
        );
        let mut rows = sqlx::query_as::<_, EntryRecord>(&sql)
            .bind(feed_id)
            .fetch_all(&self.pool)
            .await?;

        let url_rows: Vec<(i64, String)> =
            sqlx::query_as("SELECT entry_id, url FROM entry_urls ORDER BY entry_id, position")
                .fetch_all(&self.pool)
                .await?;
        let mut by_entry: HashMap<i64, Vec<String>> = HashMap::new();
        for (entry_id, url) in url_rows {
            by_entry.entry(entry_id).or_default().push(url);
        }
        for row in &mut rows {
            row.urls = by_entry.remove(&row.id).unwrap_or_default();
        }
        Ok(rows)
    }

    /// UNREAD to READ, one direction only.
    pub async fn mark_entry_read(&self, id: i64) -> Result<EntryRecord, StoreError> {
        {
            let mut tx = self.pool.begin().await?;
            let state =
                sqlx::query_scalar::<_, ReadState>("SELECT read_state FROM entries WHERE id = ?1")
                    .bind(id)
                    .fetch_optional(&mut *tx)
                    .await?;
            match state {
                None => return Err(StoreError::NotFound(format!("entry {id}"))),
                Some(ReadState::Read) => {
                    return Err(StoreError::InvalidState(format!(
                        "entry {id} is already read"
                    )))
                }
                Some(ReadState::Unread) => {}
            }

            let now = now_rfc3339();
            sqlx::query(
                "UPDATE entries SET read_state = ?1, date_read = ?2, date_updated = ?3 WHERE id = ?4",
            )
            .bind(ReadState::Read)
            .bind(&now)
            .bind(&now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
        }

        self.events.emit(StoreEvent::EntryMarkedRead { id });
        self.get_entry_by_id(id).await
    }

    /// Scans the `(archive_state, read_state)` index for read, unarchived
    /// entries older than `max_age` and replaces each with the minimal
    /// archived projection. The whole sweep commits as one transaction.
    pub async fn archive_entries(&self, max_age: StdDuration) -> Result<usize, StoreError> {
        let cutoff = cutoff_rfc3339(max_age);
        let now = now_rfc3339();
        let mut archived_ids = Vec::new();
        {
            let mut tx = self.pool.begin().await?;
            let sql = format!(
                "SELECT {ENTRY_COLUMNS} FROM entries \
                 WHERE archive_state = ?1 AND read_state = ?2 AND date_created <= ?3 \
                 ORDER BY id"
            );
            let candidates = sqlx::query_as::<_, EntryRecord>(&sql)
                .bind(ArchiveState::Unarchived)
                .bind(ReadState::Read)
                .bind(&cutoff)
                .fetch_all(&mut *tx)
                .await?;

            for mut candidate in candidates {
                candidate.urls =
                    sqlx::query_scalar("SELECT url FROM entry_urls WHERE entry_id = ?1 ORDER BY position")
                        .bind(candidate.id)
                        .fetch_all(&mut *tx)
                        .await?;
                let before = estimated_size(&candidate);
                let projection = ArchivedProjection {
                    id: candidate.id,
                    feed_id: candidate.feed_id,
                    urls: &candidate.urls,
                    date_created: &candidate.date_created,
                    pubdate: candidate.pubdate.as_deref(),
                    date_read: candidate.date_read.as_deref(),
                };
                let after = estimated_size(&projection);
                if after >= before {
                    warn!(
                        entry_id = candidate.id,
                        before, after, "archived projection is not smaller than the original"
                    );
                }

                sqlx::query(
                    "UPDATE entries SET title = NULL, author = NULL, content = NULL, \
                     archive_state = ?1, date_archived = ?2, date_updated = ?3 WHERE id = ?4",
                )
                .bind(ArchiveState::Archived)
                .bind(&now)
                .bind(&now)
                .bind(candidate.id)
                .execute(&mut *tx)
                .await?;
                archived_ids.push(candidate.id);
            }
            tx.commit().await?;
        }

        for entry_id in &archived_ids {
            self.events.emit(StoreEvent::EntryArchived { id: *entry_id });
        }
        Ok(archived_ids.len())
    }

    /// Maintenance sweep: deletes entries that no longer carry any URL.
    pub async fn remove_lost_entries(&self) -> Result<u64, StoreError> {
        let ids: Vec<i64>;
        {
            let mut tx = self.pool.begin().await?;
            ids = sqlx::query_scalar(
                "SELECT id FROM entries WHERE id NOT IN (SELECT entry_id FROM entry_urls) ORDER BY id",
            )
            .fetch_all(&mut *tx)
            .await?;
            delete_entries_by_id(&mut tx, &ids).await?;
            tx.commit().await?;
        }
        self.emit_entry_deletions(&ids, "lost");
        Ok(ids.len() as u64)
    }

    /// Maintenance sweep: deletes entries whose feed no longer exists.
    pub async fn remove_orphaned_entries(&self) -> Result<u64, StoreError> {
        let ids: Vec<i64>;
        {
            let mut tx = self.pool.begin().await?;
            ids = sqlx::query_scalar(
                "SELECT id FROM entries WHERE feed_id NOT IN (SELECT id FROM feeds) ORDER BY id",
            )
            .fetch_all(&mut *tx)
            .await?;
            delete_entries_by_id(&mut tx, &ids).await?;
            tx.commit().await?;
        }
        self.emit_entry_deletions(&ids, "orphan");
        Ok(ids.len() as u64)
    }

    // Key-value port

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // Internals

    async fn feed_urls(&self, feed_id: i64) -> Result<Vec<String>, StoreError> {
        let urls =
            sqlx::query_scalar("SELECT url FROM feed_urls WHERE feed_id = ?1 ORDER BY position")
                .bind(feed_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(urls)
    }

    async fn entry_urls(&self, entry_id: i64) -> Result<Vec<String>, StoreError> {
        let urls =
            sqlx::query_scalar("SELECT url FROM entry_urls WHERE entry_id = ?1 ORDER BY position")
                .bind(entry_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(urls)
    }

    async fn attach_feed_urls(
        &self,
        mut rows: Vec<FeedRecord>,
    ) -> Result<Vec<FeedRecord>, StoreError> {
        let url_rows: Vec<(i64, String)> =
            sqlx::query_as("SELECT feed_id, url FROM feed_urls ORDER BY feed_id, position")
                .fetch_all(&self.pool)
                .await?;
        let mut by_feed: HashMap<i64, Vec<String>> = HashMap::new();
        for (feed_id, url) in url_rows {
            by_feed.entry(feed_id).or_default().push(url);
        }
        for row in &mut rows {
            row.urls = by_feed.remove(&row.id).unwrap_or_default();
        }
        Ok(rows)
    }

    fn emit_entry_deletions(&self, ids: &[i64], reason: &str) {
        for id in ids {
            self.events.emit(StoreEvent::EntryDeleted {
                id: *id,
                reason: reason.to_string(),
            });
        }
    }
}

#[derive(Serialize)]
struct ArchivedProjection<'a> {
    id: i64,
    feed_id: i64,
    urls: &'a [String],
    date_created: &'a str,
    pubdate: Option<&'a str>,
    date_read: Option<&'a str>,
}

#[allow(clippy::too_many_arguments)]
async fn insert_entry(
    savepoint: &mut sqlx::Transaction<'_, Sqlite>,
    feed_id: i64,
    url: &str,
    title: Option<&str>,
    author: Option<&str>,
    content: Option<&str>,
    pubdate: Option<&str>,
    now: &str,
) -> Result<i64, sqlx::Error> {
    let entry_id = sqlx::query(
        r#"
        INSERT INTO entries (feed_id, title, author, content, read_state, archive_state,
                             pubdate, date_created)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(feed_id)
    .bind(title)
    .bind(author)
    .bind(content)
    .bind(ReadState::Unread)
    .bind(ArchiveState::Unarchived)
    .bind(pubdate)
    .bind(now)
    .execute(&mut **savepoint)
    .await?
    .last_insert_rowid();

    sqlx::query("INSERT INTO entry_urls (entry_id, url, position) VALUES (?1, ?2, 0)")
        .bind(entry_id)
        .bind(url)
        .execute(&mut **savepoint)
        .await?;
    Ok(entry_id)
}

async fn delete_entries_by_id(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    ids: &[i64],
) -> Result<(), sqlx::Error> {
    if ids.is_empty() {
        return Ok(());
    }
    for table in ["entry_urls", "entries"] {
        let column = if table == "entry_urls" { "entry_id" } else { "id" };
        let mut query = QueryBuilder::<Sqlite>::new(format!("DELETE FROM {table} WHERE {column} IN ("));
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
        query.build().execute(&mut **tx).await?;
    }
    Ok(())
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn estimated_size<T: Serialize>(value: &T) -> usize {
    serde_json::to_string(value).map(|json| json.len()).unwrap_or(0)
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn cutoff_rfc3339(max_age: StdDuration) -> String {
    let age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
    let cutoff = Utc::now()
        .checked_sub_signed(age)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    cutoff.to_rfc3339_opts(SecondsFormat::Micros, true)
}
