//! Feed-synchronization engine.
//!
//! The crate is built from four cooperating pieces:
//!
//! - [`storage::repository::Store`]: transactional persistence for feeds and
//!   entries over SQLite, with cascade deletes, dedup-by-URL merges and
//!   age-based archival.
//! - [`sync::Poller`]: a recency-guarded orchestrator that refreshes every
//!   active feed concurrently and isolates per-feed failures.
//! - [`favicon::FaviconCache`]: a TTL cache mapping page URLs to icon URLs.
//! - [`subscription::Subscriber`]: atomic feed creation with redirect-aware
//!   dedup, and cascading unsubscribe.
//!
//! Mutations are announced on a typed broadcast channel, see
//! [`events::StoreEvent`].

pub mod config;
pub mod events;
pub mod favicon;
pub mod feed;
pub mod sanitize;
pub mod storage;
pub mod subscription;
pub mod sync;

pub use config::SyncConfig;
pub use events::StoreEvent;
pub use favicon::FaviconCache;
pub use storage::repository::{Store, StoreError};
pub use subscription::{SubscribeError, Subscriber};
pub use sync::{PollOptions, Poller};
