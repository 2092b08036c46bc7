//! Change-feed abstraction
//!
//! A change-feed source turns a [`FeedRequest`] (collection, filter,
//! projection) into a live [`FeedCursor`]. The cursor is pulled one record
//! at a time:
//!
//! - `Some(Ok(record))` - the next mutation, in source order
//! - `Some(Err(e))` - the feed failed; the cursor is unusable afterwards
//! - `None` - the feed ended
//!
//! Sources may hand back documents carrying more fields than the projection
//! lists (the filter field in particular); narrowing to the allow-list is the
//! subscription's job.

pub mod filter;
pub mod memory;

use async_trait::async_trait;
use bson::Document;

pub use filter::{lookup, FieldFilter, Projection};
pub use memory::{MemoryChangeFeed, MemoryCursorStats};

/// Errors raised by a change-feed source or cursor
#[derive(Debug, Clone, thiserror::Error)]
pub enum FeedError {
    /// The backing store could not be reached
    #[error("feed unavailable: {0}")]
    Unavailable(String),

    /// The filter or projection was rejected by the store
    #[error("invalid feed request: {0}")]
    InvalidRequest(String),

    /// The store reported a failure while the cursor was being read
    #[error("feed operation failed: {0}")]
    Operation(String),

    /// The consumer fell behind and records were dropped
    #[error("cursor lagged behind the feed by {0} records")]
    Lagged(u64),
}

impl From<FeedError> for crate::types::GatewayError {
    fn from(err: FeedError) -> Self {
        Self::Feed(err.to_string())
    }
}

/// What to watch
#[derive(Debug, Clone, PartialEq)]
pub struct FeedRequest {
    /// Collection to watch
    pub collection: String,
    /// Ownership predicate; fixed for the life of the cursor
    pub filter: FieldFilter,
    /// Optional allow-list of document fields
    pub projection: Option<Projection>,
}

/// One raw mutation as captured by the feed
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRecord {
    /// Store operation type (insert, update, replace, delete, ...)
    pub kind: String,
    /// The full document, when the store attached one
    pub document: Option<Document>,
}

impl MutationRecord {
    /// An insert carrying `document`
    pub fn insert(document: Document) -> Self {
        Self {
            kind: "insert".to_string(),
            document: Some(document),
        }
    }
}

/// A live, positioned subscription to a change feed
///
/// Owned by exactly one connection. `close` must be idempotent.
#[async_trait]
pub trait FeedCursor: Send {
    /// Wait for the next record
    async fn next(&mut self) -> Option<Result<MutationRecord, FeedError>>;

    /// Release the cursor; later calls are no-ops
    fn close(&mut self);
}

/// Anything that can open filtered change-feed cursors
#[async_trait]
pub trait ChangeFeedSource: Send + Sync {
    /// Open a cursor for `request`
    async fn open(&self, request: &FeedRequest) -> Result<Box<dyn FeedCursor>, FeedError>;
}
