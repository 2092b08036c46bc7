//! In-process change feed
//!
//! Collections are broadcast channels keyed by name. Publishing a record
//! fans it out to every open cursor on that collection; each cursor applies
//! its own filter, the way a store-side `$match` would. Used by tests and
//! for running the gateway without a database.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use super::{ChangeFeedSource, FeedCursor, FeedError, FeedRequest, FieldFilter, MutationRecord};

/// Default per-collection channel capacity
pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
enum FeedItem {
    Record(MutationRecord),
    Failure(String),
}

/// Cursor bookkeeping, shared with every cursor the feed hands out
#[derive(Debug, Default)]
pub struct MemoryCursorStats {
    opened: AtomicUsize,
    closed: AtomicUsize,
}

impl MemoryCursorStats {
    /// Cursors opened so far
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Cursors released so far
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Cursors currently live
    pub fn open_cursors(&self) -> usize {
        self.opened().saturating_sub(self.closed())
    }
}

/// Broadcast-backed change feed
pub struct MemoryChangeFeed {
    collections: DashMap<String, broadcast::Sender<FeedItem>>,
    capacity: usize,
    unavailable: AtomicBool,
    stats: Arc<MemoryCursorStats>,
}

impl Default for MemoryChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl MemoryChangeFeed {
    pub fn new(capacity: usize) -> Self {
        Self {
            collections: DashMap::new(),
            capacity: capacity.max(1),
            unavailable: AtomicBool::new(false),
            stats: Arc::new(MemoryCursorStats::default()),
        }
    }

    /// Cursor counters
    pub fn stats(&self) -> Arc<MemoryCursorStats> {
        Arc::clone(&self.stats)
    }

    /// Make subsequent `open` calls fail as if the store were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn sender(&self, collection: &str) -> broadcast::Sender<FeedItem> {
        self.collections
            .entry(collection.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Publish a mutation; returns how many cursors received it
    pub fn publish(&self, collection: &str, record: MutationRecord) -> usize {
        self.sender(collection)
            .send(FeedItem::Record(record))
            .unwrap_or(0)
    }

    /// Deliver an operation failure to every cursor on `collection`
    pub fn fail(&self, collection: &str, message: impl Into<String>) {
        let _ = self.sender(collection).send(FeedItem::Failure(message.into()));
    }

    /// End the feed for `collection`; open cursors drain and then report end
    pub fn end(&self, collection: &str) {
        self.collections.remove(collection);
    }
}

#[async_trait]
impl ChangeFeedSource for MemoryChangeFeed {
    async fn open(&self, request: &FeedRequest) -> Result<Box<dyn FeedCursor>, FeedError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(FeedError::Unavailable(format!(
                "collection '{}' is not reachable",
                request.collection
            )));
        }

        let rx = self.sender(&request.collection).subscribe();
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        debug!(
            "Memory cursor opened on '{}' ({} = {})",
            request.collection,
            request.filter.path(),
            request.filter.value()
        );

        Ok(Box::new(MemoryCursor {
            rx: Some(rx),
            filter: request.filter.clone(),
            stats: Arc::clone(&self.stats),
        }))
    }
}

struct MemoryCursor {
    rx: Option<broadcast::Receiver<FeedItem>>,
    filter: FieldFilter,
    stats: Arc<MemoryCursorStats>,
}

#[async_trait]
impl FeedCursor for MemoryCursor {
    async fn next(&mut self) -> Option<Result<MutationRecord, FeedError>> {
        let rx = self.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(FeedItem::Record(record)) => {
                    let wanted = record
                        .document
                        .as_ref()
                        .is_some_and(|doc| self.filter.matches(doc));
                    if wanted {
                        return Some(Ok(record));
                    }
                }
                Ok(FeedItem::Failure(message)) => return Some(Err(FeedError::Operation(message))),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    return Some(Err(FeedError::Lagged(n)))
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    fn close(&mut self) {
        if self.rx.take().is_some() {
            self.stats.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MemoryCursor {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn request(owner: &str) -> FeedRequest {
        FeedRequest {
            collection: "events".to_string(),
            filter: FieldFilter::new("owner", owner),
            projection: None,
        }
    }

    #[tokio::test]
    async fn test_cursor_sees_only_matching_records_in_order() {
        let feed = MemoryChangeFeed::default();
        let mut cursor = feed.open(&request("u1")).await.unwrap();

        feed.publish("events", MutationRecord::insert(doc! { "owner": "u1", "n": 1 }));
        feed.publish("events", MutationRecord::insert(doc! { "owner": "u2", "n": 2 }));
        feed.publish("events", MutationRecord { kind: "delete".into(), document: None });
        feed.publish("events", MutationRecord::insert(doc! { "owner": "u1", "n": 3 }));

        let first = cursor.next().await.unwrap().unwrap();
        let second = cursor.next().await.unwrap().unwrap();
        assert_eq!(first.document.unwrap().get_i32("n").unwrap(), 1);
        assert_eq!(second.document.unwrap().get_i32("n").unwrap(), 3);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_counted_once() {
        let feed = MemoryChangeFeed::default();
        let stats = feed.stats();
        let mut cursor = feed.open(&request("u1")).await.unwrap();
        assert_eq!(stats.open_cursors(), 1);

        cursor.close();
        cursor.close();
        assert!(cursor.next().await.is_none());
        drop(cursor);

        assert_eq!(stats.opened(), 1);
        assert_eq!(stats.closed(), 1);
        assert_eq!(stats.open_cursors(), 0);
    }

    #[tokio::test]
    async fn test_failure_end_and_unavailable() {
        let feed = MemoryChangeFeed::default();
        let mut cursor = feed.open(&request("u1")).await.unwrap();

        feed.fail("events", "cursor killed");
        assert!(matches!(cursor.next().await, Some(Err(FeedError::Operation(_)))));

        feed.end("events");
        assert!(cursor.next().await.is_none());

        feed.set_unavailable(true);
        assert!(matches!(
            feed.open(&request("u1")).await,
            Err(FeedError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_slow_cursor_reports_lag() {
        let feed = MemoryChangeFeed::new(2);
        let mut cursor = feed.open(&request("u1")).await.unwrap();
        for n in 0..5 {
            feed.publish("events", MutationRecord::insert(doc! { "owner": "u1", "n": n }));
        }
        assert!(matches!(cursor.next().await, Some(Err(FeedError::Lagged(3)))));
    }
}
