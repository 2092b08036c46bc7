//! Subscription management
//!
//! Builds the per-account feed request for each stream endpoint and wraps
//! the resulting cursor in a [`Subscription`] that:
//!
//! - re-checks the ownership filter on every record
//! - narrows documents to the endpoint's projection
//! - closes the cursor exactly once, on `close()` or on drop

use std::sync::Arc;
use tracing::{debug, info};

use crate::events::Transcoder;
use crate::feed::{
    ChangeFeedSource, FeedCursor, FeedError, FeedRequest, FieldFilter, MutationRecord, Projection,
};

/// Marker stripped from account ids before building a group
pub const GROUP_ACCOUNT_MARKER: char = 'e';
/// Prefix of every group identifier
pub const GROUP_PREFIX: &str = "p";
/// Document field carrying the group for the vespa stream
pub const GROUP_FIELD: &str = "user_data.pgroup";
/// Event type of the generic stream
pub const METHOD_FIELD: &str = "method";
/// Event type of every vespa frame
pub const VESPA_EVENT_TYPE: &str = "vespa";

/// Fields of a vespa document that clients may see
pub const VESPA_PROJECTION: [&str; 9] = [
    "_id",
    "user_data.crystfelMinPixCount",
    "user_data.crystfelMinSNR",
    "user_data.crystfelThreshold",
    "numberOfImages",
    "numberOfImagesIndexed",
    "user_data.mergeId",
    "filename",
    "createdOn",
];

/// Derive the group identifier for an account
///
/// One leading `e` is dropped if present, then `p` is prepended:
/// `e12345` and `12345` both become `p12345`.
pub fn group_for_account(account_id: &str) -> String {
    let base = account_id
        .strip_prefix(GROUP_ACCOUNT_MARKER)
        .unwrap_or(account_id);
    format!("{}{}", GROUP_PREFIX, base)
}

/// The stream endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// `/event-stream`: every mutation owned by the account, typed by `method`
    Events,
    /// `/vespa-stream`: projected processing results for the account's group
    Vespa,
}

impl StreamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Events => "event-stream",
            StreamKind::Vespa => "vespa-stream",
        }
    }
}

/// Collections and field names the manager builds requests from
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    pub stream_collection: String,
    pub vespa_collection: String,
    pub owner_field: String,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            stream_collection: "events".to_string(),
            vespa_collection: "vespa".to_string(),
            owner_field: "userAccount".to_string(),
        }
    }
}

/// Everything needed to serve one stream for one account
#[derive(Debug, Clone, PartialEq)]
pub struct StreamPlan {
    pub kind: StreamKind,
    pub request: FeedRequest,
    pub transcoder: Transcoder,
}

/// Opens one subscription per connection
pub struct SubscriptionManager {
    source: Arc<dyn ChangeFeedSource>,
    config: SubscriptionConfig,
}

impl SubscriptionManager {
    pub fn new(source: Arc<dyn ChangeFeedSource>, config: SubscriptionConfig) -> Self {
        Self { source, config }
    }

    pub fn config(&self) -> &SubscriptionConfig {
        &self.config
    }

    /// Build the plan for `kind` and an already-authorized account
    pub fn plan(&self, kind: StreamKind, account_id: &str) -> StreamPlan {
        match kind {
            StreamKind::Events => StreamPlan {
                kind,
                request: FeedRequest {
                    collection: self.config.stream_collection.clone(),
                    filter: FieldFilter::new(self.config.owner_field.clone(), account_id),
                    projection: None,
                },
                transcoder: Transcoder::from_field(METHOD_FIELD),
            },
            StreamKind::Vespa => StreamPlan {
                kind,
                request: FeedRequest {
                    collection: self.config.vespa_collection.clone(),
                    filter: FieldFilter::new(GROUP_FIELD, group_for_account(account_id)),
                    projection: Some(Projection::new(VESPA_PROJECTION)),
                },
                transcoder: Transcoder::fixed(VESPA_EVENT_TYPE),
            },
        }
    }

    /// Open the subscription for `kind` and `account_id`
    ///
    /// Open failures are returned to the caller; there is no retry here.
    pub async fn open(
        &self,
        kind: StreamKind,
        account_id: &str,
    ) -> Result<Subscription, FeedError> {
        let plan = self.plan(kind, account_id);
        let cursor = self.source.open(&plan.request).await?;

        info!(
            "Watching '{}' for {} = {}",
            plan.request.collection,
            plan.request.filter.path(),
            plan.request.filter.value()
        );

        Ok(Subscription {
            cursor,
            plan,
            open: true,
        })
    }
}

/// A live cursor bound to one connection
pub struct Subscription {
    cursor: Box<dyn FeedCursor>,
    plan: StreamPlan,
    open: bool,
}

impl Subscription {
    pub fn plan(&self) -> &StreamPlan {
        &self.plan
    }

    pub fn transcoder(&self) -> &Transcoder {
        &self.plan.transcoder
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Next record owned by this subscription, projected
    ///
    /// Records the feed delivers for other owners are dropped here.
    pub async fn next(&mut self) -> Option<Result<MutationRecord, FeedError>> {
        if !self.open {
            return None;
        }
        loop {
            let mut record = match self.cursor.next().await? {
                Ok(record) => record,
                Err(e) => return Some(Err(e)),
            };

            if let Some(doc) = record.document.as_ref() {
                if !self.plan.request.filter.matches(doc) {
                    debug!(
                        "Dropping '{}' record not owned by {}",
                        record.kind,
                        self.plan.request.filter.value()
                    );
                    continue;
                }
                if let Some(projection) = &self.plan.request.projection {
                    record.document = Some(projection.apply(doc));
                }
            }

            return Some(Ok(record));
        }
    }

    /// Release the cursor; later calls are no-ops
    pub fn close(&mut self) {
        if self.open {
            self.open = false;
            self.cursor.close();
            info!(
                "Cursor on '{}' released for {}",
                self.plan.request.collection,
                self.plan.request.filter.value()
            );
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{MemoryChangeFeed, MutationRecord};
    use bson::doc;
    use futures::FutureExt;

    fn manager(feed: Arc<MemoryChangeFeed>) -> SubscriptionManager {
        SubscriptionManager::new(
            feed,
            SubscriptionConfig {
                stream_collection: "events".into(),
                vespa_collection: "vespa".into(),
                owner_field: "owner".into(),
            },
        )
    }

    #[test]
    fn test_group_for_account() {
        assert_eq!(group_for_account("e12345"), "p12345");
        assert_eq!(group_for_account("12345"), "p12345");
        assert_eq!(group_for_account("ee1"), "pe1");
        assert_eq!(group_for_account("p1"), "pp1");
        assert_eq!(group_for_account(""), "p");
    }

    #[test]
    fn test_plans() {
        let m = manager(Arc::new(MemoryChangeFeed::default()));

        let events = m.plan(StreamKind::Events, "u1");
        assert_eq!(events.request.collection, "events");
        assert_eq!(events.request.filter, FieldFilter::new("owner", "u1"));
        assert!(events.request.projection.is_none());

        let vespa = m.plan(StreamKind::Vespa, "e12345");
        assert_eq!(vespa.request.collection, "vespa");
        assert_eq!(vespa.request.filter, FieldFilter::new("user_data.pgroup", "p12345"));
        assert_eq!(vespa.request.projection.as_ref().unwrap().paths().len(), 9);
        assert_eq!(vespa.transcoder, Transcoder::fixed("vespa"));
    }

    #[tokio::test]
    async fn test_vespa_subscription_projects_documents() {
        let feed = Arc::new(MemoryChangeFeed::default());
        let m = manager(Arc::clone(&feed));
        let mut sub = m.open(StreamKind::Vespa, "e42").await.unwrap();

        feed.publish(
            "vespa",
            MutationRecord::insert(doc! {
                "_id": 1,
                "filename": "run.h5",
                "secret": "hidden",
                "user_data": { "pgroup": "p42", "mergeId": 9, "notes": "x" },
            }),
        );

        let record = sub.next().await.unwrap().unwrap();
        assert_eq!(
            record.document.unwrap(),
            doc! { "_id": 1, "filename": "run.h5", "user_data": { "mergeId": 9 } }
        );
    }

    #[tokio::test]
    async fn test_foreign_records_never_surface() {
        struct LeakyCursor(Vec<MutationRecord>);

        #[async_trait::async_trait]
        impl FeedCursor for LeakyCursor {
            async fn next(&mut self) -> Option<Result<MutationRecord, FeedError>> {
                if self.0.is_empty() {
                    None
                } else {
                    Some(Ok(self.0.remove(0)))
                }
            }
            fn close(&mut self) {}
        }

        struct LeakySource;

        #[async_trait::async_trait]
        impl ChangeFeedSource for LeakySource {
            async fn open(&self, _: &FeedRequest) -> Result<Box<dyn FeedCursor>, FeedError> {
                Ok(Box::new(LeakyCursor(vec![
                    MutationRecord::insert(doc! { "owner": "u2", "method": "insert" }),
                    MutationRecord::insert(doc! { "owner": "u1", "method": "update" }),
                ])))
            }
        }

        let m = SubscriptionManager::new(
            Arc::new(LeakySource),
            SubscriptionConfig {
                owner_field: "owner".into(),
                ..Default::default()
            },
        );
        let mut sub = m.open(StreamKind::Events, "u1").await.unwrap();

        let only = sub.next().await.unwrap().unwrap();
        assert_eq!(only.document.unwrap().get_str("method").unwrap(), "update");
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_close_and_drop_release_once() {
        let feed = Arc::new(MemoryChangeFeed::default());
        let stats = feed.stats();
        let m = manager(Arc::clone(&feed));

        let mut sub = m.open(StreamKind::Events, "u1").await.unwrap();
        sub.close();
        sub.close();
        assert!(!sub.is_open());
        assert!(sub.next().now_or_never().unwrap().is_none());
        drop(sub);
        assert_eq!(stats.closed(), 1);

        let sub = m.open(StreamKind::Events, "u1").await.unwrap();
        drop(sub);
        assert_eq!(stats.open_cursors(), 0);
    }

    #[tokio::test]
    async fn test_open_failure_is_returned() {
        let feed = Arc::new(MemoryChangeFeed::default());
        feed.set_unavailable(true);
        let m = manager(Arc::clone(&feed));
        assert!(matches!(
            m.open(StreamKind::Events, "u1").await,
            Err(FeedError::Unavailable(_))
        ));
        assert_eq!(feed.stats().opened(), 0);
    }
}
