//! MongoDB change streams as a change-feed source
//!
//! Each cursor is a `watch` on one collection with a `$match` on the owner
//! field and, for projected feeds, a `$project` of the allowed fields. The
//! filter field is projected too so the gateway can re-check ownership before
//! narrowing the document itself.

use async_trait::async_trait;
use bson::Document;
use futures::StreamExt;
use mongodb::change_stream::ChangeStream;
use mongodb::error::ErrorKind;
use mongodb::options::FullDocumentType;
use tracing::{debug, warn};

use crate::db::MongoClient;
use crate::feed::{ChangeFeedSource, FeedCursor, FeedError, FeedRequest, MutationRecord};

/// Prefix of the full document inside a change event
const FULL_DOCUMENT: &str = "fullDocument";

/// Build the aggregation pipeline for a feed request
pub fn build_pipeline(request: &FeedRequest) -> Vec<Document> {
    let mut matcher = Document::new();
    matcher.insert(
        format!("{}.{}", FULL_DOCUMENT, request.filter.path()),
        request.filter.value(),
    );

    let mut pipeline = vec![bson::doc! { "$match": matcher }];

    if let Some(projection) = &request.projection {
        let mut fields = bson::doc! { "operationType": 1 };
        let filter_path = request.filter.path().to_string();
        for path in projection.paths().iter().chain(std::iter::once(&filter_path)) {
            fields.insert(format!("{}.{}", FULL_DOCUMENT, path), 1);
        }
        pipeline.push(bson::doc! { "$project": fields });
    }

    pipeline
}

/// Change-feed source backed by MongoDB change streams
#[derive(Clone)]
pub struct MongoChangeFeed {
    client: MongoClient,
    update_lookup: bool,
}

impl MongoChangeFeed {
    /// `update_lookup` asks the server to attach the current document to update events
    pub fn new(client: MongoClient, update_lookup: bool) -> Self {
        Self {
            client,
            update_lookup,
        }
    }
}

#[async_trait]
impl ChangeFeedSource for MongoChangeFeed {
    async fn open(&self, request: &FeedRequest) -> Result<Box<dyn FeedCursor>, FeedError> {
        let collection = self.client.collection::<Document>(&request.collection);
        let pipeline = build_pipeline(request);
        debug!("Opening change stream on '{}': {:?}", request.collection, pipeline);

        let mut watch = collection.watch().pipeline(pipeline);
        if self.update_lookup {
            watch = watch.full_document(FullDocumentType::UpdateLookup);
        }

        let stream = watch.await.map_err(|e| {
            warn!("Failed to watch '{}': {}", request.collection, e);
            open_error(e)
        })?;

        Ok(Box::new(MongoCursor {
            stream: Some(stream.with_type::<Document>()),
        }))
    }
}

/// A server reply rejecting the command means the pipeline itself is bad
fn open_error(err: mongodb::error::Error) -> FeedError {
    match err.kind.as_ref() {
        ErrorKind::Command(cmd) => {
            FeedError::InvalidRequest(format!("{} ({}): {}", cmd.code_name, cmd.code, cmd.message))
        }
        _ => FeedError::Unavailable(err.to_string()),
    }
}

struct MongoCursor {
    stream: Option<ChangeStream<Document>>,
}

/// Split a raw change event into kind and full document
fn mutation_from_event(event: Document) -> MutationRecord {
    let kind = event
        .get_str("operationType")
        .unwrap_or("unknown")
        .to_string();
    let document = event.get_document(FULL_DOCUMENT).ok().cloned();
    MutationRecord { kind, document }
}

#[async_trait]
impl FeedCursor for MongoCursor {
    async fn next(&mut self) -> Option<Result<MutationRecord, FeedError>> {
        let stream = self.stream.as_mut()?;
        match stream.next().await? {
            Ok(event) => Some(Ok(mutation_from_event(event))),
            Err(e) => Some(Err(FeedError::Operation(e.to_string()))),
        }
    }

    fn close(&mut self) {
        // Dropping the stream kills the server-side cursor
        self.stream.take();
    }
}
