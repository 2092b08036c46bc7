//! Event transcoding
//!
//! Turns a raw [`MutationRecord`] into an [`OutboundEvent`]: an event type
//! plus a normalized JSON payload. Records that cannot be typed are skipped,
//! not treated as errors.

pub mod normalize;

use bson::{Bson, Document};
use serde::Serialize;
use tracing::debug;

use crate::feed::MutationRecord;

pub use normalize::{normalize, normalize_document};

/// A typed event ready for the wire
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundEvent {
    pub event_type: String,
    pub payload: serde_json::Value,
}

/// How an endpoint derives the event type of a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcoder {
    /// Document field carrying the event type
    type_field: Option<String>,
    /// Label used when the field is absent
    fixed_type: Option<String>,
}

impl Transcoder {
    /// Event type read from `field`; untyped records are skipped
    pub fn from_field(field: impl Into<String>) -> Self {
        Self {
            type_field: Some(field.into()),
            fixed_type: None,
        }
    }

    /// Every record gets the same event type
    pub fn fixed(label: impl Into<String>) -> Self {
        Self {
            type_field: None,
            fixed_type: Some(label.into()),
        }
    }

    /// Use `label` for records whose type field is missing
    pub fn with_fallback(mut self, label: impl Into<String>) -> Self {
        self.fixed_type = Some(label.into());
        self
    }

    /// Map a record to an outbound event, or `None` to skip it
    pub fn transcode(&self, record: &MutationRecord) -> Option<OutboundEvent> {
        let Some(document) = record.document.as_ref() else {
            debug!("Skipping '{}' mutation without a document", record.kind);
            return None;
        };

        let Some(event_type) = self.event_type(document) else {
            debug!("Skipping '{}' mutation without a usable event type", record.kind);
            return None;
        };

        Some(OutboundEvent {
            event_type,
            payload: normalize_document(document),
        })
    }

    fn event_type(&self, document: &Document) -> Option<String> {
        let from_field = self
            .type_field
            .as_deref()
            .and_then(|field| match document.get(field) {
                Some(Bson::String(s)) => Some(s.as_str()),
                _ => None,
            })
            .filter(|s| is_frameable(s));

        from_field
            .or_else(|| self.fixed_type.as_deref().filter(|s| is_frameable(s)))
            .map(str::to_string)
    }
}

/// An event type must fit on the `event:` line
fn is_frameable(event_type: &str) -> bool {
    !event_type.is_empty() && !event_type.contains(['\n', '\r'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use serde_json::json;

    #[test]
    fn test_type_from_method_field() {
        let t = Transcoder::from_field("method");
        let event = t
            .transcode(&MutationRecord::insert(
                doc! { "owner": "u1", "method": "insert", "value": 7 },
            ))
            .unwrap();
        assert_eq!(event.event_type, "insert");
        assert_eq!(event.payload, json!({ "owner": "u1", "method": "insert", "value": 7 }));
    }

    #[test]
    fn test_untyped_records_are_skipped() {
        let t = Transcoder::from_field("method");
        assert!(t.transcode(&MutationRecord::insert(doc! { "owner": "u1", "value": 7 })).is_none());
        assert!(t.transcode(&MutationRecord::insert(doc! { "method": 5 })).is_none());
        assert!(t.transcode(&MutationRecord::insert(doc! { "method": "" })).is_none());
        assert!(t
            .transcode(&MutationRecord::insert(doc! { "method": "a\nevent: forged" }))
            .is_none());
        assert!(t
            .transcode(&MutationRecord { kind: "delete".into(), document: None })
            .is_none());
    }

    #[test]
    fn test_fixed_and_fallback_labels() {
        let fixed = Transcoder::fixed("vespa");
        let event = fixed
            .transcode(&MutationRecord::insert(doc! { "method": "ignored", "n": 1 }))
            .unwrap();
        assert_eq!(event.event_type, "vespa");

        let fallback = Transcoder::from_field("method").with_fallback("change");
        let typed = fallback
            .transcode(&MutationRecord::insert(doc! { "method": "update" }))
            .unwrap();
        let untyped = fallback.transcode(&MutationRecord::insert(doc! { "n": 1 })).unwrap();
        assert_eq!(typed.event_type, "update");
        assert_eq!(untyped.event_type, "change");
    }
}
