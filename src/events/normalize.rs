//! BSON → JSON normalization for outbound payloads
//!
//! The mapping is total over BSON: every value produces some JSON value.
//! Store identifiers become hex strings and timestamps become RFC 3339 text;
//! documents keep their key order.

use base64::Engine as _;
use bson::{Bson, Document};
use chrono::SecondsFormat;
use serde_json::{Map, Number, Value};

/// Normalize a whole document into a JSON object
pub fn normalize_document(doc: &Document) -> Value {
    let mut map = Map::with_capacity(doc.len());
    for (key, value) in doc {
        map.insert(key.clone(), normalize(value));
    }
    Value::Object(map)
}

/// Normalize a single BSON value
pub fn normalize(value: &Bson) -> Value {
    match value {
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::DateTime(dt) => {
            Value::String(dt.to_chrono().to_rfc3339_opts(SecondsFormat::Millis, true))
        }
        Bson::Document(doc) => normalize_document(doc),
        Bson::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        Bson::String(s) => Value::String(s.clone()),
        Bson::Boolean(b) => Value::Bool(*b),
        Bson::Int32(n) => Value::Number((*n).into()),
        Bson::Int64(n) => Value::Number((*n).into()),
        // JSON has no NaN or infinity
        Bson::Double(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
        Bson::Binary(bin) => {
            Value::String(base64::engine::general_purpose::STANDARD.encode(&bin.bytes))
        }
        Bson::Null | Bson::Undefined => Value::Null,
        other => other.clone().into_relaxed_extjson(),
    }
}
