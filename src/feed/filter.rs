//! Field filters and projections over BSON documents
//!
//! Paths are dotted (`user_data.pgroup`). The same values are used to build
//! the store-side pipeline and to re-check records inside the gateway.

use bson::{Bson, Document};

/// Resolve a dotted path inside a document
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Bson::Document(inner) => inner.get(part)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Predicate "string field at `path` equals `value`"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFilter {
    path: String,
    value: String,
}

impl FieldFilter {
    pub fn new(path: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Whether `doc` satisfies the predicate
    pub fn matches(&self, doc: &Document) -> bool {
        matches!(lookup(doc, &self.path), Some(Bson::String(s)) if *s == self.value)
    }
}

/// Allow-list of document fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    paths: Vec<String>,
}

impl Projection {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// Copy of `doc` holding only allow-listed fields, in source order
    pub fn apply(&self, doc: &Document) -> Document {
        let paths: Vec<&str> = self.paths.iter().map(String::as_str).collect();
        project(doc, &paths)
    }
}

fn project(doc: &Document, paths: &[&str]) -> Document {
    let mut out = Document::new();
    for (key, value) in doc {
        if paths.iter().any(|p| *p == key.as_str()) {
            out.insert(key.clone(), value.clone());
            continue;
        }

        let nested: Vec<&str> = paths
            .iter()
            .filter_map(|p| p.strip_prefix(key.as_str())?.strip_prefix('.'))
            .collect();
        if nested.is_empty() {
            continue;
        }

        match value {
            Bson::Document(inner) => {
                out.insert(key.clone(), project(inner, &nested));
            }
            Bson::Array(items) => {
                let projected: Vec<Bson> = items
                    .iter()
                    .filter_map(|item| match item {
                        Bson::Document(inner) => Some(Bson::Document(project(inner, &nested))),
                        _ => None,
                    })
                    .collect();
                out.insert(key.clone(), projected);
            }
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_lookup_nested() {
        let d = doc! { "user_data": { "pgroup": "p1", "mergeId": 3 }, "n": 1 };
        assert_eq!(lookup(&d, "user_data.pgroup"), Some(&Bson::String("p1".into())));
        assert_eq!(lookup(&d, "n"), Some(&Bson::Int32(1)));
        assert_eq!(lookup(&d, "n.deeper"), None);
        assert_eq!(lookup(&d, "missing"), None);
    }

    #[test]
    fn test_filter_requires_exact_string() {
        let f = FieldFilter::new("userAccount", "u1");
        assert!(f.matches(&doc! { "userAccount": "u1" }));
        assert!(!f.matches(&doc! { "userAccount": "u10" }));
        assert!(!f.matches(&doc! { "userAccount": 1 }));
        assert!(!f.matches(&doc! { "other": "u1" }));
    }

    #[test]
    fn test_projection_keeps_only_listed_fields() {
        let p = Projection::new(["_id", "user_data.mergeId", "filename"]);
        let d = doc! {
            "_id": 1,
            "secret": "x",
            "user_data": { "pgroup": "p1", "mergeId": 7 },
            "filename": "a.h5",
        };
        assert_eq!(
            p.apply(&d),
            doc! { "_id": 1, "user_data": { "mergeId": 7 }, "filename": "a.h5" }
        );
    }

    #[test]
    fn test_projection_descends_into_arrays() {
        let p = Projection::new(["runs.id"]);
        let d = doc! { "runs": [ { "id": 1, "x": 2 }, 5, { "x": 3 } ] };
        assert_eq!(p.apply(&d), doc! { "runs": [ { "id": 1 }, {} ] });
    }

    #[test]
    fn test_prefix_is_not_a_parent() {
        // "user" must not be treated as the parent of "user_data.mergeId"
        let p = Projection::new(["user_data.mergeId"]);
        let d = doc! { "user": { "mergeId": 1 } };
        assert_eq!(p.apply(&d), Document::new());
    }
}
