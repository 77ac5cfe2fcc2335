//! Common types used across store operations.
//!
//! Items are JSON objects. Each table names one key attribute whose string
//! value identifies the item; everything else about an item is opaque to the
//! store.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single stored record: a JSON object holding at least the table's key attribute.
pub type Item = Map<String, Value>;

/// Default name of the key attribute.
pub const DEFAULT_KEY_ATTRIBUTE: &str = "id";

/// Table definition used when creating or recreating a table.
///
/// # Examples
///
/// ```
/// use keysign_storage::TableSchema;
///
/// let schema = TableSchema::new("signature");
/// assert_eq!(schema.key_attribute(), "id");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
pub struct TableSchema {
    /// Table name.
    #[builder(into)]
    name: String,
    /// Attribute holding each item's identifier.
    #[builder(into, default = DEFAULT_KEY_ATTRIBUTE.to_owned())]
    key_attribute: String,
}

impl TableSchema {
    /// Creates a schema keyed by [`DEFAULT_KEY_ATTRIBUTE`].
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), key_attribute: DEFAULT_KEY_ATTRIBUTE.to_owned() }
    }

    /// Returns the table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the key attribute name.
    #[must_use]
    pub fn key_attribute(&self) -> &str {
        &self.key_attribute
    }
}

/// Condition evaluated against each item during a scan.
///
/// Filters are applied after an item has been read, so a filtered page may
/// contain fewer items than were evaluated (possibly none) while still carrying
/// a continuation token.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// The attribute is present.
    Exists(String),
    /// The attribute is absent.
    NotExists(String),
    /// The attribute is present and equal to the value.
    Equals(String, Value),
    /// Every inner filter matches.
    And(Vec<Filter>),
    /// At least one inner filter matches.
    Or(Vec<Filter>),
    /// The inner filter does not match.
    Not(Box<Filter>),
}

impl Filter {
    /// Shorthand for [`Filter::Exists`].
    #[must_use]
    pub fn exists(attribute: impl Into<String>) -> Self {
        Self::Exists(attribute.into())
    }

    /// Shorthand for [`Filter::NotExists`].
    #[must_use]
    pub fn not_exists(attribute: impl Into<String>) -> Self {
        Self::NotExists(attribute.into())
    }

    /// Shorthand for [`Filter::Equals`].
    #[must_use]
    pub fn equals(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Equals(attribute.into(), value.into())
    }

    /// Returns whether `item` satisfies this filter.
    #[must_use]
    pub fn matches(&self, item: &Item) -> bool {
        match self {
            Self::Exists(attr) => item.contains_key(attr),
            Self::NotExists(attr) => !item.contains_key(attr),
            Self::Equals(attr, value) => item.get(attr) == Some(value),
            Self::And(filters) => filters.iter().all(|f| f.matches(item)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(item)),
            Self::Not(filter) => !filter.matches(item),
        }
    }
}

/// Opaque cursor returned with a scan page when more items remain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContinuationToken(String);

impl ContinuationToken {
    /// Wraps a store-specific cursor value.
    #[must_use]
    pub fn new(cursor: impl Into<String>) -> Self {
        Self(cursor.into())
    }

    /// Returns the raw cursor value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Parameters for one scan page request.
#[derive(Debug, Clone, Default, PartialEq, bon::Builder)]
pub struct ScanRequest {
    /// Only items matching this filter are returned.
    pub filter: Option<Filter>,
    /// Attributes to keep on each returned item. `None` returns whole items.
    pub projection: Option<Vec<String>>,
    /// Resume after this cursor. `None` starts from the beginning.
    pub start_after: Option<ContinuationToken>,
}

impl ScanRequest {
    /// Returns a copy of this request resuming after `token`.
    #[must_use]
    pub fn resume(&self, token: Option<ContinuationToken>) -> Self {
        Self { start_after: token, ..self.clone() }
    }
}

/// One page of scan results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanPage {
    /// Items on this page, after filtering and projection.
    pub items: Vec<Item>,
    /// Cursor for the next page; `None` when the scan is complete.
    pub next: Option<ContinuationToken>,
}

/// Reads the key attribute of `item` as a string.
#[must_use]
pub fn item_key<'a>(item: &'a Item, key_attribute: &str) -> Option<&'a str> {
    item.get(key_attribute).and_then(Value::as_str)
}

/// Keeps only the attributes listed in `projection`.
#[must_use]
pub fn project(item: &Item, projection: &[String]) -> Item {
    projection
        .iter()
        .filter_map(|attr| item.get(attr).map(|v| (attr.clone(), v.clone())))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn item(value: Value) -> Item {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn test_filter_matches() {
        let signed = item(json!({"id": "doc-000001", "keyId": "k1"}));
        let unsigned = item(json!({"id": "doc-000002"}));

        assert!(Filter::exists("keyId").matches(&signed));
        assert!(Filter::not_exists("keyId").matches(&unsigned));
        assert!(Filter::equals("keyId", "k1").matches(&signed));
        assert!(!Filter::equals("keyId", "k2").matches(&signed));
        assert!(Filter::Not(Box::new(Filter::exists("keyId"))).matches(&unsigned));
        assert!(
            Filter::Or(vec![Filter::exists("keyId"), Filter::equals("id", "doc-000002")])
                .matches(&unsigned)
        );
        assert!(
            !Filter::And(vec![Filter::exists("id"), Filter::exists("keyId")]).matches(&unsigned)
        );
    }

    #[test]
    fn test_projection_drops_unlisted_and_missing() {
        let full = item(json!({"id": "a", "content": "hello", "extra": 1}));
        let projected = project(&full, &["id".to_owned(), "missing".to_owned()]);
        assert_eq!(Value::Object(projected), json!({"id": "a"}));
    }

    #[test]
    fn test_schema_builder_defaults_key_attribute() {
        let schema = TableSchema::builder().name("key").build();
        assert_eq!(schema, TableSchema::new("key"));
    }

    #[test]
    fn test_scan_request_resume_keeps_filter() {
        let request = ScanRequest::builder()
            .filter(Filter::exists("id"))
            .projection(vec!["id".to_owned()])
            .build();
        let next = request.resume(Some(ContinuationToken::new("abc")));
        assert_eq!(next.filter, request.filter);
        assert_eq!(next.projection, Some(vec!["id".to_owned()]));
        assert_eq!(next.start_after.as_ref().map(ContinuationToken::as_str), Some("abc"));
    }
}
