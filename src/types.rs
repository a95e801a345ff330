//! Core types for virtual field resolution.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Property holding a content item's identifier.
pub const ID_KEY: &str = "id";

/// Property holding a content item's type tag.
pub const TYPE_KEY: &str = "type";

/// Property holding a content item's body.
pub const CONTENT_KEY: &str = "content";

/// Property holding a revision's parent item identifier.
pub const PARENT_KEY: &str = "parent";

/// Property names a virtual field may never take.
pub const RESERVED_NAMES: &[&str] = &[ID_KEY, TYPE_KEY];

/// Returns the JSON type name for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Output surface through which content items leave the system.
///
/// Each surface has a stable tag used in exclusion lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Surface {
    /// Items returned from a general content query.
    #[serde(rename = "core")]
    BatchQuery,
    /// Per-field accessors on API responses.
    #[serde(rename = "rest")]
    FieldAccessor,
    /// API responses for revisions of a content item.
    #[serde(rename = "rest_revisions")]
    Revision,
    /// Plain records handed to an external (array-based) integration.
    #[serde(rename = "acf")]
    ExternalProjection,
}

impl Surface {
    /// All surfaces, in tag order.
    pub const ALL: [Surface; 4] = [
        Surface::BatchQuery,
        Surface::FieldAccessor,
        Surface::Revision,
        Surface::ExternalProjection,
    ];

    /// Tags accepted in exclusion lists.
    pub const ALLOWED_TAGS: [&'static str; 4] = ["core", "rest", "rest_revisions", "acf"];

    /// Returns the exclusion tag for this surface.
    pub fn tag(&self) -> &'static str {
        match self {
            Surface::BatchQuery => "core",
            Surface::FieldAccessor => "rest",
            Surface::Revision => "rest_revisions",
            Surface::ExternalProjection => "acf",
        }
    }

    /// Parse an exclusion tag.
    ///
    /// Returns `None` for unknown tags (caller should error).
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "core" => Some(Surface::BatchQuery),
            "rest" => Some(Surface::FieldAccessor),
            "rest_revisions" => Some(Surface::Revision),
            "acf" => Some(Surface::ExternalProjection),
            _ => None,
        }
    }
}

impl fmt::Display for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Stable identifier of a content item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemId {
    Number(u64),
    Text(String),
}

impl ItemId {
    /// Read an identifier from a JSON scalar.
    ///
    /// Accepts non-negative integers and non-empty strings.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_u64().map(ItemId::Number),
            Value::String(s) if !s.is_empty() => Some(ItemId::Text(s.clone())),
            _ => None,
        }
    }

    /// Convert back to the JSON scalar form.
    pub fn to_value(&self) -> Value {
        match self {
            ItemId::Number(n) => Value::from(*n),
            ItemId::Text(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemId::Number(n) => write!(f, "{}", n),
            ItemId::Text(s) => f.write_str(s),
        }
    }
}

impl From<u64> for ItemId {
    fn from(n: u64) -> Self {
        ItemId::Number(n)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        ItemId::Text(s.to_string())
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        ItemId::Text(s)
    }
}

/// A single unit of content as handed over by the host.
///
/// Serialized flat: `{"id": 7, "type": "article", "title": "...", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    #[serde(alias = "ID")]
    pub id: ItemId,
    #[serde(rename = "type", alias = "post_type")]
    pub item_type: String,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl ContentItem {
    pub fn new(id: impl Into<ItemId>, item_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            item_type: item_type.into(),
            properties: Map::new(),
        }
    }

    /// Builder-style property setter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.properties.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.properties.remove(key)
    }

    /// The parent item of a revision, if this item is one.
    pub fn parent_id(&self) -> Option<ItemId> {
        self.get(PARENT_KEY).and_then(ItemId::from_value)
    }

    /// Parse an item from a JSON object.
    ///
    /// Returns `None` if the value is not an object carrying an id and a type.
    pub fn from_value(value: &Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    /// Render the item as a flat JSON object.
    pub fn to_value(&self) -> Value {
        let mut map = Map::with_capacity(self.properties.len() + 2);
        map.insert(ID_KEY.to_string(), self.id.to_value());
        map.insert(TYPE_KEY.to_string(), Value::String(self.item_type.clone()));
        for (key, value) in &self.properties {
            map.insert(key.clone(), value.clone());
        }
        Value::Object(map)
    }
}

/// Evaluation state of one item for one field within a resolution chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    /// The field's derived value is being computed for this item.
    Processing,
    /// The computation has returned (successfully or not).
    Processed,
}

/// Why a field was not attached to an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    ExcludedForSurface,
    RecursionDepthExceeded,
    SecondaryQueryTopLevelOnly,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::ExcludedForSurface => "excluded-for-surface",
            SkipReason::RecursionDepthExceeded => "recursion-depth-exceeded",
            SkipReason::SecondaryQueryTopLevelOnly => "secondary-query-top-level-only",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Describes the content query whose results are being resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryContext {
    /// Content type the query asked for, when it asked for one.
    pub content_type: Option<String>,
    /// True for secondary queries issued while assembling another response.
    pub nested: bool,
}

impl QueryContext {
    /// Top-level query for the given content type.
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            content_type: Some(content_type.into()),
            nested: false,
        }
    }

    /// Top-level query not restricted to a content type.
    pub fn any() -> Self {
        Self::default()
    }

    /// Mark the query as secondary (nested).
    pub fn nested(mut self, nested: bool) -> Self {
        self.nested = nested;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn surface_tags_round_trip() {
        for surface in Surface::ALL {
            assert_eq!(Surface::parse(surface.tag()), Some(surface));
        }
        assert_eq!(Surface::ALLOWED_TAGS.len(), Surface::ALL.len());
    }

    #[test]
    fn surface_parse_invalid() {
        assert_eq!(Surface::parse("bogus"), None);
        assert_eq!(Surface::parse("REST"), None);
        assert_eq!(Surface::parse(""), None);
    }

    #[test]
    fn surface_serializes_as_tag() {
        assert_eq!(
            serde_json::to_value(Surface::Revision).unwrap(),
            json!("rest_revisions")
        );
    }

    #[test]
    fn item_id_from_value() {
        assert_eq!(ItemId::from_value(&json!(42)), Some(ItemId::Number(42)));
        assert_eq!(ItemId::from_value(&json!("a-1")), Some(ItemId::from("a-1")));
        assert_eq!(ItemId::from_value(&json!(-1)), None);
        assert_eq!(ItemId::from_value(&json!("")), None);
        assert_eq!(ItemId::from_value(&json!(null)), None);
    }

    #[test]
    fn content_item_parses_flat_object() {
        let item = ContentItem::from_value(&json!({
            "id": 7,
            "type": "article",
            "title": "Hello"
        }))
        .unwrap();
        assert_eq!(item.id, ItemId::Number(7));
        assert_eq!(item.item_type, "article");
        assert_eq!(item.get_str("title"), Some("Hello"));
        assert!(!item.contains("id"));
    }

    #[test]
    fn content_item_accepts_host_aliases() {
        let item = ContentItem::from_value(&json!({
            "ID": 3,
            "post_type": "page"
        }))
        .unwrap();
        assert_eq!(item.id, ItemId::Number(3));
        assert_eq!(item.item_type, "page");
    }

    #[test]
    fn content_item_rejects_incomplete_records() {
        assert!(ContentItem::from_value(&json!({ "id": 1 })).is_none());
        assert!(ContentItem::from_value(&json!([1, 2])).is_none());
        assert!(ContentItem::from_value(&json!(5)).is_none());
    }

    #[test]
    fn content_item_to_value_is_flat() {
        let item = ContentItem::new(1u64, "article").with("title", "T");
        assert_eq!(
            item.to_value(),
            json!({ "id": 1, "type": "article", "title": "T" })
        );
    }

    #[test]
    fn parent_id_reads_parent_property() {
        let revision = ContentItem::new(9u64, "revision").with(PARENT_KEY, 4);
        assert_eq!(revision.parent_id(), Some(ItemId::Number(4)));
        assert_eq!(ContentItem::new(1u64, "article").parent_id(), None);
    }

    #[test]
    fn query_context_builder() {
        let query = QueryContext::new("article").nested(true);
        assert_eq!(query.content_type.as_deref(), Some("article"));
        assert!(query.nested);
        assert_eq!(QueryContext::any().content_type, None);
        assert!(!QueryContext::any().nested);
    }

    #[test]
    fn skip_reason_strings() {
        assert_eq!(
            SkipReason::SecondaryQueryTopLevelOnly.to_string(),
            "secondary-query-top-level-only"
        );
    }
}
