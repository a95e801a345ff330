//! Host collaborator seam.
//!
//! The resolution engine never owns content. It asks the host to look items
//! up by id and to turn whatever shape a surface hands over (an id, a flat
//! record, a native object) into a [`ContentItem`].

use std::collections::BTreeMap;

use serde_json::Value;

use crate::types::{ContentItem, ItemId, ID_KEY};

/// Content storage and normalization provided by the host system.
pub trait ContentHost {
    /// Look an item up by id. Returns an owned copy; the host's own instance
    /// is never handed out for mutation.
    fn get_item(&self, id: &ItemId) -> Option<ContentItem>;

    /// Normalize a heterogeneous input into a content item.
    ///
    /// The default accepts a full record (`{"id", "type", ...}`), a bare
    /// `{"id": ..}` reference, or an id scalar; the latter two are looked up.
    fn as_content_item(&self, raw: &Value) -> Option<ContentItem> {
        match raw {
            Value::Object(map) => ContentItem::from_value(raw).or_else(|| {
                map.get(ID_KEY)
                    .or_else(|| map.get("ID"))
                    .and_then(ItemId::from_value)
                    .and_then(|id| self.get_item(&id))
            }),
            Value::Number(_) | Value::String(_) => {
                ItemId::from_value(raw).and_then(|id| self.get_item(&id))
            }
            _ => None,
        }
    }
}

/// In-memory host backed by a map of items.
#[derive(Debug, Clone, Default)]
pub struct MemoryHost {
    items: BTreeMap<ItemId, ContentItem>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a host holding `items`; later duplicates replace earlier ones.
    pub fn from_items(items: impl IntoIterator<Item = ContentItem>) -> Self {
        let mut host = Self::new();
        for item in items {
            host.insert(item);
        }
        host
    }

    pub fn insert(&mut self, item: ContentItem) {
        self.items.insert(item.id.clone(), item);
    }

    /// Borrow the stored instance without copying it.
    pub fn peek(&self, id: &ItemId) -> Option<&ContentItem> {
        self.items.get(id)
    }

    /// All stored items of `item_type`, in id order.
    pub fn items_of_type(&self, item_type: &str) -> Vec<ContentItem> {
        self.items
            .values()
            .filter(|item| item.item_type == item_type)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl ContentHost for MemoryHost {
    fn get_item(&self, id: &ItemId) -> Option<ContentItem> {
        self.items.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn host() -> MemoryHost {
        MemoryHost::from_items([
            ContentItem::new(1u64, "article").with("title", "One"),
            ContentItem::new(2u64, "page").with("title", "Two"),
        ])
    }

    #[test]
    fn normalizes_full_record() {
        let item = host()
            .as_content_item(&json!({ "id": 9, "type": "article", "title": "Nine" }))
            .unwrap();
        assert_eq!(item.id, ItemId::Number(9));
        assert_eq!(item.get_str("title"), Some("Nine"));
    }

    #[test]
    fn normalizes_id_scalar_through_lookup() {
        let item = host().as_content_item(&json!(2)).unwrap();
        assert_eq!(item.item_type, "page");
    }

    #[test]
    fn normalizes_id_reference_through_lookup() {
        let item = host().as_content_item(&json!({ "ID": 1 })).unwrap();
        assert_eq!(item.get_str("title"), Some("One"));
    }

    #[test]
    fn unknown_inputs_normalize_to_none() {
        let host = host();
        assert!(host.as_content_item(&json!(404)).is_none());
        assert!(host.as_content_item(&json!(null)).is_none());
        assert!(host.as_content_item(&json!([1])).is_none());
        assert!(host.as_content_item(&json!({ "title": "orphan" })).is_none());
    }

    #[test]
    fn items_of_type_filters() {
        let host = host();
        assert_eq!(host.len(), 2);
        assert_eq!(host.items_of_type("article").len(), 1);
        assert!(host.items_of_type("product").is_empty());
    }
}
