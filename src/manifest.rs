//! Declarative field manifests.
//!
//! A manifest describes registrations in JSON so a host (or the CLI) can set
//! up virtual fields without code. Since a manifest cannot carry functions,
//! derived values come from a small set of built-in derivations.
//!
//! ```json
//! {
//!   "registrations": [
//!     {
//!       "content_types": ["article"],
//!       "fields": [
//!         { "name": "wordCount", "derive": { "word_count": "content" } },
//!         { "name": "relatedTitles",
//!           "derive": { "related": { "key": "related", "field": "title" } },
//!           "max_recursive_depth": 1 },
//!         { "name": "brand", "value": "acme", "exclude_from": ["rest"] }
//!       ]
//!     }
//!   ]
//! }
//! ```

use serde::Deserialize;
use serde_json::{json, Value};

use crate::context::ResolutionContext;
use crate::coordinator::{Coordinator, IntoContentTypes};
use crate::error::{BoxError, ManifestError, ManifestViolation};
use crate::field::FieldDefinition;
use crate::loader::load_json_auto;
use crate::types::{ContentItem, ItemId, QueryContext, ID_KEY, TYPE_KEY};

/// Parsed manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub registrations: Vec<RegistrationSpec>,
}

/// One registration: fields bound to one or many content types.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationSpec {
    pub content_types: ContentTypesSpec,
    pub fields: Vec<FieldSpec>,
}

/// A single content type or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ContentTypesSpec {
    One(String),
    Many(Vec<String>),
}

impl IntoContentTypes for ContentTypesSpec {
    fn into_content_types(self) -> Vec<String> {
        match self {
            ContentTypesSpec::One(t) => vec![t],
            ContentTypesSpec::Many(ts) => ts,
        }
    }
}

/// One field entry.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub derive: Option<Derivation>,
    #[serde(default)]
    pub exclude_from: Vec<String>,
    #[serde(default)]
    pub max_recursive_depth: Option<i64>,
}

/// Built-in derived value functions.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Derivation {
    /// Copy the value at a JSON Pointer into the item.
    Pointer(String),
    /// Count whitespace-separated words in a string property.
    WordCount(String),
    /// Look up the items whose ids are held in `key`, resolve them through a
    /// nested query, and collect their `field` property.
    Related { key: String, field: String },
}

impl Derivation {
    fn apply(&self, field: FieldDefinition) -> FieldDefinition {
        match self.clone() {
            Derivation::Pointer(pointer) => field.simple(move |item| {
                Ok(item.to_value().pointer(&pointer).cloned().unwrap_or(Value::Null))
            }),
            Derivation::WordCount(property) => field.simple(move |item| {
                let words = item
                    .get_str(&property)
                    .map_or(0, |text| text.split_whitespace().count());
                Ok(json!(words))
            }),
            Derivation::Related { key, field: target } => {
                field.derive(move |item, ctx| related_values(item, ctx, &key, &target))
            }
        }
    }
}

fn related_values(
    item: &ContentItem,
    ctx: &mut ResolutionContext<'_>,
    key: &str,
    target: &str,
) -> Result<Value, BoxError> {
    let ids: Vec<ItemId> = match item.get(key) {
        Some(Value::Array(values)) => values.iter().filter_map(ItemId::from_value).collect(),
        Some(value) => ItemId::from_value(value).into_iter().collect(),
        None => Vec::new(),
    };

    // Items already being computed further up the chain would loop.
    let related: Vec<ContentItem> = ids
        .iter()
        .filter(|id| !ctx.in_flight(id))
        .filter_map(|id| ctx.host().get_item(id))
        .collect();

    let resolved = ctx.query(&related, &QueryContext::any().nested(true))?;
    Ok(Value::Array(
        resolved.iter().map(|r| property_of(r, target)).collect(),
    ))
}

fn property_of(item: &ContentItem, property: &str) -> Value {
    match property {
        ID_KEY => item.id.to_value(),
        TYPE_KEY => Value::String(item.item_type.clone()),
        _ => item.get(property).cloned().unwrap_or(Value::Null),
    }
}

impl FieldSpec {
    /// Build the field definition this entry describes.
    ///
    /// # Errors
    ///
    /// Returns `ManifestError` for invalid names, exclusion tags or depths,
    /// and for entries giving both `value` and `derive`.
    pub fn build(&self) -> Result<FieldDefinition, ManifestError> {
        if self.value.is_some() && self.derive.is_some() {
            return Err(ManifestError::InvalidField {
                field: self.name.clone(),
                message: "give either value or derive, not both".to_string(),
            });
        }

        let mut field = FieldDefinition::make(self.name.as_str())?.exclude_from(&self.exclude_from)?;

        if let Some(depth) = self.max_recursive_depth {
            if depth < 0 {
                return Err(ManifestError::InvalidDepth {
                    field: self.name.clone(),
                    depth,
                });
            }
            let depth = u32::try_from(depth).map_err(|_| ManifestError::InvalidField {
                field: self.name.clone(),
                message: format!("max_recursive_depth {} is too large", depth),
            })?;
            field = field.max_recursive_depth(depth);
        }

        Ok(match (&self.value, &self.derive) {
            (Some(value), _) => field.value(value.clone()),
            (None, Some(derivation)) => derivation.apply(field),
            (None, None) => field,
        })
    }
}

impl Manifest {
    /// Build a coordinator holding every registration, in manifest order.
    pub fn build(&self) -> Result<Coordinator, ManifestError> {
        let mut coordinator = Coordinator::new();
        for registration in &self.registrations {
            let fields = registration
                .fields
                .iter()
                .map(FieldSpec::build)
                .collect::<Result<Vec<_>, _>>()?;
            coordinator.register_virtual_fields(registration.content_types.clone(), fields)?;
        }
        Ok(coordinator)
    }
}

/// JSON Schema every manifest must satisfy.
///
/// Exclusion tags, names and depth bounds are checked when fields are built,
/// so their errors carry the field name.
pub fn manifest_schema() -> Value {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "type": "object",
        "required": ["registrations"],
        "additionalProperties": false,
        "properties": {
            "registrations": {
                "type": "array",
                "items": { "$ref": "#/$defs/registration" }
            }
        },
        "$defs": {
            "registration": {
                "type": "object",
                "required": ["content_types", "fields"],
                "additionalProperties": false,
                "properties": {
                    "content_types": {
                        "oneOf": [
                            { "type": "string", "minLength": 1 },
                            {
                                "type": "array",
                                "minItems": 1,
                                "items": { "type": "string", "minLength": 1 }
                            }
                        ]
                    },
                    "fields": {
                        "type": "array",
                        "minItems": 1,
                        "items": { "$ref": "#/$defs/field" }
                    }
                }
            },
            "field": {
                "type": "object",
                "required": ["name"],
                "additionalProperties": false,
                "properties": {
                    "name": { "type": "string" },
                    "value": true,
                    "derive": { "$ref": "#/$defs/derive" },
                    "exclude_from": { "type": "array", "items": { "type": "string" } },
                    "max_recursive_depth": { "type": "integer" }
                }
            },
            "derive": {
                "type": "object",
                "minProperties": 1,
                "maxProperties": 1,
                "additionalProperties": false,
                "properties": {
                    "pointer": { "type": "string" },
                    "word_count": { "type": "string" },
                    "related": {
                        "type": "object",
                        "required": ["key", "field"],
                        "additionalProperties": false,
                        "properties": {
                            "key": { "type": "string" },
                            "field": { "type": "string" }
                        }
                    }
                }
            }
        }
    })
}

/// Validate `value` against the manifest schema and parse it.
///
/// # Errors
///
/// Returns `ManifestError::Invalid` with one violation per schema error.
pub fn parse_manifest(value: &Value) -> Result<Manifest, ManifestError> {
    let schema = manifest_schema();
    let validator = jsonschema::validator_for(&schema).map_err(|e| ManifestError::Invalid {
        violations: vec![ManifestViolation {
            path: String::new(),
            message: e.to_string(),
        }],
    })?;

    let violations: Vec<ManifestViolation> = validator
        .iter_errors(value)
        .map(|e| ManifestViolation {
            path: e.instance_path.to_string(),
            message: e.to_string(),
        })
        .collect();
    if !violations.is_empty() {
        return Err(ManifestError::Invalid { violations });
    }

    serde_json::from_value(value.clone()).map_err(|e| ManifestError::Invalid {
        violations: vec![ManifestViolation {
            path: String::new(),
            message: e.to_string(),
        }],
    })
}

/// Load, validate and build a manifest from a file path or URL.
pub fn load_manifest(source: &str) -> Result<Coordinator, ManifestError> {
    let value = load_json_auto(source)?;
    parse_manifest(&value)?.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FieldError;
    use crate::host::MemoryHost;
    use crate::types::Surface;

    fn build(value: Value) -> Result<Coordinator, ManifestError> {
        parse_manifest(&value)?.build()
    }

    #[test]
    fn builds_registrations_in_order() {
        let coordinator = build(json!({
            "registrations": [
                {
                    "content_types": "article",
                    "fields": [
                        { "name": "brand", "value": "acme" },
                        { "name": "wordCount", "derive": { "word_count": "content" } }
                    ]
                },
                {
                    "content_types": ["page", "product"],
                    "fields": [{ "name": "blank" }]
                }
            ]
        }))
        .unwrap();

        let registrations = coordinator.registrations();
        assert_eq!(registrations.len(), 2);
        assert_eq!(registrations[0].content_types(), ["article"]);
        assert_eq!(registrations[1].content_types(), ["page", "product"]);
        assert_eq!(registrations[0].fields()[1].source().kind(), "simple");
        assert_eq!(registrations[1].fields()[0].source().kind(), "constant");
    }

    #[test]
    fn schema_violations_carry_paths() {
        let err = build(json!({
            "registrations": [{ "content_types": [], "fields": [{ "title": "x" }] }]
        }))
        .unwrap_err();

        match err {
            ManifestError::Invalid { violations } => {
                let paths: Vec<_> = violations.iter().map(|v| v.path.as_str()).collect();
                assert!(paths.contains(&"/registrations/0/content_types"), "{paths:?}");
                assert!(paths.iter().any(|p| p.starts_with("/registrations/0/fields/0")));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn negative_depth_rejected() {
        let err = build(json!({
            "registrations": [{
                "content_types": "article",
                "fields": [{ "name": "f", "max_recursive_depth": -1 }]
            }]
        }))
        .unwrap_err();
        assert!(matches!(err, ManifestError::InvalidDepth { depth: -1, .. }));
    }

    #[test]
    fn bad_exclusion_tag_rejected() {
        let err = build(json!({
            "registrations": [{
                "content_types": "article",
                "fields": [{ "name": "f", "exclude_from": ["bogus"] }]
            }]
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            ManifestError::Field(FieldError::InvalidExclusionTag { .. })
        ));
    }

    #[test]
    fn value_and_derive_are_exclusive() {
        let err = build(json!({
            "registrations": [{
                "content_types": "article",
                "fields": [{ "name": "f", "value": 1, "derive": { "word_count": "content" } }]
            }]
        }))
        .unwrap_err();
        assert!(matches!(err, ManifestError::InvalidField { .. }));
    }

    #[test]
    fn pointer_derivation_reads_nested_values() {
        let coordinator = build(json!({
            "registrations": [{
                "content_types": "article",
                "fields": [{ "name": "author", "derive": { "pointer": "/meta/author" } }]
            }]
        }))
        .unwrap();
        let host = MemoryHost::new();
        let mut ctx = coordinator.context(&host);
        let item = ContentItem::new(1u64, "article").with("meta", json!({ "author": "Ada" }));

        let out = coordinator
            .query(&[item], &QueryContext::new("article"), &mut ctx)
            .unwrap();
        assert_eq!(out[0].get("author"), Some(&json!("Ada")));
    }

    #[test]
    fn related_derivation_breaks_cycles() {
        let coordinator = build(json!({
            "registrations": [{
                "content_types": "article",
                "fields": [{
                    "name": "relatedTitles",
                    "derive": { "related": { "key": "related", "field": "title" } }
                }]
            }]
        }))
        .unwrap();
        let a = ContentItem::new(1u64, "article")
            .with("title", "A")
            .with("related", json!([2]));
        let b = ContentItem::new(2u64, "article")
            .with("title", "B")
            .with("related", json!([1]));
        let host = MemoryHost::from_items([a.clone(), b]);
        let mut ctx = coordinator.context(&host);

        let out = coordinator
            .query(&[a], &QueryContext::new("article"), &mut ctx)
            .unwrap();
        assert_eq!(out[0].get("relatedTitles"), Some(&json!(["B"])));

        let field = &coordinator.registrations()[0].fields()[0];
        assert_eq!(ctx.depth(field.id()), 0);
        assert!(!field.is_excluded_from(Surface::BatchQuery));
    }
}
